//! CLI command implementations.

pub mod acquire;
pub mod common;
pub mod mosaic;
pub mod tile;

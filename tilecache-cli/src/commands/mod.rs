//! CLI command implementations.

pub mod common;
pub mod region;
pub mod storage;
pub mod tile;

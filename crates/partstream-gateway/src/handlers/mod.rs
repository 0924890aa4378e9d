//! RPC method handlers

pub mod download;
pub mod health;

pub use download::*;
pub use health::*;

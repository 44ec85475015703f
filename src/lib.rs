pub mod assignment;
pub mod attributes;
pub mod cli;
pub mod cli_handlers;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod mcp;
pub mod metrics;
pub mod models;
pub mod tracks;

pub use error::{Result, StoreError};
pub use models::*;

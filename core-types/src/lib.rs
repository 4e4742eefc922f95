//! Shared domain model, configuration, retry policy, and progress bus for
//! the fixed-income catalog.

pub mod cache;
pub mod config;
pub mod progress;
pub mod retry;
pub mod types;

pub use config::AppConfig;

//! Relay Common - Shared configuration, error types, and logging.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.relay/config.json` + env overrides)
//! - The unified error type used by the history store and the dispatcher
//! - Logging setup and trace ID helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    Config, GatewayConfig, HistoryConfig, ObservabilityConfig, PromptConfig, ProviderConfig,
    ServerConfig,
};
pub use error::{Error, Result, ResultExt};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
}

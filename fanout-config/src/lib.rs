//! Configuration for fanout front ends.
//!
//! Values are layered: built-in defaults, then a TOML file (`--config`,
//! `FANOUT_CONFIG`, or the first of `fanout.toml` / `config/fanout.toml`),
//! then environment variables, with a `.env` file applied to the environment
//! first.

pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, LoggingConfig, RetryConfig};
pub use sources::{EnvConfig, FileConfig};

//! Configuration loading and hot-reloading for the promptgate gateway.
//!
//! Uses figment for YAML-based configuration with sensible defaults and
//! `PROMPTGATE_`-prefixed environment overrides, and notify + arc-swap for
//! live file watching.

pub mod schema;
pub mod watcher;

pub use schema::{
    AuthConfig, CompletionsConfig, Config, LogConfig, LogFormat, OpenAiConfig, RealtimeConfig,
};
pub use watcher::ConfigWatcher;

//! Imposter: a configurable mock-API engine.
//!
//! Plugin configurations describe resources to mock. Each inbound request is
//! matched to the most specific resource, checked against the security
//! policy, run through the resource's capture and step pipeline and answered
//! with the resolved response behaviour, or passed through to an upstream.
//! Named stores hold captured values and are exposed under `/system/store`.

pub mod behaviour;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod expression;
pub mod logging;
pub mod matcher;
pub mod plugin;
pub mod response;
pub mod security;
pub mod server;
pub mod steps;
pub mod store;
pub mod system;
pub mod template;
pub mod upstream;

pub use config::{load_plugin_configs, DispatchMode, EngineSettings, PluginConfig};
pub use dispatch::{DispatchPool, Dispatcher};
pub use error::{ConfigError, EngineError};
pub use server::ImposterServer;

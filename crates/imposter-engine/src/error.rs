//! Error taxonomy for the engine.
//!
//! Configuration problems are fatal and surface at startup as [`ConfigError`].
//! Everything that can go wrong while serving a single request is an
//! [`EngineError`]; the dispatcher records it on the exchange and turns it
//! into a generic error response.

use hyper::StatusCode;
use std::path::PathBuf;

/// Fatal configuration errors raised while loading or building configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no configuration files found in {0}")]
    NoConfigFiles(PathBuf),

    #[error("more than one root security block in {0}")]
    DuplicateRootSecurity(PathBuf),

    #[error("static content resource '{path}' must use a wildcard path ending in '/*'")]
    MalformedStaticResource { path: String },

    #[error("resource '{resource}' passes through to undeclared upstream '{upstream}'")]
    MissingUpstream { resource: String, upstream: String },

    #[error("upstream '{name}' has invalid url '{url}'")]
    InvalidUpstream { name: String, url: String },

    #[error("resource is missing a path (method: {method})")]
    MissingPath { method: String },

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("invalid path template '{path}': {message}")]
    InvalidPathTemplate { path: String, message: String },

    #[error("invalid match pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to compile script {name}: {message}")]
    Script { name: String, message: String },

    #[error("invalid capture '{key}': {message}")]
    InvalidCapture { key: String, message: String },

    #[error("failed to preload store '{store}': {message}")]
    Preload { store: String, message: String },
}

/// Per-request failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("request denied by security policy")]
    SecurityDenial,

    #[error("response file not found: {0}")]
    ResponseFileNotFound(PathBuf),

    #[error("resource not found")]
    NotFound,

    #[error("response delivery failed: {0}")]
    Delivery(String),

    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("upstream '{upstream}' request failed: {message}")]
    Upstream { upstream: String, message: String },
}

impl EngineError {
    /// Status code used for the generic error response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::SecurityDenial => StatusCode::UNAUTHORIZED,
            EngineError::ResponseFileNotFound(_) | EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EngineError::SecurityDenial.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            EngineError::ResponseFileNotFound(PathBuf::from("x.json")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::Upstream {
                upstream: "backend".into(),
                message: "refused".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EngineError::Delivery("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

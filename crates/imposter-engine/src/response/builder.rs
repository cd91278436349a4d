use crate::error::EngineError;
use crate::exchange::headers::HeaderMapExt;
use crate::exchange::ExchangeResponse;
use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{HeaderMap, StatusCode};

/// Builds the generic response sent when a request fails.
pub struct ErrorResponseBuilder {
    status: StatusCode,
    body: Option<String>,
    headers: HeaderMap,
}

impl ErrorResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Status and a plain-text reason derived from the error.
    pub fn for_error(error: &EngineError) -> Self {
        let status = error.status_code();
        let reason = status.canonical_reason().unwrap_or("Error");
        Self::new(status)
            .header(CONTENT_TYPE.as_str(), "text/plain")
            .body(reason)
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.set_str(name, value);
        self
    }

    pub fn build(self) -> ExchangeResponse {
        ExchangeResponse {
            status: self.status,
            headers: self.headers,
            body: self.body.map(Bytes::from).unwrap_or_default(),
        }
    }
}

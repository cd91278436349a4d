//! The per-request exchange threaded through the pipeline.

pub mod headers;
mod listener;

pub use listener::{ExchangeListener, ExchangeLogger, RequestStoreCleanup};

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::EngineError;
use headers::HeaderMapExt;

/// Lifecycle of an exchange. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExchangePhase {
    RequestReceived,
    RequestDispatched,
    ResponseSent,
}

/// Inbound request data.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub method: Method,
    /// Path without the query string
    pub path: String,
    pub query_string: Option<String>,
    /// Decoded query parameters in request order
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Populated once a resource with a path template matches
    pub path_params: HashMap<String, String>,
}

impl ExchangeRequest {
    pub fn new(method: Method, path_and_query: &str, headers: HeaderMap, body: Bytes) -> Self {
        let (path, query_string) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path_and_query.to_string(), None),
        };
        let query = parse_query_string(query_string.as_deref());
        Self {
            method,
            path,
            query_string,
            query,
            headers,
            body,
            path_params: HashMap::new(),
        }
    }

    /// First value of a query parameter; keys are case-sensitive.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header value; names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Path followed by the query string, if any.
    pub fn uri(&self) -> String {
        match &self.query_string {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Outbound response being assembled.
#[derive(Debug, Clone)]
pub struct ExchangeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for ExchangeResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl ExchangeResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }
}

/// Mutable per-request context.
///
/// Parsed request bodies are cached here so matching, captures and templates
/// parse at most once. The XML cache records only whether the body is
/// well-formed; XPath evaluation re-reads the text because the parsed
/// document type cannot cross threads.
#[derive(Debug)]
pub struct HttpExchange {
    request_id: String,
    pub request: ExchangeRequest,
    pub response: ExchangeResponse,
    phase: ExchangePhase,
    started: Instant,
    json_body: OnceLock<Option<Value>>,
    xml_body: OnceLock<bool>,
    matched_resource: Option<String>,
    failure: Option<EngineError>,
    close_connection: bool,
}

impl HttpExchange {
    pub fn new(request: ExchangeRequest) -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string(), request)
    }

    /// An exchange for a request that already has an id.
    pub fn with_request_id(request_id: String, request: ExchangeRequest) -> Self {
        Self {
            request_id,
            request,
            response: ExchangeResponse::default(),
            phase: ExchangePhase::RequestReceived,
            started: Instant::now(),
            json_body: OnceLock::new(),
            xml_body: OnceLock::new(),
            matched_resource: None,
            failure: None,
            close_connection: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    /// Move to a later phase. Returns false (and leaves the phase unchanged)
    /// if `next` is not after the current phase.
    pub fn advance(&mut self, next: ExchangePhase) -> bool {
        if next > self.phase {
            self.phase = next;
            true
        } else {
            false
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// Request body parsed as JSON, or `None` if it is not JSON.
    pub fn json_body(&self) -> Option<&Value> {
        self.json_body
            .get_or_init(|| serde_json::from_slice(&self.request.body).ok())
            .as_ref()
    }

    /// Request body as text if it is well-formed XML.
    pub fn xml_body(&self) -> Option<String> {
        let valid = *self.xml_body.get_or_init(|| {
            std::str::from_utf8(&self.request.body)
                .ok()
                .is_some_and(|text| sxd_document::parser::parse(text).is_ok())
        });
        valid.then(|| self.request.body_text())
    }

    pub fn set_matched_resource(&mut self, description: String) {
        self.matched_resource = Some(description);
    }

    pub fn matched_resource(&self) -> Option<&str> {
        self.matched_resource.as_deref()
    }

    /// Record a terminal failure. The first failure wins.
    pub fn fail(&mut self, error: EngineError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    pub fn failure(&self) -> Option<&EngineError> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Ask the transport to drop the connection instead of responding.
    pub fn close_connection(&mut self) {
        self.close_connection = true;
    }

    pub fn should_close_connection(&self) -> bool {
        self.close_connection
    }
}

/// Parse a query string into ordered, percent-decoded pairs.
pub fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    let Some(q) = query else {
        return Vec::new();
    };
    q.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.replace('+', " "))
}

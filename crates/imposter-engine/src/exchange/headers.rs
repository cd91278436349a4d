//! Header names and helpers shared by the pipeline.
//!
//! Static header names avoid runtime `.parse()` calls for the engine's own
//! headers; the extension trait hides the fallible conversion of dynamic
//! values.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Response;

pub static X_IMPOSTER_REQUEST: HeaderName = HeaderName::from_static("x-imposter-request");

pub static SERVER_VALUE: HeaderValue = HeaderValue::from_static("imposter");

/// Headers that must not be copied between the client and an upstream.
pub const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "accept-encoding",
    "host",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Copy every end-to-end header from `from` into `to`.
pub fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Extension trait for setting headers from dynamic strings.
pub trait HeaderMapExt {
    /// Insert (replacing) a header. Returns false if the name or value is not
    /// a valid header.
    fn set_str(&mut self, name: &str, value: &str) -> bool;

    /// Value of the first header with this name, if it is valid UTF-8.
    fn get_str(&self, name: &str) -> Option<&str>;
}

impl HeaderMapExt for HeaderMap {
    fn set_str(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.insert(name, value);
                true
            }
            _ => false,
        }
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

impl<B> HeaderMapExt for Response<B> {
    fn set_str(&mut self, name: &str, value: &str) -> bool {
        self.headers_mut().set_str(name, value)
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.headers().get_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;

    #[test]
    fn test_static_header_names() {
        assert_eq!(X_IMPOSTER_REQUEST.as_str(), "x-imposter-request");
        assert_eq!(SERVER_VALUE.to_str().unwrap(), "imposter");
    }

    #[test]
    fn test_set_str_valid_and_invalid() {
        let mut response = Response::new(Full::new(Bytes::new()));
        assert!(response.set_str("X-Custom", "value"));
        assert_eq!(response.get_str("x-custom"), Some("value"));
        assert!(!response.set_str("X-Custom", "invalid\nvalue"));
        assert!(!response.set_str("bad header", "v"));
    }

    #[test]
    fn test_copy_end_to_end_skips_hop_by_hop() {
        let mut from = HeaderMap::new();
        from.insert("connection", HeaderValue::from_static("close"));
        from.insert("host", HeaderValue::from_static("example.com"));
        from.insert("x-trace", HeaderValue::from_static("1"));
        from.insert("accept-encoding", HeaderValue::from_static("gzip"));

        let mut to = HeaderMap::new();
        copy_end_to_end(&from, &mut to);
        assert_eq!(to.len(), 1);
        assert_eq!(to.get_str("X-Trace"), Some("1"));
    }
}

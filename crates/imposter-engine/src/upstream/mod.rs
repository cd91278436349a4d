//! Passthrough of matched requests to a configured upstream.
//!
//! The inbound method, path, query, headers and body are forwarded to the
//! upstream's authority; hop-by-hop headers are dropped in both directions.
//! The upstream response is copied into the exchange verbatim (never
//! templated).

use crate::config::UpstreamConfig;
use crate::error::EngineError;
use crate::exchange::headers::copy_end_to_end;
use crate::exchange::{ExchangeResponse, HttpExchange};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, error};

/// Requests under this prefix are never passed through.
pub const SYSTEM_PATH_PREFIX: &str = "/system/";

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Shared pooled client for upstream calls.
pub fn create_http_client() -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_keepalive(Some(Duration::from_secs(60)));
    connector.set_connect_timeout(Some(Duration::from_secs(10)));

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .build(connector)
}

pub struct UpstreamService {
    client: HttpClient,
}

impl Default for UpstreamService {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamService {
    pub fn new() -> Self {
        Self {
            client: create_http_client(),
        }
    }

    /// Forward the exchange's request. Returns `Ok(false)` without contacting
    /// the upstream for reserved system paths.
    pub async fn forward(
        &self,
        name: &str,
        upstream: &UpstreamConfig,
        exchange: &mut HttpExchange,
    ) -> Result<bool, EngineError> {
        let request = &exchange.request;
        if request.path.starts_with(SYSTEM_PATH_PREFIX) {
            debug!("Not passing system path {} through to {}", request.path, name);
            return Ok(false);
        }

        let failed = |message: String| EngineError::Upstream {
            upstream: name.to_string(),
            message,
        };

        let (scheme, authority) = upstream.parts().map_err(failed)?;
        let target = format!("{}://{}{}", scheme, authority, request.uri());
        debug!("Passing {} {} through to {}", request.method, request.path, target);

        let mut outbound = Request::builder()
            .method(request.method.clone())
            .uri(&target)
            .body(Full::new(request.body.clone()))
            .map_err(|e| failed(e.to_string()))?;
        copy_end_to_end(&request.headers, outbound.headers_mut());

        let response = self.client.request(outbound).await.map_err(|e| {
            error!("Failed to forward request to upstream {}: {}", name, e);
            failed(e.to_string())
        })?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| failed(format!("failed to read upstream response: {e}")))?
            .to_bytes();

        let mut headers = hyper::HeaderMap::new();
        copy_end_to_end(&parts.headers, &mut headers);
        exchange.response = ExchangeResponse {
            status: parts.status,
            headers,
            body,
        };
        Ok(true)
    }
}

//! Response delivery.
//!
//! Turns a resolved [`ResponseBehaviour`] into the exchange response:
//! failure simulation, artificial latency, status and headers, then the body
//! from a file, inline content, or the fallback senders.

mod builder;
pub mod content_type;
mod file_cache;

pub use builder::ErrorResponseBuilder;
pub use file_cache::ResponseFileCache;

use crate::behaviour::{ContentSource, ResponseBehaviour};
use crate::config::{DelayConfig, FailureType, ResourceConfig};
use crate::error::EngineError;
use crate::exchange::headers::HeaderMapExt;
use crate::exchange::{ExchangeResponse, HttpExchange};
use crate::expression::{EvalContext, ExpressionRegistry};
use crate::store::StoreRegistry;
use crate::template;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::StatusCode;
use rand::Rng;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Last-resort body producers, tried in order when a behaviour carries no
/// content. Returns `Ok(true)` once a sender has written the response.
#[async_trait]
pub trait FallbackSender: Send + Sync {
    async fn send(
        &self,
        resource: &ResourceConfig,
        exchange: &mut HttpExchange,
        behaviour: &ResponseBehaviour,
    ) -> Result<bool, EngineError>;
}

/// Sends the status and headers with an empty body.
#[derive(Debug, Default)]
pub struct EmptyBodySender;

#[async_trait]
impl FallbackSender for EmptyBodySender {
    async fn send(
        &self,
        resource: &ResourceConfig,
        exchange: &mut HttpExchange,
        _behaviour: &ResponseBehaviour,
    ) -> Result<bool, EngineError> {
        debug!(
            "Response for {} has no content; sending empty body",
            resource.describe()
        );
        exchange.response.body = Bytes::new();
        Ok(true)
    }
}

pub struct ResponseService {
    expressions: Arc<ExpressionRegistry>,
    stores: Arc<StoreRegistry>,
    files: ResponseFileCache,
    fallbacks: Vec<Arc<dyn FallbackSender>>,
}

impl ResponseService {
    pub fn new(expressions: Arc<ExpressionRegistry>, stores: Arc<StoreRegistry>) -> Self {
        Self {
            expressions,
            stores,
            files: ResponseFileCache::new(),
            fallbacks: vec![Arc::new(EmptyBodySender) as Arc<dyn FallbackSender>],
        }
    }

    /// Replace the fallback chain.
    pub fn with_fallbacks(mut self, fallbacks: Vec<Arc<dyn FallbackSender>>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn file_cache(&self) -> &ResponseFileCache {
        &self.files
    }

    /// Write the response described by `behaviour` into the exchange.
    pub async fn send(
        &self,
        resource: &ResourceConfig,
        exchange: &mut HttpExchange,
        behaviour: &ResponseBehaviour,
    ) -> Result<(), EngineError> {
        if let Some(failure) = behaviour.failure_type {
            simulate_failure(failure, exchange);
            return Ok(());
        }

        if let Some(delay) = behaviour.performance.as_ref().and_then(delay_for) {
            debug!("Delaying response by {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        let status = StatusCode::from_u16(behaviour.status_code.unwrap_or(200))
            .map_err(|e| EngineError::Delivery(e.to_string()))?;
        let mut response = ExchangeResponse {
            status,
            ..Default::default()
        };

        {
            let ctx = EvalContext::new(exchange, &self.stores);
            for (name, value) in &behaviour.headers {
                let value = if behaviour.template {
                    template::substitute(value, &self.expressions, &ctx)
                } else {
                    value.into()
                };
                if !response.headers.set_str(name, &value) {
                    warn!("Skipping invalid response header {}: {}", name, value);
                }
            }
        }

        let body = match &behaviour.content {
            ContentSource::File(path) => {
                let body = self.files.get(path).await?;
                set_default_content_type(&mut response, content_type::from_extension(path));
                Some(body)
            }
            ContentSource::Inline(content) => {
                let body = Bytes::from(content.clone());
                set_default_content_type(&mut response, Some(content_type::guess(&body)));
                Some(body)
            }
            ContentSource::None if resource.static_dir().is_some() => {
                return Err(EngineError::NotFound);
            }
            ContentSource::None => None,
        };

        match body {
            Some(body) => {
                let body = if behaviour.template {
                    let ctx = EvalContext::new(exchange, &self.stores).with_response(&response);
                    template::substitute_bytes(&body, &self.expressions, &ctx)
                } else {
                    body
                };
                response.body = body;
                exchange.response = response;
                Ok(())
            }
            None => {
                exchange.response = response;
                for sender in &self.fallbacks {
                    if sender.send(resource, exchange, behaviour).await? {
                        return Ok(());
                    }
                }
                Err(EngineError::Delivery(format!(
                    "no fallback sender produced a response for {}",
                    resource.describe()
                )))
            }
        }
    }

    /// Serve a file beneath the resource's static directory.
    ///
    /// The part of the request path after the resource's `/*` prefix is
    /// resolved against the directory; directories serve `index.html`.
    pub async fn send_static(
        &self,
        resource: &ResourceConfig,
        exchange: &mut HttpExchange,
    ) -> Result<(), EngineError> {
        let (Some(dir), Some(pattern)) = (resource.static_dir(), resource.path.as_deref()) else {
            return Err(EngineError::NotFound);
        };
        let prefix = pattern.trim_end_matches('*');
        let relative = exchange
            .request
            .path
            .strip_prefix(prefix)
            .or_else(|| exchange.request.path.strip_prefix(prefix.trim_end_matches('/')))
            .ok_or(EngineError::NotFound)?;
        let file = static_file(dir, relative).ok_or(EngineError::NotFound)?;

        let body = match self.files.get(&file).await {
            Ok(body) => body,
            Err(EngineError::ResponseFileNotFound(_)) => return Err(EngineError::NotFound),
            Err(e) => return Err(e),
        };
        let mut response = ExchangeResponse {
            body,
            ..Default::default()
        };
        set_default_content_type(&mut response, content_type::from_extension(&file));
        exchange.response = response;
        Ok(())
    }
}

fn simulate_failure(failure: FailureType, exchange: &mut HttpExchange) {
    match failure {
        FailureType::EmptyResponse => {
            debug!("Simulating empty response");
            exchange.response = ExchangeResponse::default();
        }
        FailureType::CloseConnection => {
            debug!("Simulating connection close");
            exchange.close_connection();
        }
    }
}

/// Exact delay if positive, else uniform in `[min, max)`.
pub fn delay_for(config: &DelayConfig) -> Option<Duration> {
    if let Some(exact) = config.exact.filter(|ms| *ms > 0) {
        return Some(Duration::from_millis(exact));
    }
    match (config.min, config.max) {
        (Some(min), Some(max)) if min < max => {
            Some(Duration::from_millis(rand::thread_rng().gen_range(min..max)))
        }
        (Some(min), Some(max)) if min == max && min > 0 => Some(Duration::from_millis(min)),
        _ => None,
    }
}

fn set_default_content_type(response: &mut ExchangeResponse, content_type: Option<&str>) {
    if let Some(content_type) = content_type {
        if !response.headers.contains_key(CONTENT_TYPE) {
            response.headers.set_str(CONTENT_TYPE.as_str(), content_type);
        }
    }
}

/// Resolve `relative` beneath `dir`, rejecting parent-directory segments.
fn static_file(dir: &Path, relative: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(relative).ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let path = dir.join(relative);
    if relative.as_os_str().is_empty() || path.is_dir() {
        Some(path.join("index.html"))
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::test_support::exchange;
    use hyper::Method;

    fn service() -> ResponseService {
        ResponseService::new(
            Arc::new(ExpressionRegistry::default()),
            Arc::new(StoreRegistry::new()),
        )
    }

    fn resource() -> ResourceConfig {
        ResourceConfig {
            path: Some("/pets".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_inline_content_with_template() {
        let mut ex = exchange(Method::GET, "/pets?name=Rex", "");
        let behaviour = ResponseBehaviour {
            status_code: Some(201),
            headers: vec![("X-Name".into(), "${context.request.queryParams.name}".into())],
            content: ContentSource::Inline(
                r#"{"name": "${context.request.queryParams.name}", "status": "${context.response.statusCode}"}"#
                    .into(),
            ),
            template: true,
            ..Default::default()
        };
        service().send(&resource(), &mut ex, &behaviour).await.unwrap();

        assert_eq!(ex.response.status, StatusCode::CREATED);
        assert_eq!(ex.response.header("x-name"), Some("Rex"));
        assert_eq!(ex.response.body_text(), r#"{"name": "Rex", "status": "201"}"#);
        assert_eq!(ex.response.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_untemplated_content_is_verbatim() {
        let mut ex = exchange(Method::GET, "/pets", "");
        let behaviour = ResponseBehaviour {
            headers: vec![("Content-Type".into(), "text/custom".into())],
            content: ContentSource::Inline("${context.request.path}".into()),
            ..Default::default()
        };
        service().send(&resource(), &mut ex, &behaviour).await.unwrap();
        assert_eq!(ex.response.status, StatusCode::OK);
        assert_eq!(ex.response.body_text(), "${context.request.path}");
        assert_eq!(ex.response.header("content-type"), Some("text/custom"));
    }

    #[tokio::test]
    async fn test_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pets.xml");
        std::fs::write(&file, "<pets/>").unwrap();

        let mut ex = exchange(Method::GET, "/pets", "");
        let behaviour = ResponseBehaviour {
            content: ContentSource::File(file),
            ..Default::default()
        };
        service().send(&resource(), &mut ex, &behaviour).await.unwrap();
        assert_eq!(ex.response.body_text(), "<pets/>");
        assert_eq!(ex.response.header("content-type"), Some("application/xml"));

        let missing = ResponseBehaviour {
            content: ContentSource::File(dir.path().join("missing.json")),
            ..Default::default()
        };
        let result = service().send(&resource(), &mut ex, &missing).await;
        assert!(matches!(result, Err(EngineError::ResponseFileNotFound(_))));
    }

    #[tokio::test]
    async fn test_failure_bypasses_delivery() {
        let mut ex = exchange(Method::GET, "/pets", "");
        let behaviour = ResponseBehaviour {
            status_code: Some(500),
            content: ContentSource::Inline("ignored".into()),
            failure_type: Some(FailureType::EmptyResponse),
            ..Default::default()
        };
        service().send(&resource(), &mut ex, &behaviour).await.unwrap();
        assert_eq!(ex.response.status, StatusCode::OK);
        assert!(ex.response.body.is_empty());
        assert!(!ex.should_close_connection());

        let close = ResponseBehaviour {
            failure_type: Some(FailureType::CloseConnection),
            ..Default::default()
        };
        service().send(&resource(), &mut ex, &close).await.unwrap();
        assert!(ex.should_close_connection());
    }

    #[tokio::test]
    async fn test_fallback_chain() {
        struct Declines;

        #[async_trait]
        impl FallbackSender for Declines {
            async fn send(
                &self,
                _resource: &ResourceConfig,
                _exchange: &mut HttpExchange,
                _behaviour: &ResponseBehaviour,
            ) -> Result<bool, EngineError> {
                Ok(false)
            }
        }

        let mut ex = exchange(Method::GET, "/pets", "");
        let behaviour = ResponseBehaviour {
            status_code: Some(204),
            ..Default::default()
        };

        let chained = service().with_fallbacks(vec![
            Arc::new(Declines) as Arc<dyn FallbackSender>,
            Arc::new(EmptyBodySender),
        ]);
        chained.send(&resource(), &mut ex, &behaviour).await.unwrap();
        assert_eq!(ex.response.status, StatusCode::NO_CONTENT);

        let exhausted = service().with_fallbacks(vec![Arc::new(Declines)]);
        let result = exhausted.send(&resource(), &mut ex, &behaviour).await;
        assert!(matches!(result, Err(EngineError::Delivery(_))));
    }

    #[tokio::test]
    async fn test_static_dir_without_content_is_not_found() {
        let mut config = resource();
        config.path = Some("/static/*".into());
        config.response = Some(crate::config::ResponseConfig {
            dir: Some(PathBuf::from("/srv")),
            ..Default::default()
        });
        let mut ex = exchange(Method::GET, "/static/a.txt", "");
        let result = service()
            .send(&config, &mut ex, &ResponseBehaviour::default())
            .await;
        assert!(matches!(result, Err(EngineError::NotFound)));
    }

    #[tokio::test]
    async fn test_send_static() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html/>").unwrap();

        let config = ResourceConfig {
            path: Some("/static/*".into()),
            response: Some(crate::config::ResponseConfig {
                dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let service = service();

        let mut ex = exchange(Method::GET, "/static/css/site.css", "");
        service.send_static(&config, &mut ex).await.unwrap();
        assert_eq!(ex.response.body_text(), "body {}");
        assert_eq!(ex.response.header("content-type"), Some("text/css"));

        let mut ex = exchange(Method::GET, "/static/", "");
        service.send_static(&config, &mut ex).await.unwrap();
        assert_eq!(ex.response.body_text(), "<html/>");

        let mut ex = exchange(Method::GET, "/static/missing.txt", "");
        assert!(matches!(
            service.send_static(&config, &mut ex).await,
            Err(EngineError::NotFound)
        ));

        let mut ex = exchange(Method::GET, "/static/../secret", "");
        assert!(matches!(
            service.send_static(&config, &mut ex).await,
            Err(EngineError::NotFound)
        ));
    }

    #[test]
    fn test_delay_for() {
        let exact = DelayConfig {
            exact: Some(500),
            min: Some(1),
            max: Some(2),
        };
        assert_eq!(delay_for(&exact), Some(Duration::from_millis(500)));

        let range = DelayConfig {
            exact: Some(0),
            min: Some(100),
            max: Some(200),
        };
        for _ in 0..20 {
            let delay = delay_for(&range).unwrap().as_millis();
            assert!((100..200).contains(&delay));
        }

        let same = DelayConfig {
            exact: None,
            min: Some(50),
            max: Some(50),
        };
        assert_eq!(delay_for(&same), Some(Duration::from_millis(50)));

        let inverted = DelayConfig {
            exact: None,
            min: Some(200),
            max: Some(100),
        };
        assert_eq!(delay_for(&inverted), None);
        assert_eq!(delay_for(&DelayConfig::default()), None);
    }
}

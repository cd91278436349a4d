//! Capture service: copies request/response values into stores.
//!
//! Request-phase items are written immediately. Response-phase items are
//! resolved when the response has been sent and written through the
//! [`DeferredQueue`], so they never delay the client.

mod deferred;

pub use deferred::{DeferredQueue, DeferredTask};

use crate::config::{CapturePhase, CaptureSource, ItemCaptureConfig};
use crate::error::ConfigError;
use crate::expression::body::{json_path_query, xpath_query};
use crate::expression::{rewrite_remote_namespace, EvalContext, ExpressionRegistry};
use crate::store::{StoreRegistry, DEFAULT_STORE_NAME, REQUEST_STORE_NAME};
use crate::template;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which body JSONPath/XPath sources read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    Request,
    /// The response in the evaluation context (remote step responses)
    Response,
}

/// A capture item validated at configuration build time.
#[derive(Debug, Clone)]
pub struct PreparedCapture {
    pub name: String,
    store: Option<String>,
    key: CaptureSource,
    source: CaptureSource,
    pub phase: CapturePhase,
    enabled: bool,
    xml_namespaces: Vec<(String, String)>,
}

impl PreparedCapture {
    pub fn prepare(name: &str, config: &ItemCaptureConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidCapture {
            key: name.to_string(),
            message,
        };
        let key = match &config.key {
            Some(key) => key.source().map_err(invalid)?,
            None => CaptureSource::Const(name.to_string()),
        };
        Ok(Self {
            name: name.to_string(),
            store: config.store.clone(),
            key,
            source: config.source().map_err(invalid)?,
            phase: config.phase,
            enabled: config.enabled,
            xml_namespaces: config.xml_namespaces.clone(),
        })
    }

    pub fn prepare_all(
        captures: &[(String, ItemCaptureConfig)],
    ) -> Result<Vec<Self>, ConfigError> {
        captures
            .iter()
            .map(|(name, config)| Self::prepare(name, config))
            .collect()
    }
}

/// A resolved write.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureWrite {
    pub store: String,
    pub key: String,
    pub value: Value,
}

pub struct CaptureService {
    stores: Arc<StoreRegistry>,
    expressions: Arc<ExpressionRegistry>,
    deferred: DeferredQueue,
}

impl CaptureService {
    pub fn new(
        stores: Arc<StoreRegistry>,
        expressions: Arc<ExpressionRegistry>,
        deferred: DeferredQueue,
    ) -> Self {
        Self {
            stores,
            expressions,
            deferred,
        }
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    /// Run every enabled item configured for `phase`.
    ///
    /// Items whose store name or key cannot be resolved are skipped with a
    /// warning; other items are unaffected.
    pub async fn capture(
        &self,
        items: &[PreparedCapture],
        ctx: &EvalContext<'_>,
        phase: CapturePhase,
        body: BodySource,
    ) {
        let writes: Vec<CaptureWrite> = items
            .iter()
            .filter(|item| item.enabled && item.phase == phase)
            .filter_map(|item| self.resolve(item, ctx, body))
            .collect();

        let request_id = ctx.exchange.request_id().to_string();
        match phase {
            CapturePhase::RequestReceived => {
                for write in writes {
                    self.write(&write, Some(&request_id));
                }
            }
            CapturePhase::ResponseSent => {
                for write in writes {
                    if write.store == REQUEST_STORE_NAME {
                        // The request store is removed once the response is sent
                        debug!(
                            "Skipping response-phase capture of '{}' into the request store",
                            write.key
                        );
                        continue;
                    }
                    let stores = self.stores.clone();
                    let label = format!("capture {}/{}", write.store, write.key);
                    self.deferred
                        .submit(
                            label,
                            Box::new(move || {
                                stores.open(&write.store).save(&write.key, write.value);
                                Ok(())
                            }),
                        )
                        .await;
                }
            }
        }
    }

    fn write(&self, write: &CaptureWrite, request_id: Option<&str>) {
        debug!("Capturing {}/{} = {}", write.store, write.key, write.value);
        self.stores
            .resolve(&write.store, request_id)
            .save(&write.key, write.value.clone());
    }

    /// Resolve store, key and value for one item. `None` skips the item.
    pub fn resolve(
        &self,
        item: &PreparedCapture,
        ctx: &EvalContext<'_>,
        body: BodySource,
    ) -> Option<CaptureWrite> {
        let store = match &item.store {
            Some(expr) => template::substitute(expr, &self.expressions, ctx).into_owned(),
            None => DEFAULT_STORE_NAME.to_string(),
        };
        if store.is_empty() {
            warn!("Capture '{}': store name resolved to nothing, skipping", item.name);
            return None;
        }

        let key = match self.evaluate(&item.key, ctx, body, &item.xml_namespaces) {
            Some(Value::Null) | None => {
                warn!("Capture '{}': item key could not be resolved, skipping", item.name);
                return None;
            }
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };

        let value = self
            .evaluate(&item.source, ctx, body, &item.xml_namespaces)
            .unwrap_or(Value::Null);

        Some(CaptureWrite { store, key, value })
    }

    fn evaluate(
        &self,
        source: &CaptureSource,
        ctx: &EvalContext<'_>,
        body: BodySource,
        namespaces: &[(String, String)],
    ) -> Option<Value> {
        let request = &ctx.exchange.request;
        let text = |s: Option<&str>| s.map(|s| Value::String(s.to_string()));
        match source {
            CaptureSource::Const(value) => Some(Value::String(value.clone())),
            CaptureSource::PathParam(name) => text(request.path_param(name)),
            CaptureSource::QueryParam(name) => text(request.query_param(name)),
            CaptureSource::RequestHeader(name) => text(request.header(name)),
            CaptureSource::JsonPath(path) => {
                let document = match body {
                    BodySource::Request => ctx.exchange.json_body().cloned(),
                    BodySource::Response => serde_json::from_slice(&ctx.response.body).ok(),
                };
                document.and_then(|doc| json_path_query(&doc, path))
            }
            CaptureSource::XPath(path) => {
                let xml = match body {
                    BodySource::Request => ctx.exchange.xml_body(),
                    BodySource::Response => Some(ctx.response.body_text()),
                };
                xml.and_then(|xml| xpath_query(&xml, path, namespaces))
                    .map(Value::String)
            }
            CaptureSource::Expression(expr) => {
                let expr = rewrite_remote_namespace(expr);
                self.expressions.evaluate_expression(&expr, ctx)
            }
        }
    }
}

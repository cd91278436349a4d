//! Remote steps: call an external HTTP endpoint and capture from its response.
//!
//! The URL, header values, query/form values and body may contain `${...}`
//! placeholders evaluated against the inbound exchange. The remote response
//! never reaches the client; it is only visible to the step's captures, as
//! `remote.response.*` (or `context.response.*`).

use crate::capture::{BodySource, CaptureService, PreparedCapture};
use crate::config::{CapturePhase, RemoteStepConfig};
use crate::error::{ConfigError, EngineError};
use crate::exchange::{ExchangeResponse, HttpExchange};
use crate::expression::{EvalContext, ExpressionRegistry};
use crate::store::StoreRegistry;
use crate::template;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// A remote step with its captures validated.
#[derive(Debug, Clone)]
pub struct RemoteStep {
    pub config: RemoteStepConfig,
    method: reqwest::Method,
    captures: Vec<PreparedCapture>,
}

impl RemoteStep {
    pub fn prepare(config: &RemoteStepConfig) -> Result<Self, ConfigError> {
        let method = reqwest::Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(config.method.clone()))?;
        let captures = PreparedCapture::prepare_all(&config.capture)?;
        // Remote responses only exist while the step runs
        if let Some(item) = captures
            .iter()
            .find(|c| c.phase == CapturePhase::ResponseSent)
        {
            return Err(ConfigError::InvalidCapture {
                key: item.name.clone(),
                message: "remote step captures cannot use the ResponseSent phase".into(),
            });
        }
        Ok(Self {
            config: config.clone(),
            method,
            captures,
        })
    }

    pub fn describe(&self) -> String {
        format!("remote {} {}", self.method, self.config.url)
    }
}

/// Executes remote steps with a shared HTTP client.
pub struct RemoteStepService {
    client: reqwest::Client,
    expressions: Arc<ExpressionRegistry>,
    captures: Arc<CaptureService>,
}

impl RemoteStepService {
    pub fn new(expressions: Arc<ExpressionRegistry>, captures: Arc<CaptureService>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            expressions,
            captures,
        }
    }

    /// Perform the call and run the step's captures against its response.
    pub async fn execute(
        &self,
        step: &RemoteStep,
        exchange: &HttpExchange,
        stores: &StoreRegistry,
    ) -> Result<ExchangeResponse, EngineError> {
        let remote = self.call(step, exchange, stores).await?;
        debug!(
            "Remote step {} returned {} ({} bytes)",
            step.describe(),
            remote.status,
            remote.body.len()
        );

        let ctx = EvalContext::new(exchange, stores).with_response(&remote);
        self.captures
            .capture(
                &step.captures,
                &ctx,
                CapturePhase::RequestReceived,
                BodySource::Response,
            )
            .await;
        Ok(remote)
    }

    async fn call(
        &self,
        step: &RemoteStep,
        exchange: &HttpExchange,
        stores: &StoreRegistry,
    ) -> Result<ExchangeResponse, EngineError> {
        let ctx = EvalContext::new(exchange, stores);
        let render = |text: &str| template::substitute(text, &self.expressions, &ctx).into_owned();
        let failed = |message: String| EngineError::StepExecution {
            step: step.describe(),
            message,
        };

        let mut url = render(&step.config.url);
        if !step.config.query_params.is_empty() {
            let query = encode_pairs(
                step.config
                    .query_params
                    .iter()
                    .map(|(k, v)| (k.as_str(), render(v))),
            );
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }

        let mut request = self.client.request(step.method.clone(), &url);
        for (name, value) in &step.config.headers {
            request = request.header(name.as_str(), render(value));
        }

        if !step.config.form_params.is_empty() {
            let form = encode_pairs(
                step.config
                    .form_params
                    .iter()
                    .map(|(k, v)| (k.as_str(), render(v))),
            );
            request = request
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(form);
        } else if let Some(content) = &step.config.content {
            request = request.body(render(content));
        }

        let response = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| failed(e.to_string()))?;

        Ok(ExchangeResponse {
            status,
            headers,
            body,
        })
    }
}

fn encode_pairs<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> String {
    pairs
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(&v)))
        .collect::<Vec<_>>()
        .join("&")
}

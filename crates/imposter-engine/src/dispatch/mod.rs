//! Request orchestration.
//!
//! [`Dispatcher::dispatch`] runs one exchange through the pipeline:
//!
//! 1. select the resource (most specific match across plugins, then a
//!    plugin root that can serve the request)
//! 2. enforce the security policy
//! 3. run matching interceptors; one with `continue: false` answers instead
//!    of the resource
//! 4. pass through to an upstream, serve static content, or capture, resolve
//!    the behaviour and deliver it
//!
//! Failures become a generic error response. [`Dispatcher::complete`] is the
//! single finalisation path: it moves the exchange to `ResponseSent`, queues
//! response-phase captures and notifies listeners, exactly once.

mod pool;

pub use pool::DispatchPool;

use crate::capture::{BodySource, CaptureService, DeferredQueue, PreparedCapture};
use crate::config::{CapturePhase, EngineSettings, PluginConfig};
use crate::error::{ConfigError, EngineError};
use crate::exchange::headers::{X_IMPOSTER_REQUEST, SERVER_VALUE};
use crate::exchange::{
    ExchangeListener, ExchangeLogger, ExchangePhase, HttpExchange, RequestStoreCleanup,
};
use crate::expression::{EvalContext, ExpressionRegistry};
use crate::plugin::{PreparedPlugin, PreparedResource};
use crate::response::{ErrorResponseBuilder, ResponseService};
use crate::security;
use crate::system;
use crate::steps::{
    RemoteStepService, ResolveRequest, ResponseBehaviourResolver, RhaiScriptService,
};
use crate::store::StoreRegistry;
use crate::upstream::UpstreamService;
use hyper::header::{HeaderValue, SERVER};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Resource captures still to run once the response has been sent.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    response_captures: Vec<Arc<[PreparedCapture]>>,
}

impl DispatchOutcome {
    fn track(&mut self, resource: &PreparedResource) {
        let has_response_phase = resource
            .captures
            .iter()
            .any(|c| c.phase == CapturePhase::ResponseSent);
        if has_response_phase {
            self.response_captures.push(resource.captures.clone());
        }
    }
}

pub struct Dispatcher {
    plugins: Vec<PreparedPlugin>,
    stores: Arc<StoreRegistry>,
    captures: Arc<CaptureService>,
    resolver: ResponseBehaviourResolver,
    responses: ResponseService,
    upstreams: UpstreamService,
    listeners: Vec<Arc<dyn ExchangeListener>>,
    add_engine_headers: bool,
}

impl Dispatcher {
    /// Compile plugin configurations and preload stores.
    ///
    /// Must be called from within a Tokio runtime; the deferred queue worker
    /// is spawned here.
    pub fn build(
        configs: &[PluginConfig],
        settings: &EngineSettings,
    ) -> Result<Self, ConfigError> {
        let stores = Arc::new(StoreRegistry::new());
        for config in configs {
            if let Some(system) = &config.system {
                stores.preload(system)?;
            }
        }

        let scripts = RhaiScriptService::new();
        let plugins = configs
            .iter()
            .map(|config| PreparedPlugin::build(config, &scripts))
            .collect::<Result<Vec<_>, _>>()?;

        let expressions = Arc::new(ExpressionRegistry::default());
        let captures = Arc::new(CaptureService::new(
            stores.clone(),
            expressions.clone(),
            DeferredQueue::start(settings.deferred_queue_capacity),
        ));
        let resolver = ResponseBehaviourResolver::new(
            RemoteStepService::new(expressions.clone(), captures.clone()),
            stores.clone(),
        );
        let responses = ResponseService::new(expressions, stores.clone());

        let listeners: Vec<Arc<dyn ExchangeListener>> = vec![
            Arc::new(RequestStoreCleanup::new(stores.clone())),
            Arc::new(ExchangeLogger),
        ];

        info!("Engine configured with {} plugin(s)", plugins.len());
        Ok(Self {
            plugins,
            listeners,
            stores,
            captures,
            resolver,
            responses,
            upstreams: UpstreamService::new(),
            add_engine_headers: settings.add_engine_headers,
        })
    }

    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.stores
    }

    pub fn add_engine_headers(&self) -> bool {
        self.add_engine_headers
    }

    pub fn deferred(&self) -> &DeferredQueue {
        self.captures.deferred()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ExchangeListener>) {
        self.listeners.push(listener);
    }

    /// Run the pipeline. The exchange response is always populated on return.
    pub async fn dispatch(&self, exchange: &mut HttpExchange) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if let Err(e) = self.handle(exchange, &mut outcome).await {
            self.fail(exchange, e);
        }
        if self.add_engine_headers {
            self.apply_engine_headers(exchange);
        }
        outcome
    }

    /// Finalise the exchange. Idempotent: only the first call has effect.
    pub async fn complete(&self, exchange: &mut HttpExchange, outcome: DispatchOutcome) {
        if !exchange.advance(ExchangePhase::ResponseSent) {
            return;
        }
        if !exchange.is_failed() {
            let ctx = EvalContext::new(exchange, &self.stores);
            for captures in &outcome.response_captures {
                self.captures
                    .capture(captures, &ctx, CapturePhase::ResponseSent, BodySource::Request)
                    .await;
            }
        }
        self.notify(exchange, ExchangePhase::ResponseSent);
    }

    async fn handle(
        &self,
        exchange: &mut HttpExchange,
        outcome: &mut DispatchOutcome,
    ) -> Result<(), EngineError> {
        let Some((plugin, resource)) = self.select(exchange) else {
            // Unmatched requests are still subject to the root policy
            if let Some(plugin) = self.plugins.first() {
                if !security::is_permitted(plugin.root.config(), None, exchange) {
                    return Err(EngineError::SecurityDenial);
                }
            }
            debug!(
                "No resource matched {} {}",
                exchange.request.method, exchange.request.path
            );
            return Err(EngineError::NotFound);
        };

        exchange.set_matched_resource(resource.matcher.describe());
        if !security::is_permitted(plugin.root.config(), Some(resource.config()), exchange) {
            return Err(EngineError::SecurityDenial);
        }

        if exchange.advance(ExchangePhase::RequestDispatched) {
            self.notify(exchange, ExchangePhase::RequestDispatched);
        }

        for interceptor in &plugin.interceptors {
            let Some(params) = interceptor.resource.matcher.matches(exchange) else {
                continue;
            };
            debug!(
                "Running interceptor {} for {}",
                interceptor.resource.matcher.describe(),
                exchange.request.path
            );
            // The selected resource's own parameters take precedence
            for (name, value) in params {
                exchange.request.path_params.entry(name).or_insert(value);
            }
            outcome.track(&interceptor.resource);
            if !interceptor.continue_to_next {
                return self.respond(plugin, &interceptor.resource, exchange).await;
            }
            self.capture_request(&interceptor.resource, exchange).await;
            let request = ResolveRequest {
                resource: interceptor.resource.config(),
                steps: &interceptor.resource.steps,
                inherited: None,
            };
            self.resolver.resolve(request, exchange).await?;
        }

        if let Some(name) = &resource.config().passthrough {
            let upstream = plugin.upstream(name).ok_or_else(|| EngineError::Upstream {
                upstream: name.clone(),
                message: "upstream not declared".into(),
            })?;
            // Passed-through resources still capture from the request
            if !system::is_system_path(&exchange.request.path) {
                outcome.track(resource);
                self.capture_request(resource, exchange).await;
                self.upstreams.forward(name, upstream, exchange).await?;
                return Ok(());
            }
        }

        outcome.track(resource);
        if resource.config().static_dir().is_some() {
            self.capture_request(resource, exchange).await;
            return self.responses.send_static(resource.config(), exchange).await;
        }
        self.respond(plugin, resource, exchange).await
    }

    /// Request-phase captures, step resolution and delivery.
    async fn respond(
        &self,
        plugin: &PreparedPlugin,
        resource: &PreparedResource,
        exchange: &mut HttpExchange,
    ) -> Result<(), EngineError> {
        self.capture_request(resource, exchange).await;
        let request = ResolveRequest {
            resource: resource.config(),
            steps: &resource.steps,
            inherited: plugin.inherited_response(resource),
        };
        let behaviour = self.resolver.resolve(request, exchange).await?;
        self.responses
            .send(resource.config(), exchange, &behaviour)
            .await
    }

    async fn capture_request(&self, resource: &PreparedResource, exchange: &HttpExchange) {
        if resource.captures.is_empty() {
            return;
        }
        let ctx = EvalContext::new(exchange, &self.stores);
        self.captures
            .capture(
                &resource.captures,
                &ctx,
                CapturePhase::RequestReceived,
                BodySource::Request,
            )
            .await;
    }

    /// First plugin with a matching resource wins; otherwise the first
    /// plugin whose root can serve the request. Path parameters of the
    /// selected resource are stored on the request.
    fn select(&self, exchange: &mut HttpExchange) -> Option<(&PreparedPlugin, &PreparedResource)> {
        let (plugin, resource, params) = self
            .plugins
            .iter()
            .find_map(|plugin| plugin.select(exchange).map(|(r, p)| (plugin, r, p)))
            .or_else(|| {
                self.plugins
                    .iter()
                    .find_map(|plugin| plugin.root_fallback(exchange).map(|(r, p)| (plugin, r, p)))
            })?;
        exchange.request.path_params = params;
        Some((plugin, resource))
    }

    fn fail(&self, exchange: &mut HttpExchange, error: EngineError) {
        match &error {
            EngineError::NotFound | EngineError::SecurityDenial => {
                debug!("Request {} ended: {}", exchange.request_id(), error)
            }
            EngineError::Delivery(_) => error!("Request {} failed: {}", exchange.request_id(), error),
            _ => warn!("Request {} failed: {}", exchange.request_id(), error),
        }
        exchange.response = ErrorResponseBuilder::for_error(&error).build();
        exchange.fail(error);
    }

    fn apply_engine_headers(&self, exchange: &mut HttpExchange) {
        if let Ok(value) = HeaderValue::from_str(exchange.request_id()) {
            exchange
                .response
                .headers
                .insert(X_IMPOSTER_REQUEST.clone(), value);
        }
        exchange
            .response
            .headers
            .insert(SERVER, SERVER_VALUE.clone());
    }

    fn notify(&self, exchange: &HttpExchange, phase: ExchangePhase) {
        for listener in &self.listeners {
            listener.on_phase_change(exchange, phase);
        }
    }
}

//! Exchange lifecycle listeners.

use super::{ExchangePhase, HttpExchange};
use crate::store::StoreRegistry;
use std::sync::Arc;
use tracing::{info, warn};

/// Notified on every phase transition of an exchange.
pub trait ExchangeListener: Send + Sync {
    fn on_phase_change(&self, exchange: &HttpExchange, phase: ExchangePhase);
}

/// Removes the request-scoped store once the response has been sent.
pub struct RequestStoreCleanup {
    stores: Arc<StoreRegistry>,
}

impl RequestStoreCleanup {
    pub fn new(stores: Arc<StoreRegistry>) -> Self {
        Self { stores }
    }
}

impl ExchangeListener for RequestStoreCleanup {
    fn on_phase_change(&self, exchange: &HttpExchange, phase: ExchangePhase) {
        if phase == ExchangePhase::ResponseSent {
            self.stores.remove_request_store(exchange.request_id());
        }
    }
}

/// Logs one summary line per completed exchange.
#[derive(Default)]
pub struct ExchangeLogger;

impl ExchangeListener for ExchangeLogger {
    fn on_phase_change(&self, exchange: &HttpExchange, phase: ExchangePhase) {
        if phase != ExchangePhase::ResponseSent {
            return;
        }
        let request = &exchange.request;
        match exchange.failure() {
            Some(error) => warn!(
                request_id = exchange.request_id(),
                method = %request.method,
                path = %request.path,
                status = exchange.response.status.as_u16(),
                duration_ms = exchange.elapsed_ms() as u64,
                "Request failed: {}",
                error
            ),
            None => info!(
                request_id = exchange.request_id(),
                method = %request.method,
                path = %request.path,
                status = exchange.response.status.as_u16(),
                duration_ms = exchange.elapsed_ms() as u64,
                resource = exchange.matched_resource().unwrap_or("-"),
                "Request completed"
            ),
        }
    }
}

//! Scheduling of dispatches onto the connection task or a worker pool.

use super::{DispatchOutcome, Dispatcher};
use crate::config::DispatchMode;
use crate::error::EngineError;
use crate::exchange::{ExchangeRequest, HttpExchange};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs pipelines according to the configured [`DispatchMode`].
///
/// In offloaded mode each request runs as its own task, gated by a
/// semaphore sized to the worker count. Requests are independent, so a slow
/// pipeline never holds back responses to other requests.
#[derive(Clone)]
pub struct DispatchPool {
    dispatcher: Arc<Dispatcher>,
    permits: Option<Arc<Semaphore>>,
}

impl DispatchPool {
    pub fn new(dispatcher: Arc<Dispatcher>, mode: DispatchMode, workers: usize) -> Self {
        let permits = match mode {
            DispatchMode::Inline => None,
            DispatchMode::Offloaded => Some(Arc::new(Semaphore::new(workers.max(1)))),
        };
        Self {
            dispatcher,
            permits,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn run(&self, mut exchange: HttpExchange) -> (HttpExchange, DispatchOutcome) {
        let Some(permits) = &self.permits else {
            let outcome = self.dispatcher.dispatch(&mut exchange).await;
            return (exchange, outcome);
        };

        // Kept so a failed task can still be finalised as this request
        let request_id = exchange.request_id().to_string();
        let request = exchange.request.clone();

        let permit = permits.clone().acquire_owned().await;
        let dispatcher = self.dispatcher.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let outcome = dispatcher.dispatch(&mut exchange).await;
            (exchange, outcome)
        });
        match task.await {
            Ok(result) => result,
            Err(e) => self.recover(request_id, request, format!("dispatch task failed: {e}")),
        }
    }

    /// Replacement exchange for a dispatch whose task did not return.
    fn recover(
        &self,
        request_id: String,
        request: ExchangeRequest,
        message: String,
    ) -> (HttpExchange, DispatchOutcome) {
        let mut exchange = HttpExchange::with_request_id(request_id, request);
        self.dispatcher.fail(&mut exchange, EngineError::Delivery(message));
        (exchange, DispatchOutcome::default())
    }
}

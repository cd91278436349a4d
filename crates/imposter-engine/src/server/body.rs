//! Response body that finalises its exchange once delivered.

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::exchange::HttpExchange;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Frame, SizeHint};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::warn;

struct Pending {
    dispatcher: Arc<Dispatcher>,
    exchange: HttpExchange,
    outcome: DispatchOutcome,
}

/// Wraps a buffered body. When the last frame has been handed to the
/// connection, or the body is dropped early, [`Dispatcher::complete`] runs for
/// the exchange that produced it.
pub struct CompletionBody {
    inner: Full<Bytes>,
    pending: Option<Pending>,
}

impl CompletionBody {
    /// A body with nothing to finalise.
    pub fn plain(inner: Full<Bytes>) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    pub fn for_exchange(
        dispatcher: Arc<Dispatcher>,
        exchange: HttpExchange,
        outcome: DispatchOutcome,
    ) -> Self {
        let body = exchange.response.body.clone();
        Self {
            inner: Full::new(body),
            pending: Some(Pending {
                dispatcher,
                exchange,
                outcome,
            }),
        }
    }

    fn finish(&mut self) {
        let Some(Pending {
            dispatcher,
            mut exchange,
            outcome,
        }) = self.pending.take()
        else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { dispatcher.complete(&mut exchange, outcome).await });
            }
            Err(_) => warn!(
                "No runtime to finalise request {}; listeners not notified",
                exchange.request_id()
            ),
        }
    }
}

impl Body for CompletionBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(None) = polled {
            this.finish();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CompletionBody {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, PluginConfig};
    use crate::exchange::test_support::exchange;
    use crate::exchange::{ExchangeListener, ExchangePhase};
    use http_body_util::BodyExt;
    use hyper::Method;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ExchangePhase>>);

    impl ExchangeListener for Recorder {
        fn on_phase_change(&self, _exchange: &HttpExchange, phase: ExchangePhase) {
            self.0.lock().push(phase);
        }
    }

    async fn dispatched(recorder: Arc<Recorder>) -> CompletionBody {
        let config = PluginConfig::parse(
            Path::new("/cfg/test-config.yaml"),
            "resources:\n  - path: /a\n    response:\n      content: hello",
        )
        .unwrap();
        let mut dispatcher = Dispatcher::build(&[config], &EngineSettings::default()).unwrap();
        dispatcher.add_listener(recorder);
        let dispatcher = Arc::new(dispatcher);

        let mut ex = exchange(Method::GET, "/a", "");
        let outcome = dispatcher.dispatch(&mut ex).await;
        CompletionBody::for_exchange(dispatcher, ex, outcome)
    }

    async fn wait_for_sent(recorder: &Recorder) -> bool {
        for _ in 0..50 {
            if recorder.0.lock().contains(&ExchangePhase::ResponseSent) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_completes_after_body_is_read() {
        let recorder = Arc::new(Recorder::default());
        let body = dispatched(recorder.clone()).await;
        assert!(!recorder.0.lock().contains(&ExchangePhase::ResponseSent));

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
        assert!(wait_for_sent(&recorder).await);
    }

    #[tokio::test]
    async fn test_exchange_keeps_response_body() {
        let recorder = Arc::new(Recorder::default());
        let body = dispatched(recorder).await;
        let pending = body.pending.as_ref().unwrap();
        assert_eq!(pending.exchange.response.body_text(), "hello");
    }

    #[tokio::test]
    async fn test_completes_when_dropped() {
        let recorder = Arc::new(Recorder::default());
        drop(dispatched(recorder.clone()).await);
        assert!(wait_for_sent(&recorder).await);
        let sent = recorder
            .0
            .lock()
            .iter()
            .filter(|p| **p == ExchangePhase::ResponseSent)
            .count();
        assert_eq!(sent, 1);
    }
}

//! HTTP/1 server that feeds requests into the dispatch pipeline.
//!
//! Each connection is served on its own task. Requests under `/system` go to
//! the store API; everything else becomes an [`HttpExchange`] and runs through
//! the [`DispatchPool`]. An exchange that asks for its connection to be closed
//! gets no response at all.

mod body;

pub use body::CompletionBody;

use crate::config::{EngineSettings, PluginConfig};
use crate::dispatch::{DispatchOutcome, DispatchPool, Dispatcher};
use crate::exchange::headers::SERVER_VALUE;
use crate::exchange::{ExchangeRequest, HttpExchange};
use crate::system::{self, types::error_response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct ImposterServer {
    listener: TcpListener,
    pool: DispatchPool,
}

impl ImposterServer {
    /// Compile the plugin configurations and bind the listening socket.
    pub async fn build(
        configs: &[PluginConfig],
        settings: &EngineSettings,
    ) -> Result<Self, anyhow::Error> {
        let dispatcher = Dispatcher::build(configs, settings)?;
        let pool = DispatchPool::new(Arc::new(dispatcher), settings.dispatch_mode, settings.workers);
        Ok(Self::bind(settings.listen, pool).await?)
    }

    pub async fn bind(addr: SocketAddr, pool: DispatchPool) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, pool })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.pool.dispatcher()
    }

    /// Serve until the accept loop fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        info!("Imposter engine listening on http://{}", self.local_addr()?);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let io = TokioIo::new(stream);
            let pool = self.pool.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let pool = pool.clone();
                    async move { handle(req, pool).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection from {} closed: {}", peer, e);
                }
            });
        }
    }
}

async fn handle(req: Request<Incoming>, pool: DispatchPool) -> io::Result<Response<CompletionBody>> {
    let dispatcher = pool.dispatcher().clone();

    if system::is_system_path(req.uri().path()) {
        let mut response = system::route_request(req, dispatcher.stores()).await;
        if dispatcher.add_engine_headers() {
            response.headers_mut().insert(SERVER, SERVER_VALUE.clone());
        }
        return Ok(response.map(CompletionBody::plain));
    }

    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let message = format!("Failed to read request body: {e}");
            let response = error_response(StatusCode::BAD_REQUEST, &message);
            return Ok(response.map(CompletionBody::plain));
        }
    };

    let exchange = HttpExchange::new(ExchangeRequest::new(
        parts.method,
        &path_and_query,
        parts.headers,
        body,
    ));
    let (exchange, outcome) = pool.run(exchange).await;

    if exchange.should_close_connection() {
        debug!("Closing connection for request {}", exchange.request_id());
        let request_id = exchange.request_id().to_string();
        // Dropping the body finalises the exchange
        drop(CompletionBody::for_exchange(dispatcher, exchange, outcome));
        return Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("connection closed by request {}", request_id),
        ));
    }

    Ok(into_response(dispatcher, exchange, outcome))
}

fn into_response(
    dispatcher: Arc<Dispatcher>,
    exchange: HttpExchange,
    outcome: DispatchOutcome,
) -> Response<CompletionBody> {
    // The exchange keeps its response for response-phase captures
    let status = exchange.response.status;
    let mut headers = exchange.response.headers.clone();
    // Recomputed from the final body
    headers.remove(CONTENT_LENGTH);

    let mut response = Response::new(CompletionBody::for_exchange(dispatcher, exchange, outcome));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

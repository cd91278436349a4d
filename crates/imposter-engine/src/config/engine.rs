//! Engine-level settings that are not part of any plugin configuration.

use std::net::SocketAddr;

/// Capacity of the deferred background queue.
pub const DEFAULT_DEFERRED_QUEUE_CAPACITY: usize = 512;

/// How the request pipeline is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DispatchMode {
    /// Run the pipeline directly on the connection task.
    #[default]
    Inline,
    /// Run the pipeline on a bounded pool of worker tasks. Responses are not
    /// ordered relative to each other.
    Offloaded,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub listen: SocketAddr,
    pub dispatch_mode: DispatchMode,
    /// Upper bound on concurrently executing pipelines in offloaded mode
    pub workers: usize,
    /// Add `X-Imposter-Request` and `Server` headers to every response
    pub add_engine_headers: bool,
    pub deferred_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            dispatch_mode: DispatchMode::Inline,
            workers: 64,
            add_engine_headers: true,
            deferred_queue_capacity: DEFAULT_DEFERRED_QUEUE_CAPACITY,
        }
    }
}

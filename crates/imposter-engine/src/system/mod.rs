//! The `/system` HTTP surface: store REST API and engine status.

mod handlers;
mod router;
pub mod types;

pub use router::route_request;

/// Requests under this prefix are answered by [`route_request`].
pub const SYSTEM_PREFIX: &str = "/system";

/// Whether `path` belongs to the system surface.
pub fn is_system_path(path: &str) -> bool {
    path == SYSTEM_PREFIX || path.starts_with(crate::upstream::SYSTEM_PATH_PREFIX)
}

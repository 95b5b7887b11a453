//! Proxy error types.

use thiserror::Error;

use mtlsproxy_transport::TransportError;

/// Errors surfaced by the instance command surface.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("instance event loop stopped")]
    Stopped,
}

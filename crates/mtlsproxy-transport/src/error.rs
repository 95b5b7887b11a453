//! Error types for the transport crate.

use thiserror::Error;
use tokio_rustls::rustls;

/// Errors that can occur building TLS configurations or opening sockets.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),
}

//! Configuration error types.

use std::io;

use thiserror::Error;

/// Errors producing a profile snapshot or process settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory {path}: {source}")]
    Dir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("reading configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("decoding configuration {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid boolean {value:?} for {name}")]
    Bool { name: String, value: String },
}

/// A credential file could not be read.
#[derive(Debug, Error)]
#[error("reading file {path:?}: {source}")]
pub struct CredentialError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

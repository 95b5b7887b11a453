//! Profile configuration for mtlsproxy.
//!
//! Profiles arrive from two places: `MTLSPROXY_PROFILE_*` environment
//! variables (captured once at startup) and TOML documents in the config
//! directory (re-read on every snapshot). Same-name profiles are merged
//! under a "first non-empty field wins" rule, which makes environment
//! variables authoritative over files and earlier files authoritative
//! over later ones.

pub mod cli;
mod env;
pub mod error;
pub mod profile;
pub mod source;

pub use cli::{Args, Settings};
pub use error::{ConfigError, CredentialError};
pub use profile::{Profile, merge_profiles};
pub use source::ConfigSource;

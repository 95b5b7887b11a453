//! Command-line flags and their environment fallbacks.

use clap::Parser;

use crate::error::ConfigError;

/// mtlsproxy command-line arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mtlsproxy", version, about = "Multi-profile mTLS TCP proxy")]
pub struct Args {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
    /// Directory for config files
    #[arg(long, default_value = "")]
    pub configdir: String,
}

/// Immutable process-level settings. Flags take precedence; the
/// `MTLSPROXY_DEBUG` and `MTLSPROXY_CONFIG_DIR` variables are consulted
/// only for values the flags did not set.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub config_dir: String,
}

impl Settings {
    /// Parse the process arguments and apply environment fallbacks.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let mut debug = args.debug;
        if !debug {
            if let Ok(value) = std::env::var("MTLSPROXY_DEBUG") {
                if !value.is_empty() {
                    debug = parse_bool(&value).ok_or_else(|| ConfigError::Bool {
                        name: "MTLSPROXY_DEBUG".to_string(),
                        value,
                    })?;
                }
            }
        }

        let mut config_dir = args.configdir;
        if config_dir.is_empty() {
            if let Ok(value) = std::env::var("MTLSPROXY_CONFIG_DIR") {
                config_dir = value;
            }
        }

        Ok(Self { debug, config_dir })
    }
}

/// Boolean forms accepted by the environment switches.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

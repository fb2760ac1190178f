use std::env;
use std::time::Duration;

use crate::error::RrpError;

/// Environment variable holding the listener address (host:port).
pub const BIND_ENV: &str = "RRP_BIND";

/// Timeout applied to every request in a batch when the outer request does
/// not carry an `x-rrp-timeout` header.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Chunk size used when buffering upstream response bodies.
pub const BODY_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct RrpConfig {
    pub bind: String,
}

impl RrpConfig {
    /// Read the configuration from the environment. `RRP_BIND` is the only
    /// setting and it is required; a missing or empty value is a fatal
    /// startup error.
    pub fn from_env() -> Result<Self, RrpError> {
        match env::var(BIND_ENV) {
            Ok(bind) if !bind.trim().is_empty() => Ok(Self { bind }),
            _ => Err(RrpError::Config(format!(
                "{BIND_ENV} must be set to the listener address (host:port)"
            ))),
        }
    }
}

//! Coarse error taxonomy surfaced by lifecycle calls.
//!
//! `start`/`connect` return `Result<(), Error>`; `stop`/`destroy` never fail by
//! signature (they swallow and log their own sub-errors at `warn`).

use std::io;

/// Errors the core can surface. Variants intentionally stay coarse: callers
/// only need to distinguish the failure domain, not drill into bridge stdout.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("agent artifact unavailable: {0}")]
    Config(String),

    #[error("bridge command `{label}` failed")]
    Bridge { label: &'static str },

    #[error("no port in the configured range could be bound or forwarded")]
    Tunnel,

    #[error("agent process could not be started or exited before connect completed")]
    Process,

    #[error("network operation failed: {0}")]
    Network(#[from] io::Error),

    #[error("watchdog deadline exceeded waiting for agent exit")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;

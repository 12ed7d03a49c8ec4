//! Bootstrap and transport-establishment core for a remote-display mirroring
//! client: deploys the device-side agent, negotiates a transport path, and
//! hands the caller two ordered byte streams (video, then control).
//!
//! This crate owns *how the two endpoints meet* — it does not decode video,
//! encode input events, parse configuration, or pick the agent artifact's
//! on-disk location beyond the resolution order in [`agent_path`].

pub mod agent_path;
pub mod bridge;
pub mod error;
pub mod http_ctl;
pub mod net;
pub mod params;
pub mod server;
pub mod tunnel;
pub mod watchdog;

pub use bridge::{AgentProcess, Bridge, ChildProcess, CommandBridge};
pub use error::{Error, Result};
pub use params::{LogLevel, PortRange, ServerParams, TransportMode};
pub use server::{Server, Target};

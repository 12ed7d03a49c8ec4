//! Command-line interface definitions for the demo binary.
//!
//! This module contains the `clap`-powered CLI surface area (args + defaults)
//! and the small amount of glue that turns them into `screenmirror_core`
//! types. It intentionally has no session logic.

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use clap::Parser;

use screenmirror_core::params::{LogLevel, PortRange};
use screenmirror_core::server::Target;
use screenmirror_core::ServerParams;

#[derive(Parser, Debug)]
#[command(name = "screenmirror-demo")]
pub struct Args {
    /// Bridge device serial (omit to use the bridge's only attached device)
    #[arg(long)]
    pub serial: Option<String>,

    /// Connect directly to an already-running agent at this IPv4 address
    /// instead of deploying one over the bridge
    #[arg(long, conflicts_with = "serial")]
    pub direct_addr: Option<Ipv4Addr>,

    /// Base URL for the direct agent's HTTP control endpoint
    #[arg(long, requires = "direct_addr")]
    pub direct_url: Option<String>,

    /// First local port to try when negotiating a tunnel (or the remote port
    /// in direct mode)
    #[arg(long, default_value_t = 27183)]
    pub port_first: u16,

    /// Last local port to try when negotiating a tunnel
    #[arg(long, default_value_t = 27199)]
    pub port_last: u16,

    /// Skip the reverse-tunnel attempt and go straight to forward
    #[arg(long)]
    pub force_adb_forward: bool,

    /// Agent-side log verbosity
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Max video dimension in pixels (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_size: u16,

    /// Video bit rate in bits/second
    #[arg(long, default_value_t = 8_000_000)]
    pub bit_rate: u32,

    /// Max frames per second (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_fps: u16,

    /// Disable the control socket (video only)
    #[arg(long)]
    pub no_control: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn to_server_params(&self) -> ServerParams {
        ServerParams {
            log_level: parse_log_level(&self.log_level),
            max_size: self.max_size,
            bit_rate: self.bit_rate,
            max_fps: self.max_fps,
            control: !self.no_control,
            port_range: PortRange::new(self.port_first, self.port_last),
            force_adb_forward: self.force_adb_forward,
            ..ServerParams::default()
        }
    }

    pub fn to_target(&self) -> Result<Target> {
        match self.direct_addr {
            Some(addr) => {
                let url = self
                    .direct_url
                    .clone()
                    .context("--direct-url is required alongside --direct-addr")?;
                Ok(Target::Direct { url, addr })
            }
            None => Ok(Target::Device {
                serial: self.serial.clone(),
            }),
        }
    }
}

fn parse_log_level(value: &str) -> LogLevel {
    match value {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

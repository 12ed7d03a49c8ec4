//! Data model: port ranges, server parameters, and the transport-mode tag.

use std::net::Ipv4Addr;

/// Remote socket name the bridge's reverse/forward tunnel is registered under.
pub const SOCKET_NAME: &str = "scrcpy";

/// Loopback address used for all non-direct connections.
pub const LOOPBACK_V4: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Agent protocol version sent as the first launch argument.
pub const AGENT_VERSION: &str = "1.0";

/// Env var overriding the resolved agent artifact path.
pub const AGENT_PATH_ENV: &str = "SCRCPY_SERVER_PATH";

/// Fixed install location checked after the env override.
pub const AGENT_INSTALL_PATH: &str = "/usr/local/share/scrcpy/scrcpy-server.jar";

/// Bare filename used as the last-resort fallback.
pub const AGENT_FILENAME: &str = "scrcpy-server.jar";

/// Device path the agent artifact is pushed to before being executed.
pub const AGENT_DEVICE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

/// Reverse/forward retry tuning (attempts, delay).
pub const TUNNEL_CONNECT_RETRY: (u32, u64) = (100, 100);
pub const DIRECT_CONNECT_RETRY: (u32, u64) = (12, 1000);

/// A closed `[first, last]` inclusive port interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    /// Builds a range, swapping endpoints if given out of order.
    pub fn new(first: u16, last: u16) -> Self {
        if first <= last {
            Self { first, last }
        } else {
            Self {
                first: last,
                last: first,
            }
        }
    }

    /// A single-port range.
    pub fn single(port: u16) -> Self {
        Self {
            first: port,
            last: port,
        }
    }
}

/// The device-side agent's log verbosity, distinct from the host's `tracing` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Immutable options for a single mirroring session.
///
/// Optional strings serialize as `"-"` when absent, matching the agent's argv
/// and the direct-mode HTTP path convention.
#[derive(Debug, Clone)]
pub struct ServerParams {
    pub log_level: LogLevel,
    pub max_size: u16,
    pub bit_rate: u32,
    pub max_fps: u16,
    pub lock_video_orientation: i8,
    pub display_id: u16,
    pub crop: Option<String>,
    pub control: bool,
    pub show_touches: bool,
    pub stay_awake: bool,
    pub codec_options: Option<String>,
    pub encoder_name: Option<String>,
    pub port_range: PortRange,
    pub force_adb_forward: bool,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            max_size: 0,
            bit_rate: 8_000_000,
            max_fps: 0,
            lock_video_orientation: -1,
            display_id: 0,
            crop: None,
            control: true,
            show_touches: false,
            stay_awake: false,
            codec_options: None,
            encoder_name: None,
            port_range: PortRange::new(27183, 27199),
            force_adb_forward: false,
        }
    }
}

/// Renders an optional string as its value, or `"-"` when absent.
pub(crate) fn opt_or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

impl ServerParams {
    /// Builds the positional agent launch argv (§6), in exact order.
    ///
    /// `tunnel_forward` must be `"true"` iff the client connects into a
    /// forward tunnel, `"false"` for reverse tunnels and direct mode's own
    /// start call (the HTTP path forces it to `"true"` separately).
    pub fn agent_argv(&self, tunnel_forward: bool) -> Vec<String> {
        vec![
            AGENT_VERSION.to_string(),
            self.log_level.as_str().to_string(),
            self.max_size.to_string(),
            self.bit_rate.to_string(),
            self.max_fps.to_string(),
            self.lock_video_orientation.to_string(),
            tunnel_forward.to_string(),
            opt_or_dash(&self.crop).to_string(),
            "true".to_string(),
            self.control.to_string(),
            self.display_id.to_string(),
            self.show_touches.to_string(),
            self.stay_awake.to_string(),
            opt_or_dash(&self.codec_options).to_string(),
            opt_or_dash(&self.encoder_name).to_string(),
        ]
    }

    /// Builds the direct-mode HTTP path segments. Same positional layout as
    /// `agent_argv`, with the tunnel flag forced to `"true"`.
    pub fn http_path_segments(&self) -> Vec<String> {
        self.agent_argv(true)
    }
}

/// Which strategy was used to wire the client to the agent's well-known socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Agent connects into a bridge reverse tunnel; client `accept`s.
    Reverse,
    /// Client connects through a bridge forward tunnel; agent `accept`s on device.
    Forward,
    /// Agent reached directly by IP; no bridge involved.
    Direct,
}

impl TransportMode {
    pub fn is_direct(self) -> bool {
        matches!(self, TransportMode::Direct)
    }

    pub fn tunnel_forward_flag(self) -> bool {
        matches!(self, TransportMode::Forward)
    }
}

//! Strategy cascade that binds a local port and wires it to the remote
//! agent's well-known socket name (§4.4).

use std::net::TcpListener;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bridge::{log_teardown_failure, Bridge};
use crate::error::{Error, Result};
use crate::net;
use crate::params::{PortRange, TransportMode, LOOPBACK_V4, SOCKET_NAME};

/// Outcome of a successful [`establish`]: the chosen mode, the local port it
/// bound or forwarded to, and — reverse mode only — the bound listener.
pub struct Established {
    pub mode: TransportMode,
    pub local_port: u16,
    pub listener: Option<TcpListener>,
}

/// Runs the reverse-then-forward cascade described in §4.4.
pub fn establish(
    bridge: &dyn Bridge,
    serial: Option<&str>,
    port_range: PortRange,
    force_forward: bool,
) -> Result<Established> {
    if !force_forward {
        match establish_reverse(bridge, serial, port_range) {
            Ok(established) => return Ok(established),
            Err(err) => {
                debug!(%err, "reverse tunnel unusable, falling back to forward");
            }
        }
    }
    establish_forward(bridge, serial, port_range)
}

/// Reverse probe loop (§4.4): the device connects in, we `accept`.
fn establish_reverse(
    bridge: &dyn Bridge,
    serial: Option<&str>,
    port_range: PortRange,
) -> Result<Established> {
    let mut port = port_range.first;
    let mut is_first_port = true;
    loop {
        match bridge.reverse(serial, SOCKET_NAME, port) {
            Ok(true) => {}
            // The command itself is unwinnable on the very first attempt:
            // no point sweeping the whole range.
            _ if is_first_port => return Err(Error::Tunnel),
            _ => {
                if port < port_range.last {
                    port += 1;
                    continue;
                }
                return Err(Error::Tunnel);
            }
        }
        is_first_port = false;

        match net::listen(LOOPBACK_V4, port) {
            Ok(listener) => {
                info!(port, "reverse tunnel established");
                return Ok(Established {
                    mode: TransportMode::Reverse,
                    local_port: port,
                    listener: Some(listener),
                });
            }
            Err(err) => {
                debug!(port, %err, "listen failed, retracting reverse tunnel");
                log_teardown_failure(
                    "reverse_remove",
                    bridge.reverse_remove(serial, SOCKET_NAME),
                );
                if port < port_range.last {
                    port += 1;
                } else {
                    return Err(Error::Tunnel);
                }
            }
        }
    }
}

/// Forward probe loop (§4.4): we `connect` in, the device `accept`s.
fn establish_forward(
    bridge: &dyn Bridge,
    serial: Option<&str>,
    port_range: PortRange,
) -> Result<Established> {
    let mut port = port_range.first;
    loop {
        match bridge.forward(serial, port, SOCKET_NAME) {
            Ok(true) => {
                info!(port, "forward tunnel established");
                return Ok(Established {
                    mode: TransportMode::Forward,
                    local_port: port,
                    listener: None,
                });
            }
            _ => {
                if port < port_range.last {
                    port += 1;
                } else {
                    return Err(Error::Tunnel);
                }
            }
        }
    }
}

/// Tears down whichever tunnel is active. Best-effort: failures are logged,
/// never propagated (§4.4 `disable`).
pub fn disable(bridge: &dyn Bridge, serial: Option<&str>, mode: TransportMode, local_port: u16) {
    match mode {
        TransportMode::Reverse => {
            log_teardown_failure("reverse_remove", bridge.reverse_remove(serial, SOCKET_NAME));
        }
        TransportMode::Forward => {
            log_teardown_failure(
                "forward_remove",
                bridge.forward_remove(serial, local_port),
            );
        }
        TransportMode::Direct => {}
    }
}

/// Used by [`crate::server::Server`] to share the reverse-mode listener with
/// the watchdog.
pub type SharedListener = Arc<std::sync::Mutex<Option<TcpListener>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeBridge {
        reverse_calls: Mutex<Vec<u16>>,
        reverse_remove_calls: AtomicUsize,
        forward_calls: Mutex<Vec<u16>>,
        forward_remove_calls: AtomicUsize,
        reverse_fails_first_command: bool,
        busy_ports: Vec<u16>,
    }

    impl FakeBridge {
        fn new() -> Self {
            Self {
                reverse_calls: Mutex::new(Vec::new()),
                reverse_remove_calls: AtomicUsize::new(0),
                forward_calls: Mutex::new(Vec::new()),
                forward_remove_calls: AtomicUsize::new(0),
                reverse_fails_first_command: false,
                busy_ports: Vec::new(),
            }
        }
    }

    impl Bridge for FakeBridge {
        fn push(&self, _: Option<&str>, _: &std::path::Path, _: &str) -> Result<bool> {
            Ok(true)
        }

        fn reverse(&self, _: Option<&str>, _: &str, local_port: u16) -> Result<bool> {
            self.reverse_calls.lock().unwrap().push(local_port);
            if self.reverse_fails_first_command {
                return Ok(false);
            }
            Ok(true)
        }

        fn reverse_remove(&self, _: Option<&str>, _: &str) -> Result<bool> {
            self.reverse_remove_calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn forward(&self, _: Option<&str>, local_port: u16, _: &str) -> Result<bool> {
            self.forward_calls.lock().unwrap().push(local_port);
            Ok(!self.busy_ports.contains(&local_port))
        }

        fn forward_remove(&self, _: Option<&str>, _: u16) -> Result<bool> {
            self.forward_remove_calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        fn exec_agent(
            &self,
            _: Option<&str>,
            _: &crate::params::ServerParams,
            _: bool,
        ) -> Result<Arc<dyn crate::bridge::AgentProcess>> {
            unimplemented!("not needed for tunnel tests")
        }
    }

    fn occupy_port(port: u16) -> std::net::TcpListener {
        net::listen(LOOPBACK_V4, port).expect("bind busy port for test")
    }

    #[test]
    fn reverse_happy_path_first_port() {
        let bridge = FakeBridge::new();
        let range = PortRange::new(27183, 27199);
        let established = establish(&bridge, None, range, false).unwrap();
        assert_eq!(established.mode, TransportMode::Reverse);
        assert_eq!(established.local_port, 27183);
        assert!(established.listener.is_some());
        assert_eq!(bridge.reverse_remove_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reverse_busy_ports_cascade_to_third() {
        let _hold_a = occupy_port(27183);
        let _hold_b = occupy_port(27184);
        let bridge = FakeBridge::new();
        let range = PortRange::new(27183, 27199);
        let established = establish(&bridge, None, range, false).unwrap();
        assert_eq!(established.local_port, 27185);
        assert_eq!(bridge.reverse_remove_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reverse_unusable_falls_back_to_forward_immediately() {
        let mut bridge = FakeBridge::new();
        bridge.reverse_fails_first_command = true;
        let range = PortRange::new(27183, 27199);
        let established = establish(&bridge, None, range, false).unwrap();
        assert_eq!(established.mode, TransportMode::Forward);
        assert_eq!(established.local_port, 27183);
        // No port sweep on reverse: exactly one attempt.
        assert_eq!(bridge.reverse_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn port_65535_boundary_no_overflow() {
        let _hold = occupy_port(65535);
        let bridge = FakeBridge::new();
        let range = PortRange::single(65535);
        let result = establish(&bridge, None, range, false);
        assert!(result.is_err());
        assert_eq!(bridge.reverse_calls.lock().unwrap().len(), 1);
        assert_eq!(bridge.reverse_remove_calls.load(Ordering::SeqCst), 1);
    }
}

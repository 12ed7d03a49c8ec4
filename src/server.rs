//! Lifecycle orchestrator (§4.6): owns every sub-resource and drives the
//! start/connect/stop state machine described in §3.

use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use scopeguard::{guard, ScopeGuard};
use tracing::warn;

use crate::agent_path;
use crate::bridge::{AgentProcess, Bridge};
use crate::error::{Error, Result};
use crate::http_ctl;
use crate::net::{self, CloseOnce};
use crate::params::{
    ServerParams, TransportMode, AGENT_DEVICE_PATH, DIRECT_CONNECT_RETRY, LOOPBACK_V4,
    TUNNEL_CONNECT_RETRY,
};
use crate::tunnel;
use crate::watchdog::{self, TerminatedSignal};

/// Which endpoint `start` connects to: a bridge-attached device, or a
/// directly reachable agent (§3 "identity").
pub enum Target {
    Device { serial: Option<String> },
    Direct { url: String, addr: Ipv4Addr },
}

/// Single mirroring session. One `Server` per device/session; not `Clone`.
pub struct Server {
    bridge: Arc<dyn Bridge>,

    serial: Option<String>,
    url: Option<String>,
    addr: Option<Ipv4Addr>,
    params: Option<ServerParams>,
    mode: Option<TransportMode>,
    local_port: u16,
    tunnel_active: bool,
    started: bool,

    agent_process: Option<Arc<dyn AgentProcess>>,
    watchdog_thread: Option<JoinHandle<()>>,
    terminated: TerminatedSignal,
    stop_requested: Arc<AtomicBool>,

    listen_slot: Arc<Mutex<Option<TcpListener>>>,
    close_once: Arc<CloseOnce>,

    video_sock: Option<TcpStream>,
    control_sock: Option<TcpStream>,
}

impl Server {
    /// `init` (§3): allocates synchronization primitives and zeroes state.
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        Self {
            bridge,
            serial: None,
            url: None,
            addr: None,
            params: None,
            mode: None,
            local_port: 0,
            tunnel_active: false,
            started: false,
            agent_process: None,
            watchdog_thread: None,
            terminated: Arc::new((Mutex::new(false), Condvar::new())),
            stop_requested: Arc::new(AtomicBool::new(false)),
            listen_slot: Arc::new(Mutex::new(None)),
            close_once: Arc::new(CloseOnce::new()),
            video_sock: None,
            control_sock: None,
        }
    }

    pub fn mode(&self) -> Option<TransportMode> {
        self.mode
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn tunnel_active(&self) -> bool {
        self.tunnel_active
    }

    /// `start` (§4.6): transactional, with reverse-unwind on every failure.
    pub fn start(&mut self, target: Target, params: ServerParams) -> Result<()> {
        self.terminated = Arc::new((Mutex::new(false), Condvar::new()));
        self.stop_requested = Arc::new(AtomicBool::new(false));
        self.listen_slot = Arc::new(Mutex::new(None));
        self.close_once = Arc::new(CloseOnce::new());
        self.video_sock = None;
        self.control_sock = None;
        self.agent_process = None;
        self.watchdog_thread = None;
        self.tunnel_active = false;
        self.local_port = 0;
        self.started = false;
        self.params = Some(params.clone());

        let result = match target {
            Target::Device { serial } => self.start_device(serial, params),
            Target::Direct { url, addr } => self.start_direct(url, addr, params),
        };

        self.started = result.is_ok();
        result
    }

    fn start_device(&mut self, serial: Option<String>, params: ServerParams) -> Result<()> {
        self.serial = serial.clone();

        let local_path = agent_path::resolve_existing()?;
        if !self.bridge.push(serial.as_deref(), &local_path, AGENT_DEVICE_PATH)? {
            return Err(Error::Bridge { label: "push" });
        }

        let established = tunnel::establish(
            self.bridge.as_ref(),
            serial.as_deref(),
            params.port_range,
            params.force_adb_forward,
        )?;
        self.mode = Some(established.mode);
        self.local_port = established.local_port;
        if let Some(listener) = established.listener {
            *self.listen_slot.lock().unwrap() = Some(listener);
        }

        // Tears the tunnel back down unless dismissed once the agent is up.
        let tunnel_guard = {
            let listen_slot = self.listen_slot.clone();
            let close_once = self.close_once.clone();
            let bridge = self.bridge.clone();
            let mode = established.mode;
            let local_port = established.local_port;
            let serial = serial.clone();
            guard((), move |_| {
                if mode == TransportMode::Reverse {
                    close_once.try_close(&listen_slot);
                }
                tunnel::disable(bridge.as_ref(), serial.as_deref(), mode, local_port);
            })
        };

        let tunnel_forward = established.mode.tunnel_forward_flag();
        let agent = self
            .bridge
            .exec_agent(serial.as_deref(), &params, tunnel_forward)?;
        self.agent_process = Some(agent.clone());

        // Tears the agent process back down unless dismissed once the
        // watchdog is running.
        let agent_guard = {
            let agent = agent.clone();
            guard((), move |_| {
                let _ = agent.terminate();
                let _ = agent.wait();
            })
        };

        let handle = watchdog::spawn(
            agent,
            self.terminated.clone(),
            self.listen_slot.clone(),
            self.close_once.clone(),
        )
        .map_err(|_| Error::Process)?;
        self.watchdog_thread = Some(handle);

        ScopeGuard::into_inner(agent_guard);
        ScopeGuard::into_inner(tunnel_guard);

        self.tunnel_active = true;
        Ok(())
    }

    fn start_direct(&mut self, url: String, addr: Ipv4Addr, params: ServerParams) -> Result<()> {
        self.url = Some(url.clone());
        self.addr = Some(addr);
        self.mode = Some(TransportMode::Direct);
        self.local_port = params.port_range.first;

        http_ctl::start(&url, &params)?;

        // Belt-and-braces: if anything after this fails, undo the remote start.
        let http_guard = {
            let url = url.clone();
            guard((), move |_| {
                if let Err(err) = http_ctl::stop(&url) {
                    warn!(%err, "belt-and-braces stop after failed direct start");
                }
            })
        };

        let handle = watchdog::spawn_direct_keepalive(
            addr,
            params.port_range.first,
            self.terminated.clone(),
            self.stop_requested.clone(),
        )
        .map_err(|_| Error::Process)?;
        self.watchdog_thread = Some(handle);

        ScopeGuard::into_inner(http_guard);

        self.tunnel_active = false;
        Ok(())
    }

    /// `connect` (§4.6): materializes the two data sockets, video before
    /// control (I6), and returns independent handles for the consumer while
    /// `Server` retains its own for `stop` to close.
    pub fn connect(&mut self) -> Result<(TcpStream, TcpStream)> {
        let mode = self.mode.ok_or(Error::Process)?;
        match mode {
            TransportMode::Direct => self.connect_direct()?,
            TransportMode::Forward => self.connect_forward()?,
            TransportMode::Reverse => self.connect_reverse()?,
        }

        let video = self
            .video_sock
            .as_ref()
            .expect("video_sock set by the mode-specific connect path")
            .try_clone()
            .map_err(Error::Network)?;
        let control = self
            .control_sock
            .as_ref()
            .expect("control_sock set by the mode-specific connect path")
            .try_clone()
            .map_err(Error::Network)?;
        Ok((video, control))
    }

    fn connect_direct(&mut self) -> Result<()> {
        let addr = self
            .addr
            .ok_or_else(|| Error::Config("direct mode requires an address".to_string()))?;
        let port = self
            .params
            .as_ref()
            .expect("params set by start")
            .port_range
            .first;
        let (attempts, delay_ms) = DIRECT_CONNECT_RETRY;

        let video = net::connect_with_retry(addr, port, attempts, delay_ms).map_err(Error::Network)?;
        self.video_sock = Some(video);
        let control = net::connect(addr, port).map_err(Error::Network)?;
        self.control_sock = Some(control);
        Ok(())
    }

    fn connect_forward(&mut self) -> Result<()> {
        let (attempts, delay_ms) = TUNNEL_CONNECT_RETRY;

        let video = net::connect_with_retry(LOOPBACK_V4, self.local_port, attempts, delay_ms)
            .map_err(Error::Network)?;
        self.video_sock = Some(video);
        let control = net::connect(LOOPBACK_V4, self.local_port).map_err(Error::Network)?;
        self.control_sock = Some(control);

        tunnel::disable(
            self.bridge.as_ref(),
            self.serial.as_deref(),
            TransportMode::Forward,
            self.local_port,
        );
        self.tunnel_active = false;
        Ok(())
    }

    fn connect_reverse(&mut self) -> Result<()> {
        let listener = {
            let guard = self.listen_slot.lock().unwrap();
            match guard.as_ref() {
                Some(listener) => listener.try_clone().map_err(Error::Network)?,
                None => {
                    return Err(Error::Network(std::io::Error::other(
                        "listen socket already closed",
                    )))
                }
            }
        };

        let video = net::accept(&listener).map_err(Error::Network)?;
        self.video_sock = Some(video);
        let control = net::accept(&listener).map_err(Error::Network)?;
        self.control_sock = Some(control);

        self.close_once.try_close(&self.listen_slot);
        Ok(())
    }

    /// `stop` (§4.6): best-effort, never fails by signature; every sub-error
    /// is logged at `warn` and swallowed (§7).
    pub fn stop(&mut self) {
        self.close_once.try_close(&self.listen_slot);

        if let Some(stream) = self.video_sock.take() {
            net::shutdown_stream(stream);
        }
        if let Some(stream) = self.control_sock.take() {
            net::shutdown_stream(stream);
        }

        if self.tunnel_active {
            if let Some(mode) = self.mode {
                if mode != TransportMode::Direct {
                    tunnel::disable(self.bridge.as_ref(), self.serial.as_deref(), mode, self.local_port);
                }
            }
            self.tunnel_active = false;
        }

        if self.mode == Some(TransportMode::Direct) {
            if let Some(url) = self.url.take() {
                if let Err(err) = http_ctl::stop(&url) {
                    warn!(%err, "direct-mode stop GET failed");
                }
            }
        }

        if !self.started {
            return;
        }

        self.stop_requested.store(true, Ordering::SeqCst);

        let (lock, cvar) = &*self.terminated;
        let guard = lock.lock().unwrap();
        let (guard, timeout) = cvar
            .wait_timeout_while(guard, Duration::from_millis(1000), |terminated| !*terminated)
            .unwrap();
        if timeout.timed_out() && !*guard {
            drop(guard);
            if let Some(agent) = &self.agent_process {
                if let Err(err) = agent.terminate() {
                    warn!(%err, "force-terminate after stop timeout failed");
                }
            }
        } else {
            drop(guard);
        }

        if let Some(handle) = self.watchdog_thread.take() {
            let _ = handle.join();
        }

        self.started = false;
    }

    /// `destroy` (§4.6): idempotent-safe even on a never-started instance.
    /// Rust's ownership model frees `serial`/`url`/the mutex and condvar the
    /// moment `self` is dropped; this exists only to name the lifecycle step.
    pub fn destroy(mut self) {
        self.stop();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

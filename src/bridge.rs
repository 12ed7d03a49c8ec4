//! Opaque facade over the host-to-device bridge command (§4.2).
//!
//! The concrete commands (`adb push`, `adb reverse`, ...) are an external
//! detail; the core only depends on the semantic operations below, expressed
//! as a trait so tests can substitute a fake bridge and fake agent process.

use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::params::ServerParams;

/// A running (or exited) agent process. Modeled as a shared, thread-safe
/// handle: the watchdog holds a clone for `wait` while the lifecycle thread
/// may concurrently call `terminate` (§9 "Subprocess handle").
pub trait AgentProcess: Send + Sync {
    /// Blocks until the process exits. Exit code is intentionally ignored by
    /// callers (§4.5 step 1).
    fn wait(&self) -> io::Result<ExitStatus>;

    /// Best-effort forceful termination. Racing a `wait` that is about to
    /// observe natural exit is tolerated (§9 "Race in stop after timeout").
    fn terminate(&self) -> io::Result<()>;
}

/// Wraps a real [`std::process::Child`] behind a mutex so `wait` and
/// `terminate` can be called from different threads.
pub struct ChildProcess {
    child: Mutex<Child>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child: Mutex::new(child),
        }
    }
}

impl AgentProcess for ChildProcess {
    fn wait(&self) -> io::Result<ExitStatus> {
        self.child.lock().unwrap().wait()
    }

    fn terminate(&self) -> io::Result<()> {
        self.child.lock().unwrap().kill()
    }
}

/// Semantic operations the core needs from the host bridge.
///
/// Every push/tunnel operation waits for the underlying command and reports
/// success as a plain `bool`, matching §4.2's `check_success(p, label)`.
pub trait Bridge: Send + Sync {
    fn push(&self, serial: Option<&str>, local_path: &Path, device_path: &str) -> Result<bool>;
    fn reverse(&self, serial: Option<&str>, socket_name: &str, local_port: u16) -> Result<bool>;
    fn reverse_remove(&self, serial: Option<&str>, socket_name: &str) -> Result<bool>;
    fn forward(&self, serial: Option<&str>, local_port: u16, socket_name: &str) -> Result<bool>;
    fn forward_remove(&self, serial: Option<&str>, local_port: u16) -> Result<bool>;
    fn exec_agent(
        &self,
        serial: Option<&str>,
        params: &ServerParams,
        tunnel_forward: bool,
    ) -> Result<std::sync::Arc<dyn AgentProcess>>;
}

/// Real bridge implementation: shells out to the `adb`-equivalent binary
/// named by `bin` (defaults to `"adb"`).
pub struct CommandBridge {
    bin: String,
}

impl CommandBridge {
    pub fn new() -> Self {
        Self {
            bin: "adb".to_string(),
        }
    }

    pub fn with_binary(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, serial: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.bin);
        if let Some(serial) = serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    /// Waits for `child` and reports success iff it exited with status 0.
    fn check_success(&self, mut child: Child, label: &'static str) -> Result<bool> {
        let status = child
            .wait()
            .map_err(|_| Error::Bridge { label })?;
        if !status.success() {
            debug!(label, ?status, "bridge command exited non-zero");
        }
        Ok(status.success())
    }
}

impl Default for CommandBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge for CommandBridge {
    fn push(&self, serial: Option<&str>, local_path: &Path, device_path: &str) -> Result<bool> {
        let child = self
            .command(serial)
            .arg("push")
            .arg(local_path)
            .arg(device_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::Bridge { label: "push" })?;
        self.check_success(child, "push")
    }

    fn reverse(&self, serial: Option<&str>, socket_name: &str, local_port: u16) -> Result<bool> {
        let child = self
            .command(serial)
            .arg("reverse")
            .arg(format!("localabstract:{socket_name}"))
            .arg(format!("tcp:{local_port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::Bridge { label: "reverse" })?;
        self.check_success(child, "reverse")
    }

    fn reverse_remove(&self, serial: Option<&str>, socket_name: &str) -> Result<bool> {
        let child = self
            .command(serial)
            .arg("reverse")
            .arg("--remove")
            .arg(format!("localabstract:{socket_name}"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::Bridge {
                label: "reverse_remove",
            })?;
        self.check_success(child, "reverse_remove")
    }

    fn forward(&self, serial: Option<&str>, local_port: u16, socket_name: &str) -> Result<bool> {
        let child = self
            .command(serial)
            .arg("forward")
            .arg(format!("tcp:{local_port}"))
            .arg(format!("localabstract:{socket_name}"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::Bridge { label: "forward" })?;
        self.check_success(child, "forward")
    }

    fn forward_remove(&self, serial: Option<&str>, local_port: u16) -> Result<bool> {
        let child = self
            .command(serial)
            .arg("forward")
            .arg("--remove")
            .arg(format!("tcp:{local_port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::Bridge {
                label: "forward_remove",
            })?;
        self.check_success(child, "forward_remove")
    }

    fn exec_agent(
        &self,
        serial: Option<&str>,
        params: &ServerParams,
        tunnel_forward: bool,
    ) -> Result<std::sync::Arc<dyn AgentProcess>> {
        let mut argv = vec![
            "shell".to_string(),
            format!("CLASSPATH={}", crate::params::AGENT_DEVICE_PATH),
            "app_process".to_string(),
            "/".to_string(),
            "com.genymobile.scrcpy.Server".to_string(),
        ];
        argv.extend(params.agent_argv(tunnel_forward));

        let mut child = self
            .command(serial)
            .args(&argv)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::Process)?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_drain(stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_drain(stderr, true);
        }

        Ok(std::sync::Arc::new(ChildProcess::new(child)))
    }
}

/// Drains a long-running agent's stdout/stderr on a background thread and
/// logs each line. Without this the OS pipe buffer fills once the agent has
/// written ~64 KiB of log output and the agent blocks on its next `write`,
/// stalling the whole mirroring session; short-lived bridge commands are
/// waited on synchronously right after spawn so they never write enough to
/// fill the buffer, but the agent runs for the life of the session.
fn spawn_log_drain(stream: impl Read + Send + 'static, is_stderr: bool) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = line.trim_end_matches(&['\r', '\n'][..]);
                    if is_stderr {
                        warn!(agent_stderr = line);
                    } else {
                        debug!(agent_stdout = line);
                    }
                }
            }
        }
    });
}

/// Logs a teardown failure at `warn` without propagating it (§7).
pub(crate) fn log_teardown_failure(op: &'static str, result: Result<bool>) {
    match result {
        Ok(true) => {}
        Ok(false) => warn!(op, "bridge teardown command exited non-zero"),
        Err(err) => warn!(op, %err, "bridge teardown command failed"),
    }
}

//! End-to-end exercise of `Server` through the public API, using a fake
//! bridge and a condvar-driven fake agent process in place of `adb` and a
//! real device.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use screenmirror_core::params::PortRange;
use screenmirror_core::server::{Server, Target};
use screenmirror_core::{AgentProcess, Bridge, Error, Result, ServerParams};

struct FakeAgentProcess {
    exited: Mutex<bool>,
    exited_cv: Condvar,
}

impl FakeAgentProcess {
    fn new() -> Self {
        Self {
            exited: Mutex::new(false),
            exited_cv: Condvar::new(),
        }
    }
}

impl AgentProcess for FakeAgentProcess {
    fn wait(&self) -> std::io::Result<ExitStatus> {
        let guard = self.exited.lock().unwrap();
        let _guard = self.exited_cv.wait_while(guard, |exited| !*exited).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Ok(ExitStatus::from_raw(0))
        }
    }

    fn terminate(&self) -> std::io::Result<()> {
        *self.exited.lock().unwrap() = true;
        self.exited_cv.notify_all();
        Ok(())
    }
}

struct FakeBridge {
    pushed: AtomicU32,
    reverse_remove_calls: AtomicU32,
}

impl FakeBridge {
    fn new() -> Self {
        Self {
            pushed: AtomicU32::new(0),
            reverse_remove_calls: AtomicU32::new(0),
        }
    }
}

impl Bridge for FakeBridge {
    fn push(&self, _serial: Option<&str>, _local_path: &Path, _device_path: &str) -> Result<bool> {
        self.pushed.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn reverse(&self, _serial: Option<&str>, _socket_name: &str, _local_port: u16) -> Result<bool> {
        Ok(true)
    }

    fn reverse_remove(&self, _serial: Option<&str>, _socket_name: &str) -> Result<bool> {
        self.reverse_remove_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn forward(&self, _serial: Option<&str>, _local_port: u16, _socket_name: &str) -> Result<bool> {
        Ok(true)
    }

    fn forward_remove(&self, _serial: Option<&str>, _local_port: u16) -> Result<bool> {
        Ok(true)
    }

    fn exec_agent(
        &self,
        _serial: Option<&str>,
        _params: &ServerParams,
        _tunnel_forward: bool,
    ) -> Result<Arc<dyn AgentProcess>> {
        Ok(Arc::new(FakeAgentProcess::new()))
    }
}

fn write_fixture_agent() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("create fixture agent file");
    file
}

// Both tests in this file mutate the process-wide SCRCPY_SERVER_PATH env var;
// they run in the same test binary and don't overlap in practice, but a
// `--test-threads=1` run is the safe way to exercise this file in isolation.

#[test]
fn reverse_session_round_trip_through_public_api() {
    let fixture = write_fixture_agent();
    std::env::set_var("SCRCPY_SERVER_PATH", fixture.path());

    let bridge: Arc<dyn Bridge> = Arc::new(FakeBridge::new());
    let mut server = Server::new(bridge);

    let params = ServerParams {
        port_range: PortRange::new(28183, 28199),
        ..ServerParams::default()
    };
    server
        .start(Target::Device { serial: None }, params)
        .expect("start should succeed");

    let local_port = server.local_port();
    let device_side = std::thread::spawn(move || {
        let mut video = TcpStream::connect(("127.0.0.1", local_port)).unwrap();
        video.write_all(b"frame-data").unwrap();
        let mut control = TcpStream::connect(("127.0.0.1", local_port)).unwrap();
        control.write_all(b"input-event").unwrap();
    });

    let (mut video, mut control) = server.connect().expect("connect should succeed");
    device_side.join().unwrap();

    let mut video_bytes = Vec::new();
    video.read_to_end(&mut video_bytes).unwrap();
    assert_eq!(video_bytes, b"frame-data");

    let mut control_bytes = Vec::new();
    control.read_to_end(&mut control_bytes).unwrap();
    assert_eq!(control_bytes, b"input-event");

    server.destroy();

    std::env::remove_var("SCRCPY_SERVER_PATH");
}

#[test]
fn start_fails_fast_when_agent_artifact_is_missing() {
    std::env::set_var("SCRCPY_SERVER_PATH", "/nonexistent/path/to/scrcpy-server.jar");

    let bridge: Arc<dyn Bridge> = Arc::new(FakeBridge::new());
    let mut server = Server::new(bridge);
    let result = server.start(
        Target::Device { serial: None },
        ServerParams::default(),
    );

    assert!(matches!(result, Err(Error::Config(_))));

    std::env::remove_var("SCRCPY_SERVER_PATH");
}

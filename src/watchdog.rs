//! Background waiter on the agent process (§4.5).
//!
//! Spawned as soon as the agent process handle exists. On exit it signals the
//! `terminated` condition and, if a reverse-mode listener is still open,
//! force-closes it so a pending `accept` wakes up instead of hanging forever.
//!
//! Direct mode has no local process handle to wait on (see the spec's open
//! question on this); [`spawn_direct_keepalive`] resolves it by polling the
//! remote endpoint's liveness instead of a subprocess exit.

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::info;

use crate::bridge::AgentProcess;
use crate::net::{self, CloseOnce};

/// Shared terminated-flag + condition variable, guarded by one mutex as
/// described in §5 ("`terminated` + `terminated_signal`").
pub type TerminatedSignal = Arc<(Mutex<bool>, Condvar)>;

fn signal_terminated(terminated: &TerminatedSignal) {
    let (lock, cvar) = &**terminated;
    let mut guard = lock.lock().unwrap();
    *guard = true;
    cvar.notify_all();
}

/// Spawns the single-shot watchdog thread for a non-direct session and
/// returns its join handle, or the OS error if the thread could not be
/// created (propagated so `Server::start` can unwind step E).
pub fn spawn(
    agent: Arc<dyn AgentProcess>,
    terminated: TerminatedSignal,
    listen_slot: Arc<Mutex<Option<TcpListener>>>,
    close_once: Arc<CloseOnce>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("screenmirror-watchdog".into())
        .spawn(move || {
            let _ = agent.wait();
            info!("agent process exited");

            signal_terminated(&terminated);

            if close_once.try_close(&listen_slot) {
                info!("watchdog closed listen socket to unblock a pending accept");
            }
        })
}

/// Degenerate watchdog for direct mode: there is no local process to wait on,
/// so liveness is approximated by periodically probing the remote endpoint.
/// Three consecutive failed probes are treated as the remote session having
/// ended. `stop_requested` lets `Server::stop` end the poll promptly instead
/// of waiting for the next interval.
pub fn spawn_direct_keepalive(
    addr: Ipv4Addr,
    port: u16,
    terminated: TerminatedSignal,
    stop_requested: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    const POLL_INTERVAL: Duration = Duration::from_secs(2);
    const FAILURE_THRESHOLD: u32 = 3;

    thread::Builder::new()
        .name("screenmirror-watchdog-direct".into())
        .spawn(move || {
            let mut consecutive_failures = 0u32;
            while !stop_requested.load(Ordering::SeqCst) {
                thread::sleep(POLL_INTERVAL);
                if stop_requested.load(Ordering::SeqCst) {
                    break;
                }
                match net::connect(addr, port) {
                    Ok(_) => consecutive_failures = 0,
                    Err(_) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= FAILURE_THRESHOLD {
                            info!("direct-mode keepalive lost the remote endpoint");
                            break;
                        }
                    }
                }
            }
            signal_terminated(&terminated);
        })
}

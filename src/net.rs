//! Blocking IPv4 byte-stream sockets, plus the one-byte readiness probe and
//! the close-authority token that unblocks a pending `accept`.

use std::io::{self, Read};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Binds a listener on `(addr, port)` with a small backlog; this is a loopback
/// control-plane listener, not a high-throughput accept loop.
pub fn listen(addr: Ipv4Addr, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind((addr, port))
}

/// Blocking connect.
pub fn connect(addr: Ipv4Addr, port: u16) -> io::Result<TcpStream> {
    TcpStream::connect((addr, port))
}

/// Blocking accept on an already-bound listener.
pub fn accept(listener: &TcpListener) -> io::Result<TcpStream> {
    let (stream, addr) = listener.accept()?;
    debug!(%addr, "accepted connection");
    Ok(stream)
}

/// Shuts a listener down at the OS level and drops it.
///
/// Both steps matter: a thread blocked in `accept` on some platforms only
/// wakes on `shutdown`, on others only on the final `close` of the fd. Doing
/// both here, immediately, is what lets [`crate::watchdog`] wake a pending
/// `accept` when the agent process dies.
pub fn shutdown_and_close(listener: TcpListener) {
    let fd = listener.as_raw_fd();
    // SAFETY: `fd` is a valid, open socket fd owned by `listener` for the
    // duration of this call; `shutdown` does not take ownership of it.
    let rc = unsafe { libc::shutdown(fd, libc::SHUT_RDWR) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        debug!(%err, "shutdown on listener fd failed (already closed?)");
    }
    drop(listener);
}

/// Shuts a data stream down and drops it. Best-effort: teardown never fails.
pub fn shutdown_stream(stream: TcpStream) {
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        debug!(%err, "stream shutdown failed (already closed?)");
    }
}

/// Connects, then reads and discards exactly one readiness byte.
///
/// A bridge tunnel may report `connect` success before the device-side
/// listener actually exists; the byte is the earliest moment we know the
/// agent is serving. Returns `Ok(None)` (not an error) when the probe itself
/// fails or returns a short read, matching the "return Invalid" contract —
/// callers decide whether that's retryable.
pub fn connect_and_probe(addr: Ipv4Addr, port: u16) -> io::Result<TcpStream> {
    let mut stream = connect(addr, port)?;
    let mut probe = [0u8; 1];
    match stream.read(&mut probe) {
        Ok(1) => Ok(stream),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read on readiness probe",
        )),
        Err(err) => Err(err),
    }
}

/// Retries [`connect_and_probe`] up to `attempts` times, sleeping `delay_ms`
/// between failures. Returns the first success.
pub fn connect_with_retry(
    addr: Ipv4Addr,
    port: u16,
    attempts: u32,
    delay_ms: u64,
) -> io::Result<TcpStream> {
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match connect_and_probe(addr, port) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(attempt, %err, "connect_and_probe attempt failed");
                last_err = Some(err);
                if attempt < attempts {
                    thread::sleep(Duration::from_millis(delay_ms));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no attempts made")))
}

/// A one-shot close-authority token (§9 "Close-authority token").
///
/// Exactly one caller of [`CloseOnce::try_close`] across all threads performs
/// the destructive close; every other caller is a no-op. This is the single
/// coordination point between the watchdog and the lifecycle thread for the
/// shared listening socket.
#[derive(Debug, Default)]
pub struct CloseOnce {
    closed: AtomicBool,
}

impl CloseOnce {
    pub fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
        }
    }

    /// Attempts to win close-authority over `slot`. The winner takes the
    /// listener out of `slot` and shuts it down; every other caller is a
    /// no-op. Returns whether *this* call performed the close.
    ///
    /// `slot` is shared (typically via `Arc`) between the lifecycle thread
    /// and the watchdog; it holds `Some(listener)` from the moment `start`
    /// binds it until whichever side wins the race takes it.
    pub fn try_close(&self, slot: &std::sync::Mutex<Option<TcpListener>>) -> bool {
        match self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                if let Some(listener) = slot.lock().unwrap().take() {
                    shutdown_and_close(listener);
                }
                true
            }
            Err(_) => {
                warn!("listen socket close race lost; another thread already closed it");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn listen_accept_roundtrip() {
        let listener = listen(LOOPBACK_V4_TEST, 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || accept(&listener).unwrap());

        let mut client = connect(LOOPBACK_V4_TEST, port).unwrap();
        client.write_all(b"x").unwrap();

        let mut server_side = handle.join().unwrap();
        let mut buf = [0u8; 1];
        server_side.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn connect_and_probe_consumes_one_byte_and_nothing_else() {
        let listener = listen(LOOPBACK_V4_TEST, 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Rrest-of-video-data").unwrap();
        });

        let mut stream = connect_and_probe(LOOPBACK_V4_TEST, port).unwrap();
        handle.join().unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"rest-of-video-data");
    }

    #[test]
    fn connect_and_probe_fails_on_immediate_close() {
        let listener = listen(LOOPBACK_V4_TEST, 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let result = connect_and_probe(LOOPBACK_V4_TEST, port);
        handle.join().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn close_once_only_one_winner() {
        let listener = listen(LOOPBACK_V4_TEST, 0).unwrap();
        let slot = std::sync::Mutex::new(Some(listener));
        let token = CloseOnce::new();
        assert!(!token.is_closed());

        assert!(token.try_close(&slot));
        assert!(slot.lock().unwrap().is_none());
        // A second racer finds the token already tripped and does nothing.
        assert!(!token.try_close(&slot));
    }

    const LOOPBACK_V4_TEST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
}

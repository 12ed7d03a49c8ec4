//! A small CLI that drives [`screenmirror_core::Server`] end to end: start a
//! session against a bridge-attached device (or a direct IP), connect the two
//! data sockets, and print the byte counts read from each until interrupted.
//!
//! This binary is not part of the library's scope — it exists to exercise
//! `Server` the way a real video/input consumer would, without actually
//! decoding anything.

mod cli;

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use screenmirror_core::server::{Server, Target};
use screenmirror_core::{CommandBridge, ServerParams};

fn main() -> Result<()> {
    let args = cli::Args::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let params = args.to_server_params();
    let target = args.to_target()?;

    let bridge = Arc::new(CommandBridge::new());
    let mut server = Server::new(bridge);

    server.start(target, params).context("server start failed")?;
    tracing::info!(mode = ?server.mode(), port = server.local_port(), "session started");

    let stop_requested = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop_requested_for_handler = stop_requested.clone();
    ctrlc::set_handler(move || {
        stop_requested_for_handler.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let (mut video, mut control) = server.connect().context("server connect failed")?;
    tracing::info!("video and control sockets established");

    let video_reader = std::thread::spawn(move || drain_and_count(&mut video));
    let control_reader = std::thread::spawn(move || drain_and_count(&mut control));

    while !stop_requested.load(std::sync::atomic::Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
        if video_reader.is_finished() && control_reader.is_finished() {
            break;
        }
    }

    server.stop();

    let video_bytes = video_reader.join().unwrap_or(0);
    let control_bytes = control_reader.join().unwrap_or(0);
    tracing::info!(video_bytes, control_bytes, "session ended");

    Ok(())
}

fn drain_and_count(stream: &mut std::net::TcpStream) -> u64 {
    let mut buf = [0u8; 4096];
    let mut total = 0u64;
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => total += n as u64,
        }
    }
    total
}

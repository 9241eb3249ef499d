// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Unix domain stream socket transport.
//!
//! The receiver binds, listens and accepts a fresh connection every
//! iteration; the sender retries `connect` until the listener is up. Both
//! sides release the connection before the post-transfer rendezvous, so a
//! fast sender can never reach the previous iteration's listener.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{BenchError, BenchResult};
use crate::protocol::RunParams;
use crate::transport::{ChunkReceiver, ChunkSender, Transport, Wakeup};
use crate::types::TransportKind;

/// Well-known socket path used when none is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/unix_domain_socket_test.sock";

/// Delay between connection attempts while the receiver is not listening yet.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Give up connecting after this long.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a wakeup keeps trying to reach a listener that is being rebound.
const POKE_WINDOW: Duration = Duration::from_millis(100);

pub struct UdsTransport {
    socket_path: PathBuf,
}

impl UdsTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

}

impl Default for UdsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

/// Connect to `path` and hang up, so a receiver blocked in `accept` returns.
pub(crate) fn poke(path: &Path) {
    let start = Instant::now();
    loop {
        match UnixStream::connect(path) {
            Ok(_) => return,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) && start.elapsed() < POKE_WINDOW =>
            {
                std::thread::sleep(CONNECT_RETRY_DELAY);
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No listener to wake");
                return;
            }
        }
    }
}

/// Remove a socket file, ignoring a missing one.
fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl Transport for UdsTransport {
    type Sender = UdsSender;
    type Receiver = UdsReceiver;

    fn kind(&self) -> TransportKind {
        TransportKind::Uds
    }

    fn post_transfer_rendezvous(&self) -> bool {
        true
    }

    fn prepare(&mut self, _params: &RunParams) -> BenchResult<()> {
        remove_socket(&self.socket_path).map_err(|e| {
            BenchError::setup(
                "uds",
                format!("Failed to remove stale socket {}: {}", self.socket_path.display(), e),
            )
        })
    }

    fn sender(&mut self) -> BenchResult<UdsSender> {
        Ok(UdsSender {
            socket_path: self.socket_path.clone(),
            stream: None,
        })
    }

    fn receiver(&mut self) -> BenchResult<UdsReceiver> {
        Ok(UdsReceiver {
            socket_path: self.socket_path.clone(),
            listener: None,
            stream: None,
        })
    }

    fn cleanup(&mut self) {
        if let Err(e) = remove_socket(&self.socket_path) {
            tracing::warn!(path = %self.socket_path.display(), error = %e, "Failed to remove socket");
        }
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Socket(self.socket_path.clone())
    }
}

pub struct UdsSender {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
}

impl ChunkSender for UdsSender {
    fn connect(&mut self, iteration: u32) -> BenchResult<()> {
        let start = Instant::now();
        loop {
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => {
                    tracing::debug!(
                        iteration = iteration,
                        path = %self.socket_path.display(),
                        "Connected to receiver"
                    );
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) && start.elapsed() < CONNECT_TIMEOUT =>
                {
                    std::thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(e) => {
                    return Err(BenchError::setup(
                        "uds",
                        format!(
                            "Failed to connect to {} at iteration {}: {}",
                            self.socket_path.display(),
                            iteration,
                            e
                        ),
                    ));
                }
            }
        }
    }

    fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sender not connected"))?;
        loop {
            match stream.write(chunk) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn disconnect(&mut self) -> BenchResult<()> {
        self.stream = None;
        Ok(())
    }
}

pub struct UdsReceiver {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    stream: Option<UnixStream>,
}

impl ChunkReceiver for UdsReceiver {
    fn accept(&mut self, iteration: u32) -> BenchResult<()> {
        remove_socket(&self.socket_path).map_err(|e| BenchError::Io {
            context: "removing stale socket",
            source: e,
        })?;

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            BenchError::setup(
                "uds",
                format!("Failed to bind socket {}: {}", self.socket_path.display(), e),
            )
        })?;

        tracing::debug!(
            iteration = iteration,
            path = %self.socket_path.display(),
            "Waiting for sender connection"
        );

        let (stream, _) = listener.accept().map_err(|e| {
            BenchError::setup("uds", format!("Failed to accept connection: {}", e))
        })?;

        self.listener = Some(listener);
        self.stream = Some(stream);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "receiver not connected"))?;
        loop {
            match stream.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn close(&mut self) -> BenchResult<()> {
        self.stream = None;
        self.listener = None;
        remove_socket(&self.socket_path).map_err(|e| BenchError::Io {
            context: "removing socket after transfer",
            source: e,
        })
    }
}

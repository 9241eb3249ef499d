// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! POSIX message queue transport.
//!
//! One message per chunk. The queue's message size is the chunk size capped
//! at the kernel limit (`/proc/sys/fs/mqueue/msgsize_max`), so large chunk
//! sizes still run without privileges, just with more messages.
//!
//! Data messages are never empty. An empty message marks the channel closed;
//! the parent posts one when the sender dies, since a queue has no EOF.

use std::ffi::CString;
use std::io;
use std::time::Duration;

use nix::errno::Errno;
use nix::mqueue::{mq_attr_member_t, mq_close, mq_open, mq_receive, mq_send, mq_unlink, MqAttr, MqdT, MQ_OFlag};
use nix::sys::stat::Mode;

use crate::error::{BenchError, BenchResult};
use crate::protocol::RunParams;
use crate::transport::{ChunkReceiver, ChunkSender, Transport, Wakeup};
use crate::types::{ResourceName, TransportKind};

const MSGSIZE_MAX_PATH: &str = "/proc/sys/fs/mqueue/msgsize_max";
const MSG_MAX_PATH: &str = "/proc/sys/fs/mqueue/msg_max";

/// Linux defaults when /proc is unavailable.
const FALLBACK_MSGSIZE_MAX: usize = 8192;
const FALLBACK_MSG_MAX: usize = 10;

/// Queue depth we ask for, before clamping to the limits.
const PREFERRED_DEPTH: usize = 10;

/// Keep `depth * msg_size` under the default RLIMIT_MSGQUEUE (800 KiB).
const QUEUE_BYTES_BUDGET: usize = 512 * 1024;

/// Attempts to post the closure marker into a full queue.
const CLOSURE_ATTEMPTS: u32 = 1000;

pub struct MqTransport {
    name: ResourceName,
    msg_size: usize,
    depth: usize,
}

impl MqTransport {
    pub fn new(name: ResourceName) -> Self {
        Self {
            name,
            msg_size: 0,
            depth: 0,
        }
    }

    fn queue_name(&self) -> BenchResult<CString> {
        queue_path(&self.name)
    }

    fn open(&self, flags: MQ_OFlag) -> BenchResult<MqdT> {
        let name = self.queue_name()?;
        mq_open(name.as_c_str(), flags, Mode::empty(), None)
            .map_err(|e| BenchError::setup("mq", format!("mq_open {} failed: {}", self.name, e)))
    }
}

fn queue_path(name: &ResourceName) -> BenchResult<CString> {
    CString::new(format!("/{}", name))
        .map_err(|e| BenchError::setup("mq", format!("Invalid queue name: {}", e)))
}

/// Post the empty closure marker to the named queue. Best effort.
pub(crate) fn post_closure(name: &ResourceName) {
    let Ok(path) = queue_path(name) else {
        return;
    };
    let mqd = match mq_open(
        path.as_c_str(),
        MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK,
        Mode::empty(),
        None,
    ) {
        Ok(mqd) => mqd,
        Err(e) => {
            tracing::debug!(queue = %name, error = %e, "No queue to close");
            return;
        }
    };

    for _ in 0..CLOSURE_ATTEMPTS {
        match mq_send(&mqd, &[], 0) {
            Ok(()) => break,
            // Full: the receiver is draining what the sender left behind.
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => {
                tracing::warn!(queue = %name, error = %e, "Failed to post closure marker");
                break;
            }
        }
    }
    let _ = mq_close(mqd);
}

fn read_limit(path: &str, fallback: usize) -> usize {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Message size and queue depth for a requested chunk size.
fn queue_geometry(chunk_size: usize, msgsize_max: usize, msg_max: usize) -> (usize, usize) {
    let msg_size = chunk_size.min(msgsize_max).max(1);
    let depth = PREFERRED_DEPTH
        .min(msg_max)
        .min(QUEUE_BYTES_BUDGET / msg_size)
        .max(1);
    (msg_size, depth)
}

impl Transport for MqTransport {
    type Sender = MqSender;
    type Receiver = MqReceiver;

    fn kind(&self) -> TransportKind {
        TransportKind::Mq
    }

    fn prepare(&mut self, params: &RunParams) -> BenchResult<()> {
        let name = self.queue_name()?;
        // A queue left by a crashed run may hold stale messages.
        let _ = mq_unlink(name.as_c_str());

        let (msg_size, depth) = queue_geometry(
            params.chunk_size(),
            read_limit(MSGSIZE_MAX_PATH, FALLBACK_MSGSIZE_MAX),
            read_limit(MSG_MAX_PATH, FALLBACK_MSG_MAX),
        );
        self.msg_size = msg_size;
        self.depth = depth;

        let attr = MqAttr::new(0, depth as mq_attr_member_t, msg_size as mq_attr_member_t, 0);
        let mqd = mq_open(
            name.as_c_str(),
            MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        )
        .map_err(|e| BenchError::setup("mq", format!("mq_open {} failed: {}", self.name, e)))?;
        mq_close(mqd).map_err(|e| BenchError::syscall("mq_close", e))?;

        tracing::debug!(queue = %self.name, msg_size = msg_size, depth = depth, "Created message queue");
        Ok(())
    }

    fn sender(&mut self) -> BenchResult<MqSender> {
        Ok(MqSender {
            mqd: Some(self.open(MQ_OFlag::O_WRONLY)?),
            msg_size: self.msg_size,
        })
    }

    fn receiver(&mut self) -> BenchResult<MqReceiver> {
        Ok(MqReceiver {
            mqd: Some(self.open(MQ_OFlag::O_RDONLY)?),
            scratch: vec![0u8; self.msg_size],
        })
    }

    fn cleanup(&mut self) {
        if let Ok(name) = self.queue_name() {
            if let Err(e) = mq_unlink(name.as_c_str()) {
                if e != Errno::ENOENT {
                    tracing::warn!(queue = %self.name, error = %e, "mq_unlink failed");
                }
            }
        }
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Queue(self.name.clone())
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "message queue closed")
}

pub struct MqSender {
    mqd: Option<MqdT>,
    msg_size: usize,
}

impl ChunkSender for MqSender {
    fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let mqd = self.mqd.as_ref().ok_or_else(closed)?;
        let len = chunk.len().min(self.msg_size);
        loop {
            match mq_send(mqd, &chunk[..len], 0) {
                Ok(()) => return Ok(len),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for MqSender {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            let _ = mq_close(mqd);
        }
    }
}

pub struct MqReceiver {
    mqd: Option<MqdT>,
    /// `mq_receive` needs a buffer of at least the queue's message size.
    scratch: Vec<u8>,
}

impl ChunkReceiver for MqReceiver {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mqd = self.mqd.as_ref().ok_or_else(closed)?;
        let mut priority = 0u32;
        let len = loop {
            match mq_receive(mqd, &mut self.scratch, &mut priority) {
                Ok(len) => break len,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if len > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message of {} bytes exceeds {} byte window", len, buf.len()),
            ));
        }
        buf[..len].copy_from_slice(&self.scratch[..len]);
        Ok(len)
    }
}

impl Drop for MqReceiver {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            let _ = mq_close(mqd);
        }
    }
}

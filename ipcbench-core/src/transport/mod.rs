// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Pluggable transports for the two-process benchmarks.
//!
//! A transport only knows how to set up its channel and move one chunk at a
//! time. Iteration control, rendezvous, timing and verification all live in
//! [`crate::protocol`], so every mechanism is measured the same way.
//!
//! Lifecycle of one run:
//!
//! 1. [`Transport::prepare`] in the parent before `fork`: remove stale
//!    artifacts, create state both roles inherit or attach to.
//! 2. [`Transport::sender`] in the child, [`Transport::receiver`] in the parent.
//! 3. Per iteration: `connect`/`accept`, chunked `send`/`receive`,
//!    `disconnect`/`close`.
//! 4. [`Transport::cleanup`] in the parent once the child has exited.
//!
//! If the sender dies mid-run, the parent fires the transport's [`Wakeup`] so
//! a receiver blocked in `accept` or `receive` sees the channel close.

mod mmap;
mod mq;
mod pipe;
mod uds;

pub use mmap::MmapTransport;
pub use mq::MqTransport;
pub use pipe::PipeTransport;
pub use uds::{UdsTransport, DEFAULT_SOCKET_PATH};

use std::io;
use std::path::PathBuf;

use crate::error::BenchResult;
use crate::protocol::RunParams;
use crate::shm::ProcessBarrier;
use crate::types::{ResourceName, TransportKind};

/// A channel mechanism measured across a fork boundary.
pub trait Transport {
    type Sender: ChunkSender;
    type Receiver: ChunkReceiver;

    fn kind(&self) -> TransportKind;

    /// Whether both roles rendezvous a second time after each transfer, once
    /// they have released the iteration's channel. Needed when the channel is
    /// reopened every iteration.
    fn post_transfer_rendezvous(&self) -> bool {
        false
    }

    /// Parent, before fork.
    fn prepare(&mut self, params: &RunParams) -> BenchResult<()>;

    /// Child, after fork.
    fn sender(&mut self) -> BenchResult<Self::Sender>;

    /// Parent, after fork.
    fn receiver(&mut self) -> BenchResult<Self::Receiver>;

    /// Parent, after the child exited. Best effort: removes every artifact
    /// `prepare` or the roles may have left behind.
    fn cleanup(&mut self);

    /// How to unblock the receiver once the sender has died.
    fn wakeup(&self) -> Wakeup {
        Wakeup::None
    }
}

/// Unblocks a receiver whose sender exited without closing the channel
/// cleanly. Owned, so it can be fired from another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wakeup {
    /// The kernel closes the channel when the sender exits.
    None,
    /// Abandon the named chunk barrier.
    Barrier(ResourceName),
    /// Post an empty message, read as closure.
    Queue(ResourceName),
    /// Connect once so a pending `accept` returns.
    Socket(PathBuf),
}

impl Wakeup {
    /// Best effort. Never blocks for long.
    pub fn fire(&self) {
        match self {
            Wakeup::None => {}
            Wakeup::Barrier(name) => {
                ProcessBarrier::abandon_named(name);
            }
            Wakeup::Queue(name) => mq::post_closure(name),
            Wakeup::Socket(path) => uds::poke(path),
        }
    }
}

/// Sending half of a channel.
pub trait ChunkSender {
    /// Open the iteration's channel. Runs before the start rendezvous.
    fn connect(&mut self, _iteration: u32) -> BenchResult<()> {
        Ok(())
    }

    /// Send at most `chunk.len()` bytes, returning how many were accepted.
    fn send(&mut self, chunk: &[u8]) -> io::Result<usize>;

    /// Release the iteration's channel.
    fn disconnect(&mut self) -> BenchResult<()> {
        Ok(())
    }
}

/// Receiving half of a channel.
pub trait ChunkReceiver {
    /// Open the iteration's channel. Runs before the start rendezvous.
    fn accept(&mut self, _iteration: u32) -> BenchResult<()> {
        Ok(())
    }

    /// Receive at most `buf.len()` bytes. `Ok(0)` means the peer closed.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the iteration's channel.
    fn close(&mut self) -> BenchResult<()> {
        Ok(())
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fork-based driver for sender/receiver transports.
//!
//! The parent prepares the transport and the rendezvous barrier, then forks.
//! The child becomes the sender and never returns into the caller: it exits
//! with status 0 on success, 1 on error and 101 on panic. The parent is the
//! receiver, verifies every measured iteration and reports the bandwidth it
//! observed.
//!
//! A watcher thread in the parent notices a sender that exits abnormally. It
//! abandons the rendezvous barrier and fires the transport's [`Wakeup`], so
//! the receiver fails with [`BenchError::PeerFailed`] instead of blocking on
//! a peer that will never arrive.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::bandwidth::{aggregate, format_gib_per_sec, IterationRecord};
use crate::error::{BarrierError, BenchError, BenchResult, IntegrityError};
use crate::payload;
use crate::protocol::{Phase, RunOutcome, RunParams};
use crate::shm::ProcessBarrier;
use crate::transport::{ChunkReceiver, ChunkSender, Transport, Wakeup};
use crate::types::{ResourceName, Role};

/// Sender and receiver.
const PARTICIPANTS: u32 = 2;

/// Child exit status when the sender panicked.
const PANIC_EXIT_CODE: i32 = 101;

/// Run `transport` across a fork boundary.
///
/// `resource` names the rendezvous barrier. It is cleared before the run and
/// removed after it, whatever the outcome.
///
/// # Errors
/// Any setup, transfer, integrity or aggregation failure on either side.
/// A sender failure surfaces as [`BenchError::PeerFailed`].
pub fn run_two_process<T: Transport>(
    mut transport: T,
    resource: &ResourceName,
    params: &RunParams,
) -> BenchResult<RunOutcome> {
    params.validate()?;
    let kind = transport.kind();

    ProcessBarrier::clear(resource);
    let barrier = match prepare(&mut transport, resource, params) {
        Ok(barrier) => barrier,
        Err(e) => {
            transport.cleanup();
            ProcessBarrier::clear(resource);
            return Err(e);
        }
    };

    tracing::debug!(
        transport = %kind,
        barrier = %barrier.name(),
        participants = barrier.participant_count(),
        data_size = params.data_size,
        chunk_size = params.chunk_size(),
        warmups = params.warmup_iterations,
        iterations = params.measured_iterations,
        "Starting two-process run"
    );

    // SAFETY: the child only runs the sender loop and then calls _exit; it
    // never returns into the caller's stack frames.
    let fork_result = unsafe { fork() };
    let child = match fork_result {
        Ok(ForkResult::Child) => {
            let code = run_child(&mut transport, &barrier, params);
            // SAFETY: terminates the child without running the parent's atexit
            // handlers or unwinding into the test harness.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => child,
        Err(e) => {
            transport.cleanup();
            ProcessBarrier::clear(resource);
            return Err(BenchError::syscall("fork", e));
        }
    };

    let watcher = match watch_sender(child, resource, transport.wakeup()) {
        Ok(watcher) => watcher,
        Err(e) => {
            if let Err(kill_err) = kill(child, Signal::SIGKILL) {
                tracing::warn!(pid = child.as_raw(), error = %kill_err, "Failed to kill sender");
            }
            let _ = reap(child);
            transport.cleanup();
            ProcessBarrier::clear(resource);
            return Err(e);
        }
    };

    let post_transfer = transport.post_transfer_rendezvous();
    let received = transport.receiver().and_then(|mut receiver| {
        receive_iterations(&mut receiver, &barrier, params, post_transfer)
    });

    let outcome = match received {
        Ok(record) => {
            join_watcher(watcher);
            reap(child).and_then(|()| {
                let bandwidth =
                    aggregate(record.samples(), params.measured_iterations, params.data_size)?;
                tracing::info!(
                    transport = %kind,
                    role = %Role::Receiver,
                    bandwidth = %format_gib_per_sec(bandwidth),
                    "Run complete"
                );
                Ok(RunOutcome {
                    kind,
                    params: *params,
                    bandwidth,
                    record,
                    threads: 1,
                })
            })
        }
        Err(e) if sender_gone(&e) => {
            // Release a sender that is still alive and parked at the rendezvous.
            if let Err(abandon_err) = barrier.abandon() {
                tracing::warn!(error = %abandon_err, "Failed to abandon rendezvous");
            }
            join_watcher(watcher);
            match reap(child) {
                Err(peer) => {
                    tracing::warn!(transport = %kind, error = %e, "Receiver stopped after the sender failed");
                    Err(peer)
                }
                Ok(()) => Err(e),
            }
        }
        Err(e) => {
            tracing::error!(transport = %kind, error = %e, "Receiver failed, killing sender");
            if let Err(kill_err) = kill(child, Signal::SIGKILL) {
                tracing::warn!(pid = child.as_raw(), error = %kill_err, "Failed to kill sender");
            }
            join_watcher(watcher);
            // The receiver's error is the one worth reporting.
            let _ = reap(child);
            Err(e)
        }
    };

    drop(barrier);
    transport.cleanup();
    ProcessBarrier::clear(resource);
    outcome
}

fn prepare<T: Transport>(
    transport: &mut T,
    resource: &ResourceName,
    params: &RunParams,
) -> BenchResult<ProcessBarrier> {
    let barrier = ProcessBarrier::create(resource, PARTICIPANTS)?;
    transport.prepare(params)?;
    Ok(barrier)
}

/// Body of the forked child. Returns its exit status.
fn run_child<T: Transport>(transport: &mut T, barrier: &ProcessBarrier, params: &RunParams) -> i32 {
    let kind = transport.kind();
    let result = panic::catch_unwind(AssertUnwindSafe(|| -> BenchResult<f64> {
        let post_transfer = transport.post_transfer_rendezvous();
        let mut sender = transport.sender()?;
        let record = send_iterations(&mut sender, barrier, params, post_transfer)?;
        drop(sender);
        Ok(record.bandwidth(params.data_size)?)
    }));

    match result {
        Ok(Ok(bandwidth)) => {
            tracing::info!(
                transport = %kind,
                role = %Role::Sender,
                bandwidth = %format_gib_per_sec(bandwidth),
                "Run complete"
            );
            0
        }
        Ok(Err(e)) => {
            tracing::error!(transport = %kind, role = %Role::Sender, error = %e, "Sender failed");
            1
        }
        Err(_) => {
            tracing::error!(transport = %kind, role = %Role::Sender, "Sender panicked");
            PANIC_EXIT_CODE
        }
    }
}

/// Sender loop: one barrier-aligned, timed transfer per iteration.
pub(crate) fn send_iterations<S: ChunkSender>(
    sender: &mut S,
    barrier: &ProcessBarrier,
    params: &RunParams,
    post_transfer: bool,
) -> BenchResult<IterationRecord> {
    let data = payload::generate(params.data_size);
    let chunk_size = params.chunk_size();
    let mut record = IterationRecord::with_capacity(params.measured_iterations);

    for iteration in 0..params.total_iterations() {
        let phase = params.phase(iteration);
        sender.connect(iteration)?;
        rendezvous(barrier, Role::Sender, iteration)?;

        let start = Instant::now();
        let mut sent = 0;
        while sent < data.len() {
            let end = (sent + chunk_size).min(data.len());
            let n = sender
                .send(&data[sent..end])
                .map_err(|source| transfer_error(Role::Sender, iteration, source))?;
            if n == 0 {
                return Err(transfer_error(
                    Role::Sender,
                    iteration,
                    io::Error::new(io::ErrorKind::WriteZero, "channel accepted no bytes"),
                ));
            }
            sent += n;
        }
        let elapsed = start.elapsed();

        sender.disconnect()?;
        if post_transfer {
            rendezvous(barrier, Role::Sender, iteration)?;
        }

        if phase == Phase::Measure {
            record.push(elapsed);
        }
        tracing::debug!(
            role = %Role::Sender,
            iteration = iteration,
            phase = phase.as_str(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Iteration complete"
        );
    }

    Ok(record)
}

/// Receiver loop. Verifies the payload of every measured iteration.
pub(crate) fn receive_iterations<R: ChunkReceiver>(
    receiver: &mut R,
    barrier: &ProcessBarrier,
    params: &RunParams,
    post_transfer: bool,
) -> BenchResult<IterationRecord> {
    let mut received = vec![0u8; params.data_size];
    let chunk_size = params.chunk_size();
    let mut record = IterationRecord::with_capacity(params.measured_iterations);

    for iteration in 0..params.total_iterations() {
        let phase = params.phase(iteration);
        // Stale bytes from the previous iteration must not pass verification.
        received.fill(0);
        receiver.accept(iteration)?;
        rendezvous(barrier, Role::Receiver, iteration)?;

        let start = Instant::now();
        let mut total = 0;
        while total < received.len() {
            let end = (total + chunk_size).min(received.len());
            let n = receiver
                .receive(&mut received[total..end])
                .map_err(|source| transfer_error(Role::Receiver, iteration, source))?;
            if n == 0 {
                tracing::warn!(
                    iteration = iteration,
                    received = total,
                    expected = params.data_size,
                    "Channel closed before the full payload arrived"
                );
                break;
            }
            total += n;
        }
        let elapsed = start.elapsed();

        receiver.close()?;

        // The sender closed early and will not come back to any rendezvous.
        if total < params.data_size {
            return Err(match phase {
                Phase::Measure => BenchError::Integrity {
                    role: Role::Receiver,
                    iteration,
                    source: IntegrityError::LengthMismatch {
                        expected: params.data_size,
                        actual: total,
                    },
                },
                Phase::Warmup => transfer_error(
                    Role::Receiver,
                    iteration,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "sender closed the channel"),
                ),
            });
        }

        if post_transfer {
            rendezvous(barrier, Role::Receiver, iteration)?;
        }

        if phase == Phase::Measure {
            record.push(elapsed);
            payload::check(&received, params.data_size).map_err(|source| BenchError::Integrity {
                role: Role::Receiver,
                iteration,
                source,
            })?;
        }

        tracing::debug!(
            role = %Role::Receiver,
            iteration = iteration,
            phase = phase.as_str(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            verified = phase == Phase::Measure,
            "Iteration complete"
        );
    }

    Ok(record)
}

fn rendezvous(barrier: &ProcessBarrier, role: Role, iteration: u32) -> BenchResult<()> {
    barrier.wait().map_err(|source| BenchError::Rendezvous {
        role,
        iteration,
        source,
    })
}

fn transfer_error(role: Role, iteration: u32, source: io::Error) -> BenchError {
    BenchError::Transfer {
        role,
        iteration,
        source,
    }
}

/// Receiver errors that mean the sender is gone or will never arrive again.
fn sender_gone(err: &BenchError) -> bool {
    match err {
        BenchError::Rendezvous {
            source: BarrierError::Abandoned { .. },
            ..
        } => true,
        BenchError::Transfer { source, .. } => matches!(
            source.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
        ),
        BenchError::Integrity {
            source: IntegrityError::LengthMismatch { .. },
            ..
        } => true,
        _ => false,
    }
}

/// Observe the sender's exit without reaping it. Anything but status 0
/// abandons the rendezvous barrier and fires `wakeup`.
fn watch_sender(child: Pid, resource: &ResourceName, wakeup: Wakeup) -> BenchResult<JoinHandle<()>> {
    let resource = resource.clone();
    thread::Builder::new()
        .name("ipcbench-sender-watch".to_string())
        .spawn(move || {
            let status = loop {
                match waitid(Id::Pid(child), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                    Ok(status) => break status,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        tracing::warn!(pid = child.as_raw(), error = %e, "waitid failed");
                        return;
                    }
                }
            };
            if !matches!(status, WaitStatus::Exited(_, 0)) {
                tracing::debug!(pid = child.as_raw(), status = ?status, "Sender exited abnormally");
                ProcessBarrier::abandon_named(&resource);
                wakeup.fire();
            }
        })
        .map_err(|source| BenchError::Io {
            context: "spawning sender watcher",
            source,
        })
}

fn join_watcher(watcher: JoinHandle<()>) {
    if watcher.join().is_err() {
        tracing::warn!("Sender watcher panicked");
    }
}

/// Wait for the sender and turn anything but a clean exit into an error.
fn reap(child: Pid) -> BenchResult<()> {
    let status = loop {
        match waitpid(child, None) {
            Ok(status) => break status,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(BenchError::syscall("waitpid", e)),
        }
    };

    match status {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(_, code) => Err(BenchError::PeerFailed {
            role: Role::Sender,
            status: format!("exited with status {}", code),
        }),
        WaitStatus::Signaled(_, signal, _) => Err(BenchError::PeerFailed {
            role: Role::Sender,
            status: format!("killed by {}", signal),
        }),
        other => Err(BenchError::PeerFailed {
            role: Role::Sender,
            status: format!("{:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc;

    fn barrier(tag: &str) -> ResourceName {
        ResourceName::new(format!("ipcbench_driver_{}_{}", tag, std::process::id())).unwrap()
    }

    /// Sends over an in-process channel, one message per chunk. With a
    /// budget, fails and closes the channel once that many bytes went out.
    struct ChannelSender {
        tx: Option<mpsc::Sender<Vec<u8>>>,
        budget: Option<usize>,
    }

    impl ChunkSender for ChannelSender {
        fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
            let len = match self.budget {
                Some(0) => {
                    self.tx = None;
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sender gave up"));
                }
                Some(left) => chunk.len().min(left),
                None => chunk.len(),
            };
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))?;
            tx.send(chunk[..len].to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?;
            if let Some(left) = self.budget.as_mut() {
                *left -= len;
            }
            Ok(len)
        }
    }

    struct ChannelReceiver {
        rx: mpsc::Receiver<Vec<u8>>,
        corrupt_at: Option<usize>,
        seen: usize,
        pending: VecDeque<u8>,
    }

    impl ChunkReceiver for ChannelReceiver {
        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending.extend(chunk),
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap_or_default();
                if self.corrupt_at == Some(self.seen) {
                    *slot ^= 0xFF;
                }
                self.seen += 1;
            }
            Ok(n)
        }
    }

    #[derive(Default)]
    struct Pair {
        corrupt_at: Option<usize>,
        sender_budget: Option<usize>,
        post_transfer: bool,
    }

    impl Pair {
        /// Run sender and receiver loops in two threads on one barrier.
        fn run(
            self,
            tag: &str,
            params: RunParams,
        ) -> (BenchResult<IterationRecord>, BenchResult<IterationRecord>) {
            let name = barrier(tag);
            ProcessBarrier::clear(&name);
            let (tx, rx) = mpsc::channel();

            let sender_name = name.clone();
            let budget = self.sender_budget;
            let post_transfer = self.post_transfer;
            let sending = thread::spawn(move || {
                let barrier = ProcessBarrier::create(&sender_name, PARTICIPANTS).unwrap();
                let mut sender = ChannelSender {
                    tx: Some(tx),
                    budget,
                };
                send_iterations(&mut sender, &barrier, &params, post_transfer)
            });

            let barrier = ProcessBarrier::create(&name, PARTICIPANTS).unwrap();
            let mut receiver = ChannelReceiver {
                rx,
                corrupt_at: self.corrupt_at,
                seen: 0,
                pending: VecDeque::new(),
            };
            let received = receive_iterations(&mut receiver, &barrier, &params, post_transfer);
            // Release a sender parked at the next rendezvous after a receiver failure.
            drop(receiver);
            if received.is_err() {
                barrier.abandon().unwrap();
            }
            let sent = sending.join().unwrap();
            ProcessBarrier::clear(&name);
            (sent, received)
        }
    }

    #[test]
    fn test_driver_records_only_measured_iterations() {
        let params = RunParams::new(5, 2, 4096, 1000).unwrap();
        let (sent, received) = Pair::default().run("measured", params);

        assert_eq!(sent.unwrap().len(), 5);
        let record = received.unwrap();
        assert_eq!(record.len(), 5);
        assert!(aggregate(record.samples(), 5, 4096).is_ok());
    }

    #[test]
    fn test_post_transfer_rendezvous_completes() {
        let params = RunParams::new(3, 1, 1024, 100).unwrap();
        let pair = Pair {
            post_transfer: true,
            ..Pair::default()
        };
        let (sent, received) = pair.run("post_transfer", params);
        assert_eq!(sent.unwrap().len(), 3);
        assert_eq!(received.unwrap().len(), 3);
    }

    #[test]
    fn test_chunk_larger_than_payload() {
        let params = RunParams::new(2, 0, 300, 1 << 20).unwrap();
        let (sent, received) = Pair::default().run("big_chunk", params);
        assert!(sent.is_ok());
        assert_eq!(received.unwrap().len(), 2);
    }

    #[test]
    fn test_corruption_in_measured_iteration_is_fatal() {
        // Two warmups of 100 bytes, then the first measured byte 37 is flipped.
        let params = RunParams::new(3, 2, 100, 32).unwrap();
        let pair = Pair {
            corrupt_at: Some(237),
            ..Pair::default()
        };
        let (_, received) = pair.run("corrupt", params);

        match received {
            Err(BenchError::Integrity {
                role: Role::Receiver,
                iteration: 2,
                source: IntegrityError::ContentMismatch { offset: 37, .. },
            }) => {}
            other => panic!("expected integrity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_corruption_in_warmup_is_ignored() {
        let params = RunParams::new(2, 1, 64, 16).unwrap();
        let pair = Pair {
            corrupt_at: Some(5),
            ..Pair::default()
        };
        let (_, received) = pair.run("warmup_corrupt", params);
        assert_eq!(received.unwrap().len(), 2);
    }

    #[test]
    fn test_early_close_in_warmup_fails_without_post_transfer_wait() {
        let params = RunParams::new(2, 1, 100, 16).unwrap();
        let pair = Pair {
            sender_budget: Some(32),
            post_transfer: true,
            ..Pair::default()
        };
        let (sent, received) = pair.run("warmup_close", params);

        assert!(matches!(
            sent,
            Err(BenchError::Transfer {
                role: Role::Sender,
                iteration: 0,
                ..
            })
        ));
        match received {
            Err(BenchError::Transfer {
                role: Role::Receiver,
                iteration: 0,
                source,
            }) => assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected transfer failure, got {:?}", other),
        }
    }

    #[test]
    fn test_early_close_in_measure_reports_short_payload() {
        for post_transfer in [false, true] {
            // One full warmup, then the sender stops 40 bytes into iteration 1.
            let params = RunParams::new(2, 1, 100, 16).unwrap();
            let pair = Pair {
                sender_budget: Some(140),
                post_transfer,
                ..Pair::default()
            };
            let tag = format!("measure_close_{}", post_transfer);
            let (sent, received) = pair.run(&tag, params);

            assert!(sent.is_err());
            let err = received.unwrap_err();
            assert!(sender_gone(&err));
            match err {
                BenchError::Integrity {
                    role: Role::Receiver,
                    iteration: 1,
                    source: IntegrityError::LengthMismatch {
                        expected: 100,
                        actual: 40,
                    },
                } => {}
                other => panic!("expected short payload, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_abandoned_rendezvous_names_role_and_iteration() {
        let name = barrier("abandoned");
        ProcessBarrier::clear(&name);
        let handle = ProcessBarrier::create(&name, PARTICIPANTS).unwrap();
        handle.abandon().unwrap();

        let err = rendezvous(&handle, Role::Receiver, 4).unwrap_err();
        assert!(sender_gone(&err));
        assert!(matches!(
            err,
            BenchError::Rendezvous {
                role: Role::Receiver,
                iteration: 4,
                source: BarrierError::Abandoned { .. },
            }
        ));
        assert!(err.to_string().contains("iteration 4"));
        ProcessBarrier::clear(&name);
    }

    #[test]
    fn test_sender_gone_classification() {
        let eof = transfer_error(
            Role::Receiver,
            0,
            io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
        );
        assert!(sender_gone(&eof));

        let invalid = transfer_error(
            Role::Receiver,
            0,
            io::Error::new(io::ErrorKind::InvalidData, "oversized"),
        );
        assert!(!sender_gone(&invalid));

        let corrupt = BenchError::Integrity {
            role: Role::Receiver,
            iteration: 0,
            source: IntegrityError::ContentMismatch {
                offset: 0,
                expected_crc: 1,
                actual_crc: 2,
            },
        };
        assert!(!sender_gone(&corrupt));
    }
}

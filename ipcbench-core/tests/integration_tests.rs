// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for ipcbench.
//!
//! These tests fork real sender processes and move real payloads through
//! every transport.

use std::io;
use std::time::Duration;

use ipcbench_core::protocol::two_process::run_two_process;
use ipcbench_core::transport::{
    ChunkSender, MmapTransport, MqTransport, PipeTransport, Transport, UdsTransport, Wakeup,
};
use ipcbench_core::{
    run_benchmark, run_mmap, run_mq, run_pipe, run_uds, BenchError, BenchResult, BenchmarkSpec,
    ConfigLoader, ProcessBarrier, ResourceName, Role, RunOutcome, RunParams, SharedMemoryRegion,
    TransportKind,
};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use tempfile::TempDir;

fn unique(tag: &str) -> ResourceName {
    ResourceName::new(format!("ipcbench_it_{}_{}", tag, std::process::id())).unwrap()
}

/// 1 MiB payload, 64 KiB chunks, 2 warmups, 5 measured iterations.
fn standard_params() -> RunParams {
    RunParams::new(5, 2, 1 << 20, 64 << 10).unwrap()
}

fn assert_sane(outcome: &RunOutcome, kind: TransportKind) {
    assert_eq!(outcome.kind, kind);
    assert_eq!(outcome.record.len(), 5);
    assert_eq!(outcome.params, standard_params());
    assert!(outcome.bandwidth.is_finite());
    assert!(outcome.bandwidth > 0.0);
}

/// Barrier across a real fork: both processes pass every cycle together.
#[test]
fn test_barrier_across_fork() {
    const CYCLES: u64 = 200;
    let name = unique("fork_barrier");
    ProcessBarrier::clear(&name);
    let parent = ProcessBarrier::create(&name, 2).unwrap();

    match unsafe { fork() }.expect("fork failed") {
        ForkResult::Child => {
            let code = match ProcessBarrier::create(&name, 2) {
                Ok(child) => {
                    if (0..CYCLES).all(|_| child.wait().is_ok()) {
                        0
                    } else {
                        1
                    }
                }
                Err(_) => 2,
            };
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            for _ in 0..CYCLES {
                parent.wait().unwrap();
            }
            assert!(matches!(
                waitpid(child, None).unwrap(),
                WaitStatus::Exited(_, 0)
            ));
        }
    }

    assert_eq!(parent.cycles(), CYCLES);
    assert_eq!(parent.arrived(), 0);
    assert!(ProcessBarrier::clear(&name));
}

#[test]
fn test_pipe_end_to_end() {
    let resource = unique("pipe");
    let outcome = run_pipe(&standard_params(), &resource).unwrap();
    assert_sane(&outcome, TransportKind::Pipe);
    // Barrier removed after the run.
    assert!(!ProcessBarrier::clear(&resource));
}

#[test]
fn test_uds_end_to_end() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let socket_path = temp_dir.path().join("bench.sock");
    let resource = unique("uds");

    let outcome = run_uds(&standard_params(), &resource, &socket_path).unwrap();
    assert_sane(&outcome, TransportKind::Uds);
    assert!(!socket_path.exists());
}

#[test]
fn test_mmap_end_to_end() {
    let resource = unique("mmap");
    let outcome = run_mmap(&standard_params(), &resource).unwrap();
    assert_sane(&outcome, TransportKind::Mmap);

    let data = resource.with_suffix("data").unwrap();
    assert!(!SharedMemoryRegion::unlink(data.as_str()));
}

#[test]
fn test_mq_end_to_end() {
    let resource = unique("mq");
    let outcome = run_mq(&standard_params(), &resource).unwrap();
    assert_sane(&outcome, TransportKind::Mq);
}

#[test]
fn test_uneven_chunks() {
    // Payload not a multiple of the chunk size, nor of the pattern period.
    let params = RunParams::new(3, 1, 100_003, 4096).unwrap();
    let outcome = run_pipe(&params, &unique("uneven")).unwrap();
    assert_eq!(outcome.record.len(), 3);
}

#[test]
fn test_stale_barrier_is_replaced() {
    let resource = unique("stale");
    ProcessBarrier::clear(&resource);
    // A leftover barrier with the wrong participant count from a crashed run.
    let _stale = ProcessBarrier::create(&resource, 3).unwrap();

    let outcome = run_pipe(&standard_params(), &resource).unwrap();
    assert_sane(&outcome, TransportKind::Pipe);
}

#[test]
fn test_invalid_params_rejected_before_fork() {
    let params = RunParams {
        measured_iterations: 0,
        warmup_iterations: 0,
        data_size: 1024,
        buffer_size: 64,
    };
    assert!(matches!(
        run_pipe(&params, &unique("invalid")),
        Err(BenchError::HardValidation(_))
    ));
}

#[test]
fn test_plan_runs_every_kind() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let socket_path = temp_dir.path().join("plan.sock");
    let pid = std::process::id();
    let yaml = format!(
        r#"
defaults:
  iterations: 2
  warmups: 1
  data_size: 256K
  buffer_size: 16K
  threads: 2
benchmarks:
  - kind: memcpy
  - kind: memcpy-mt
  - kind: pipe
    resource: ipcbench_plan_pipe_{pid}
  - kind: uds
    socket_path: {socket}
    resource: ipcbench_plan_uds_{pid}
  - kind: mmap
    resource: ipcbench_plan_mmap_{pid}
  - kind: mq
    resource: ipcbench_plan_mq_{pid}
"#,
        pid = pid,
        socket = socket_path.display()
    );

    let plan = ConfigLoader::load_string(&yaml).unwrap();
    let kinds: Vec<_> = plan.benchmarks.iter().map(|spec| spec.kind).collect();
    assert_eq!(kinds, TransportKind::ALL.to_vec());

    for spec in &plan.benchmarks {
        let outcome = run_benchmark(spec).unwrap();
        assert_eq!(outcome.record.len(), 2);
        assert!(outcome.record.total() > Duration::ZERO);
    }
}

#[test]
fn test_spec_builder_dispatch() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let spec = BenchmarkSpec::new(TransportKind::Uds, standard_params())
        .with_socket_path(temp_dir.path().join("builder.sock"))
        .with_resource(unique("builder"));
    assert_sane(&run_benchmark(&spec).unwrap(), TransportKind::Uds);
}

#[test]
fn test_chunk_larger_than_payload_end_to_end() {
    let params = RunParams::new(2, 1, 4096, 1 << 20).unwrap();
    let runs: [(&str, fn(&RunParams, &ResourceName) -> BenchResult<RunOutcome>); 3] = [
        ("big_pipe", run_pipe),
        ("big_mmap", run_mmap),
        ("big_mq", run_mq),
    ];
    for (tag, run) in runs {
        let outcome = run(&params, &unique(tag)).unwrap();
        assert_eq!(outcome.record.len(), 2);
    }
}

/// Wraps a transport so its sender fails after `budget` bytes in total.
struct FailingTransport<T> {
    inner: T,
    budget: usize,
}

struct FailingSender<S> {
    inner: S,
    left: usize,
}

impl<S: ChunkSender> ChunkSender for FailingSender<S> {
    fn connect(&mut self, iteration: u32) -> BenchResult<()> {
        self.inner.connect(iteration)
    }

    fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
        if self.left == 0 {
            return Err(io::Error::other("sender gave up"));
        }
        let len = chunk.len().min(self.left);
        let n = self.inner.send(&chunk[..len])?;
        self.left -= n;
        Ok(n)
    }

    fn disconnect(&mut self) -> BenchResult<()> {
        self.inner.disconnect()
    }
}

impl<T: Transport> Transport for FailingTransport<T> {
    type Sender = FailingSender<T::Sender>;
    type Receiver = T::Receiver;

    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn post_transfer_rendezvous(&self) -> bool {
        self.inner.post_transfer_rendezvous()
    }

    fn prepare(&mut self, params: &RunParams) -> BenchResult<()> {
        self.inner.prepare(params)
    }

    fn sender(&mut self) -> BenchResult<Self::Sender> {
        Ok(FailingSender {
            inner: self.inner.sender()?,
            left: self.budget,
        })
    }

    fn receiver(&mut self) -> BenchResult<Self::Receiver> {
        self.inner.receiver()
    }

    fn cleanup(&mut self) {
        self.inner.cleanup()
    }

    fn wakeup(&self) -> Wakeup {
        self.inner.wakeup()
    }
}

/// 64 KiB payload in 8 KiB chunks, one warmup.
fn failure_params() -> RunParams {
    RunParams::new(3, 1, 64 << 10, 8 << 10).unwrap()
}

/// Sender gives up 20 KiB into the first measured iteration.
const MID_MEASURE: usize = (64 << 10) + (20 << 10);

fn assert_sender_failed<T: Transport>(inner: T, budget: usize, resource: &ResourceName) {
    let transport = FailingTransport { inner, budget };
    match run_two_process(transport, resource, &failure_params()) {
        Err(BenchError::PeerFailed {
            role: Role::Sender,
            status,
        }) => assert!(status.contains("status 1"), "unexpected status: {}", status),
        other => panic!("expected sender failure, got {:?}", other),
    }
    assert!(!ProcessBarrier::clear(resource));
}

#[test]
fn test_pipe_sender_failure_is_reported() {
    assert_sender_failed(PipeTransport::new(), MID_MEASURE, &unique("fail_pipe"));
}

#[test]
fn test_uds_sender_failure_is_reported() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let socket_path = temp_dir.path().join("fail.sock");

    // Mid-measure, and mid-warmup where the post-transfer rendezvous comes first.
    assert_sender_failed(
        UdsTransport::new(&socket_path),
        MID_MEASURE,
        &unique("fail_uds"),
    );
    assert_sender_failed(
        UdsTransport::new(&socket_path),
        20 << 10,
        &unique("fail_uds_warmup"),
    );
    assert!(!socket_path.exists());
}

#[test]
fn test_mmap_sender_failure_is_reported() {
    let resource = unique("fail_mmap");
    assert_sender_failed(MmapTransport::new(&resource).unwrap(), MID_MEASURE, &resource);
}

#[test]
fn test_mq_sender_failure_is_reported() {
    let resource = unique("fail_mq");
    assert_sender_failed(
        MqTransport::new(resource.with_suffix("queue").unwrap()),
        MID_MEASURE,
        &resource,
    );
}

#[test]
fn test_sender_that_never_sends_is_reported() {
    let resource = unique("fail_mq_silent");
    assert_sender_failed(
        MqTransport::new(resource.with_suffix("queue").unwrap()),
        0,
        &resource,
    );
}

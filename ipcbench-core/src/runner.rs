// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! One entry point per mechanism, plus dispatch on [`TransportKind`].

use std::path::Path;

use crate::config::BenchmarkSpec;
use crate::error::BenchResult;
use crate::protocol::two_process::run_two_process;
use crate::protocol::{RunOutcome, RunParams};
use crate::transport::{MmapTransport, MqTransport, PipeTransport, UdsTransport};
use crate::types::{ResourceName, TransportKind};

pub use crate::protocol::local::{run_memcpy, run_memcpy_mt};

/// Anonymous pipe, barrier `resource`.
pub fn run_pipe(params: &RunParams, resource: &ResourceName) -> BenchResult<RunOutcome> {
    run_two_process(PipeTransport::new(), resource, params)
}

/// Unix domain socket at `socket_path`, barrier `resource`.
pub fn run_uds(
    params: &RunParams,
    resource: &ResourceName,
    socket_path: &Path,
) -> BenchResult<RunOutcome> {
    run_two_process(UdsTransport::new(socket_path), resource, params)
}

/// Shared mapping. The data region and chunk barrier are named after `resource`.
pub fn run_mmap(params: &RunParams, resource: &ResourceName) -> BenchResult<RunOutcome> {
    run_two_process(MmapTransport::new(resource)?, resource, params)
}

/// POSIX message queue named `<resource>_queue`.
pub fn run_mq(params: &RunParams, resource: &ResourceName) -> BenchResult<RunOutcome> {
    run_two_process(MqTransport::new(resource.with_suffix("queue")?), resource, params)
}

/// Run whatever `spec` describes.
pub fn run_benchmark(spec: &BenchmarkSpec) -> BenchResult<RunOutcome> {
    tracing::info!(
        benchmark = %spec.kind,
        resource = %spec.resource,
        iterations = spec.params.measured_iterations,
        warmups = spec.params.warmup_iterations,
        data_size = spec.params.data_size,
        buffer_size = spec.params.buffer_size,
        "Running benchmark"
    );

    match spec.kind {
        TransportKind::Memcpy => run_memcpy(&spec.params),
        TransportKind::MemcpyMt => run_memcpy_mt(&spec.params, spec.threads),
        TransportKind::Pipe => run_pipe(&spec.params, &spec.resource),
        TransportKind::Uds => run_uds(&spec.params, &spec.resource, &spec.socket_path),
        TransportKind::Mmap => run_mmap(&spec.params, &spec.resource),
        TransportKind::Mq => run_mq(&spec.params, &spec.resource),
    }
}

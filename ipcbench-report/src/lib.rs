// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ipcbench Reporting
//!
//! Turns benchmark outcomes into serializable results and persists them as
//! JSON, together with a description of the machine they were measured on.
//!
//! # Data Output
//!
//! Every report is one JSON file per invocation, named after its timestamp.

pub mod metrics;
pub mod reporter;

pub use metrics::{BandwidthMetrics, BenchmarkReport, BenchmarkResult, SystemInfo};
pub use reporter::{JsonReporter, ReporterError};

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory primitives.
//!
//! Named POSIX shared memory regions and the sense-reversing barrier built on
//! top of them. Both outlive the processes that map them and are removed
//! explicitly between benchmark runs.

mod barrier;
mod region;

pub use barrier::ProcessBarrier;
pub use region::SharedMemoryRegion;

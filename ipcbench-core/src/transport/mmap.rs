// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory mapping transport.
//!
//! The sender copies each chunk into a named data region and the receiver
//! copies it back out. A two-party chunk barrier orders the handoff: one
//! rendezvous after the chunk is published, one after it has been consumed.
//! A receiver finds the channel closed once the chunk barrier is abandoned.
//!
//! Data region layout:
//!
//! ```text
//! [0..8)    chunk length (u64, written by the sender)
//! [8..64)   reserved
//! [64..)    chunk bytes, `chunk_size` capacity
//! ```

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BarrierError, BenchError, BenchResult};
use crate::protocol::RunParams;
use crate::shm::{ProcessBarrier, SharedMemoryRegion};
use crate::transport::{ChunkReceiver, ChunkSender, Transport, Wakeup};
use crate::types::{ResourceName, TransportKind};

const HEADER_SIZE: usize = 64;

/// Writer and reader.
const CHUNK_PARTIES: u32 = 2;

pub struct MmapTransport {
    data_name: ResourceName,
    chunk_name: ResourceName,
    region: Option<SharedMemoryRegion>,
    chunk_barrier: Option<ProcessBarrier>,
}

impl MmapTransport {
    /// Derives `<resource>_data` and `<resource>_chunk` from the run's resource name.
    pub fn new(resource: &ResourceName) -> BenchResult<Self> {
        Ok(Self {
            data_name: resource.with_suffix("data")?,
            chunk_name: resource.with_suffix("chunk")?,
            region: None,
            chunk_barrier: None,
        })
    }

    fn channel(&mut self) -> BenchResult<MappedChannel> {
        let region = self
            .region
            .take()
            .ok_or_else(|| BenchError::setup("mmap", "data region missing (prepare not called?)"))?;
        let barrier = self
            .chunk_barrier
            .take()
            .ok_or_else(|| BenchError::setup("mmap", "chunk barrier missing (prepare not called?)"))?;
        let capacity = region.size() - HEADER_SIZE;
        Ok(MappedChannel {
            region,
            barrier,
            capacity,
        })
    }
}

impl Transport for MmapTransport {
    type Sender = MmapSender;
    type Receiver = MmapReceiver;

    fn kind(&self) -> TransportKind {
        TransportKind::Mmap
    }

    fn prepare(&mut self, params: &RunParams) -> BenchResult<()> {
        SharedMemoryRegion::unlink(self.data_name.as_str());
        ProcessBarrier::clear(&self.chunk_name);

        // Both mappings are MAP_SHARED, so the forked child inherits them.
        self.region = Some(SharedMemoryRegion::create(
            self.data_name.as_str(),
            HEADER_SIZE + params.chunk_size(),
        )?);
        self.chunk_barrier = Some(ProcessBarrier::create(&self.chunk_name, CHUNK_PARTIES)?);
        Ok(())
    }

    fn sender(&mut self) -> BenchResult<MmapSender> {
        Ok(MmapSender {
            channel: self.channel()?,
        })
    }

    fn receiver(&mut self) -> BenchResult<MmapReceiver> {
        Ok(MmapReceiver {
            channel: self.channel()?,
        })
    }

    fn cleanup(&mut self) {
        self.region = None;
        self.chunk_barrier = None;
        SharedMemoryRegion::unlink(self.data_name.as_str());
        ProcessBarrier::clear(&self.chunk_name);
    }

    fn wakeup(&self) -> Wakeup {
        Wakeup::Barrier(self.chunk_name.clone())
    }
}

/// One role's view of the data region plus the chunk barrier.
struct MappedChannel {
    region: SharedMemoryRegion,
    barrier: ProcessBarrier,
    capacity: usize,
}

impl MappedChannel {
    fn chunk_len(&self) -> &AtomicU64 {
        // SAFETY: the region starts page aligned and is at least HEADER_SIZE long
        unsafe { &*(self.region.as_ptr() as *const AtomicU64) }
    }

    fn data(&self) -> *mut u8 {
        // SAFETY: HEADER_SIZE is within the mapping
        unsafe { self.region.as_ptr().add(HEADER_SIZE) }
    }

    fn rendezvous(&self) -> Result<(), BarrierError> {
        self.barrier.wait()
    }
}

pub struct MmapSender {
    channel: MappedChannel,
}

impl ChunkSender for MmapSender {
    fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let channel = &self.channel;
        let len = chunk.len().min(channel.capacity);

        // SAFETY: the reader only touches the data area between the publish
        // and consume rendezvous, and len fits the capacity.
        unsafe { std::ptr::copy_nonoverlapping(chunk.as_ptr(), channel.data(), len) };
        channel.chunk_len().store(len as u64, Ordering::Release);

        channel.rendezvous().map_err(io::Error::other)?;
        channel.rendezvous().map_err(io::Error::other)?;
        Ok(len)
    }
}

pub struct MmapReceiver {
    channel: MappedChannel,
}

impl ChunkReceiver for MmapReceiver {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let channel = &self.channel;
        match channel.rendezvous() {
            Ok(()) => {}
            Err(BarrierError::Abandoned { .. }) => return Ok(0),
            Err(e) => return Err(io::Error::other(e)),
        }

        let len = channel.chunk_len().load(Ordering::Acquire) as usize;
        if len > buf.len() || len > channel.capacity {
            // Release the writer before failing.
            channel.rendezvous().map_err(io::Error::other)?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("chunk of {} bytes exceeds {} byte window", len, buf.len()),
            ));
        }

        // SAFETY: the writer is parked at the consume rendezvous until we arrive.
        unsafe { std::ptr::copy_nonoverlapping(channel.data(), buf.as_mut_ptr(), len) };

        // The chunk is already copied out; an abandoned barrier only means the
        // next receive reports closure.
        match channel.rendezvous() {
            Ok(()) | Err(BarrierError::Abandoned { .. }) => Ok(len),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Anonymous pipe transport.
//!
//! The pipe is created before fork; the child keeps the write end and the
//! parent the read end for the whole run.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;

use crate::error::{BenchError, BenchResult};
use crate::protocol::RunParams;
use crate::transport::{ChunkReceiver, ChunkSender, Transport};
use crate::types::TransportKind;

#[derive(Default)]
pub struct PipeTransport {
    read_end: Option<OwnedFd>,
    write_end: Option<OwnedFd>,
}

impl PipeTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for PipeTransport {
    type Sender = PipeSender;
    type Receiver = PipeReceiver;

    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    fn prepare(&mut self, _params: &RunParams) -> BenchResult<()> {
        let (read_end, write_end) =
            nix::unistd::pipe().map_err(|e| BenchError::syscall("pipe", e))?;
        self.read_end = Some(read_end);
        self.write_end = Some(write_end);
        Ok(())
    }

    fn sender(&mut self) -> BenchResult<PipeSender> {
        // The read end must be closed here, or the parent never sees EOF.
        drop(self.read_end.take());
        let fd = self
            .write_end
            .take()
            .ok_or_else(|| BenchError::setup("pipe", "write end missing (prepare not called?)"))?;
        Ok(PipeSender {
            file: File::from(fd),
        })
    }

    fn receiver(&mut self) -> BenchResult<PipeReceiver> {
        drop(self.write_end.take());
        let fd = self
            .read_end
            .take()
            .ok_or_else(|| BenchError::setup("pipe", "read end missing (prepare not called?)"))?;
        Ok(PipeReceiver {
            file: File::from(fd),
        })
    }

    fn cleanup(&mut self) {
        self.read_end = None;
        self.write_end = None;
    }
}

pub struct PipeSender {
    file: File,
}

impl ChunkSender for PipeSender {
    fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
        loop {
            match self.file.write(chunk) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

pub struct PipeReceiver {
    file: File,
}

impl ChunkReceiver for PipeReceiver {
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

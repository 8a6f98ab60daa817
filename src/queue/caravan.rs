// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Caravan gather buffers.
//!
//! On non-admin queues, send-side emissions are not handed to the socket
//! one by one; segment references accumulate in a caravan and drain as a
//! single vectored write. Two caravans run per queue: C1 carries data PDUs,
//! read payload pages and write-command responses and is sized so several
//! full read replies coalesce; C2 carries only short control headers (R2T
//! and read responses) so a long read stream cannot delay a pending R2T.
//!
//! Appending a response transfers commit-on-flush ownership of the command
//! to the caravan: the slot returns to the free list only after the bytes
//! referencing its buffers have fully left the socket. A partially-written
//! caravan retains its unsent tail and re-flushes; nothing is dropped.

use std::{collections::VecDeque, io, io::IoSlice};

use bytes::{Buf, Bytes};
use tracing::trace;

use crate::queue::SEND_BUDGET;

/// Byte capacity of C1 (data-bearing traffic).
pub const C1_CAPACITY: usize = 65536;

/// Byte capacity of C2 (control-only traffic).
pub const C2_CAPACITY: usize = 256;

/// Per-batch segment cap.
pub const MAX_SEGMENTS: usize = 3 * SEND_BUDGET;

/// Anything that accepts a non-blocking vectored write. Seam for tests;
/// the real sink is a `tokio::net::TcpStream`.
pub trait VectoredSink {
    fn try_write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;
}

impl VectoredSink for tokio::net::TcpStream {
    fn try_write_vectored(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        tokio::net::TcpStream::try_write_vectored(self, bufs)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing buffered.
    Idle,
    /// Fully drained; these commands are released.
    Sent(Vec<u16>),
    /// Socket would block; unsent tail retained.
    Blocked,
}

#[derive(Debug)]
pub struct Caravan {
    name: &'static str,
    capacity: usize,
    segs: VecDeque<Bytes>,
    len: usize,
    owners: Vec<u16>,
    pages: usize,
    send_now: bool,
    /// A flush came up short; no appends until the tail is out.
    draining: bool,
}

impl Caravan {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Caravan {
            name,
            capacity,
            segs: VecDeque::new(),
            len: 0,
            owners: Vec::new(),
            pages: 0,
            send_now: false,
            draining: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    #[inline]
    pub fn send_now(&self) -> bool {
        self.send_now
    }

    #[inline]
    pub fn segments(&self) -> usize {
        self.segs.len()
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
            || self.segs.len() >= MAX_SEGMENTS
            || self.owners.len() >= SEND_BUDGET
            || self.pages >= SEND_BUDGET
    }

    /// Append one segment. On refusal the segment comes back untouched and
    /// the caller leaves its send-state where it was; `send_now` is latched
    /// so the scheduler flushes before making more progress.
    pub fn try_append(&mut self, seg: Bytes, is_page: bool) -> Result<(), Bytes> {
        if seg.is_empty() {
            return Ok(());
        }
        if self.draining || self.is_full() {
            self.send_now = true;
            return Err(seg);
        }
        self.len += seg.len();
        if is_page {
            self.pages += 1;
        }
        self.segs.push_back(seg);
        Ok(())
    }

    /// Transfer commit-on-flush ownership of a command to this caravan.
    pub fn add_owner(&mut self, tag: u16) {
        self.owners.push(tag);
    }

    /// Drain as one vectored write per attempt until empty or the socket
    /// pushes back.
    pub fn flush(&mut self, sink: &impl VectoredSink) -> io::Result<FlushOutcome> {
        if self.segs.is_empty() {
            return Ok(FlushOutcome::Idle);
        }
        loop {
            let slices: Vec<IoSlice<'_>> =
                self.segs.iter().map(|b| IoSlice::new(b)).collect();
            match sink.try_write_vectored(&slices) {
                Ok(0) => {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                },
                Ok(n) => {
                    trace!(caravan = self.name, sent = n, left = self.len - n, "flush");
                    self.advance(n);
                    if self.segs.is_empty() {
                        self.len = 0;
                        self.pages = 0;
                        self.send_now = false;
                        self.draining = false;
                        return Ok(FlushOutcome::Sent(std::mem::take(&mut self.owners)));
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.send_now = true;
                    self.draining = true;
                    return Ok(FlushOutcome::Blocked);
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn advance(&mut self, mut n: usize) {
        self.len -= n;
        while n > 0 {
            let Some(front) = self.segs.front_mut() else {
                return;
            };
            if front.len() <= n {
                n -= front.len();
                self.segs.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
    }
}

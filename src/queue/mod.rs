// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod caravan;
pub mod queue;
pub mod recv;
pub mod sched;
pub mod send;
pub mod sg;
pub mod slot;

use thiserror::Error;

/// Receive-side budget of one scheduling pass.
pub const RECV_BUDGET: usize = 16;

/// Send-side budget of one scheduling pass.
pub const SEND_BUDGET: usize = 16;

/// Total operations a worker performs before it must requeue itself.
pub const IO_WORK_BUDGET: usize = 64;

/// Everything that can take a queue down (or make it yield).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("header digest mismatch: got {got:#010x}, want {want:#010x}")]
    HeaderDigest { got: u32, want: u32 },
    #[error("data digest mismatch: got {got:#010x}, want {want:#010x}")]
    DataDigest { got: u32, want: u32 },
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("command slots exhausted")]
    SlotsExhausted,
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Peer-initiated shutdowns are torn down quietly; everything else is a
    /// fatal error the controller hears about.
    pub fn is_peer_close(&self) -> bool {
        match self {
            QueueError::PeerClosed => true,
            QueueError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Process-wide queue bookkeeping.
//!
//! The queue list and id allocator are shared state passed in at
//! construction rather than ambient singletons; ports register accepted
//! connections here and the admin surface tears controllers down through
//! it.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shared view of one live queue.
#[derive(Debug)]
pub struct QueueHandle {
    pub id: u32,
    pub peer: SocketAddr,
    /// Controller id, bound once the Connect on this queue completes.
    pub cntlid: OnceCell<u16>,
    /// Cancelling tears the queue down through its own worker.
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct Registry {
    queues: DashMap<u32, std::sync::Arc<QueueHandle>>,
    next_id: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: SocketAddr) -> std::sync::Arc<QueueHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = std::sync::Arc::new(QueueHandle {
            id,
            peer,
            cntlid: OnceCell::new(),
            cancel: CancellationToken::new(),
        });
        self.queues.insert(id, std::sync::Arc::clone(&handle));
        debug!(queue = id, %peer, "queue registered");
        handle
    }

    pub fn remove(&self, id: u32) {
        if self.queues.remove(&id).is_some() {
            debug!(queue = id, "queue removed");
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Tears down every queue belonging to `cntlid`. Returns how many were
    /// signalled.
    pub fn delete_ctrl(&self, cntlid: u16) -> usize {
        let mut n = 0;
        for entry in self.queues.iter() {
            if entry.value().cntlid.get() == Some(&cntlid) {
                entry.value().cancel.cancel();
                n += 1;
            }
        }
        n
    }

    /// Signals every queue to disconnect.
    pub fn shutdown_all(&self) {
        for entry in self.queues.iter() {
            entry.value().cancel.cancel();
        }
    }
}

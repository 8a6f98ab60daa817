// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Queue scheduler.
//!
//! One cooperative worker per queue drives both state machines under a
//! work budget, requeues itself while progress is pending, and otherwise
//! parks on socket readiness, the completion inbox, or cancellation. All
//! state-machine progress, caravan manipulation and socket I/O happen from
//! this worker.

use tokio::io::{AsyncWriteExt, Interest};
use tracing::{debug, info, warn};

use crate::queue::{
    IO_WORK_BUDGET, QueueError, RECV_BUDGET, SEND_BUDGET,
    queue::{Queue, QueueState},
    recv::RecvState,
};

impl Queue {
    /// Worker entry point; runs until peer close, fatal error or
    /// cancellation, then releases the queue.
    pub async fn run(mut self) {
        match self.io_loop().await {
            Ok(()) => {
                debug!(queue = self.handle.id, "queue disconnecting");
            },
            Err(e) if e.is_peer_close() => {
                info!(queue = self.handle.id, "peer closed connection");
            },
            Err(e) => {
                self.recv.state = RecvState::Err;
                warn!(queue = self.handle.id, error = %e, "fatal queue error");
                if let Some(&cntlid) = self.handle.cntlid.get() {
                    self.executor.ctrl_fatal_error(cntlid);
                }
            },
        }
        self.release().await;
    }

    async fn io_loop(&mut self) -> Result<(), QueueError> {
        loop {
            if self.handle.cancel.is_cancelled() {
                self.state = QueueState::Disconnecting;
                return Ok(());
            }

            let mut ops = 0usize;
            let mut pending;
            loop {
                pending = false;
                if self.try_recv(RECV_BUDGET, &mut ops).await? > 0 {
                    pending = true;
                }
                if self.try_send(SEND_BUDGET, &mut ops)? > 0 {
                    pending = true;
                }
                if !pending || ops >= IO_WORK_BUDGET {
                    break;
                }
            }
            if pending {
                // Budget exhausted with work left: requeue behind other
                // tasks on this worker thread.
                tokio::task::yield_now().await;
                continue;
            }

            let interest = if self.want_space {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            tokio::select! {
                _ = self.handle.cancel.cancelled() => {
                    self.state = QueueState::Disconnecting;
                    return Ok(());
                },
                _ = self.inbox.notified() => {},
                ready = self.sock.ready(interest) => {
                    let ready = ready?;
                    if ready.is_writable() {
                        self.want_space = false;
                    }
                },
            }
        }
    }

    /// Converging teardown path: stop I/O, drop in-flight commands with
    /// their buffers, destroy the submission queue, release the socket and
    /// unregister.
    async fn release(mut self) {
        self.state = QueueState::Disconnecting;
        if let Some(qid) = self.qid {
            self.executor.sq_destroy(qid);
        }
        let _ = self.sock.shutdown().await;
        self.registry.remove(self.handle.id);
        debug!(queue = self.handle.id, cpu = self.cpu, "queue released");
    }
}

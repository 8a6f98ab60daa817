// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Boundary to the NVMe command executor.
//!
//! The queue engine never performs block I/O itself; it validates and
//! frames. An executor implementation receives ownership of the request
//! payload and completes from any context through a [`Completion`], which
//! lands on the owning queue's [`CompletionInbox`] and wakes its worker.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::{models::nvme::{NvmeCqe, NvmeSqe}, queue::sg::SgList};

/// Data direction of a command, from the target's point of view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransferDir {
    #[default]
    None,
    /// Write: payload flows host → controller.
    HostToController,
    /// Read: payload flows controller → host.
    ControllerToHost,
}

/// What `req_init` learned about a command.
#[derive(Debug, Clone, Copy)]
pub struct ReqShape {
    pub dir: TransferDir,
    pub transfer_len: usize,
}

/// Submission queue geometry reported by a completed Fabrics Connect.
/// The engine provisions `2 × size` command slots on install.
#[derive(Debug, Clone, Copy)]
pub struct SqInstall {
    pub qid: u16,
    pub size: u16,
    pub cntlid: u16,
}

/// One drained inbox entry.
#[derive(Debug)]
pub struct Executed {
    pub slot: u16,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub enum Outcome {
    /// A completion from the executor (or a synchronous failure from the
    /// engine itself): completion entry, read payload, and optionally the
    /// queue geometry a Connect established.
    Response {
        cqe: NvmeCqe,
        data: SgList,
        install: Option<SqInstall>,
    },
    /// The engine asks its own send machine to solicit write payload.
    SolicitData,
}

/// Concurrent hand-off between executor threads and the queue worker.
///
/// Producers only push and wake; the worker drains the whole backlog in one
/// step. Entries come back in arrival order for the drained batch, which is
/// all the ordering the send list guarantees.
#[derive(Debug, Default)]
pub struct CompletionInbox {
    entries: Mutex<Vec<Executed>>,
    wake: Notify,
}

impl CompletionInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, e: Executed) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.push(e);
        }
        self.wake.notify_one();
    }

    pub fn drain(&self) -> Vec<Executed> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *entries)
    }

    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

/// Completion handle handed to the executor along with the request.
#[derive(Debug, Clone)]
pub struct Completion {
    inbox: Arc<CompletionInbox>,
    slot: u16,
}

impl Completion {
    pub fn new(inbox: Arc<CompletionInbox>, slot: u16) -> Self {
        Self { inbox, slot }
    }

    /// May be called from any thread; enqueues and wakes the queue worker.
    pub fn complete(self, cqe: NvmeCqe, data: SgList, install: Option<SqInstall>) {
        self.inbox.push(Executed {
            slot: self.slot,
            outcome: Outcome::Response { cqe, data, install },
        });
    }
}

/// An in-flight request handed to the executor. Payload ownership moves
/// with it; read completions bring payload back through [`Completion`].
#[derive(Debug)]
pub struct ExecRequest {
    /// Queue the command arrived on; `None` until the Connect installs it.
    pub qid: Option<u16>,
    pub sqe: NvmeSqe,
    /// Write payload, fully received.
    pub data: SgList,
    pub done: Completion,
}

pub trait CommandExecutor: Send + Sync + 'static {
    /// Validate a command and report its data-transfer shape. `Err` carries
    /// the NVMe status to fail the command with; the engine still drains
    /// any inline payload before responding.
    fn req_init(&self, qid: Option<u16>, sqe: &NvmeSqe) -> Result<ReqShape, u16>;

    /// Execute asynchronously; completion flows back through `req.done`.
    fn req_execute(&self, req: ExecRequest);

    /// A queue whose submission queue was installed is going away.
    fn sq_destroy(&self, qid: u16) {
        let _ = qid;
    }

    /// A queue hit a fatal protocol or digest error.
    fn ctrl_fatal_error(&self, cntlid: u16) {
        let _ = cntlid;
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection queue state.
//!
//! One [`Queue`] owns the socket, both state machines, the slot pool and
//! the caravans. All mutation happens from the queue's own worker task;
//! socket readiness and executor completions only enqueue and wake.

use std::sync::Arc;

use tracing::debug;

use crate::{
    cfg::config::Config,
    models::nvme::NvmeCqe,
    queue::{
        caravan::{C1_CAPACITY, C2_CAPACITY, Caravan},
        recv::RecvScratch,
        sg::SgList,
        slot::SlotPool,
    },
    target::{
        executor::{
            CommandExecutor, Completion, CompletionInbox, ExecRequest, Executed,
            Outcome, SqInstall,
        },
        registry::{QueueHandle, Registry},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Connecting,
    Live,
    Disconnecting,
}

pub struct Queue {
    pub(crate) sock: tokio::net::TcpStream,
    pub(crate) cfg: Arc<Config>,
    pub(crate) state: QueueState,
    /// Submission queue id; `None` until the Connect installs it. qid 0 is
    /// the admin queue and bypasses the caravans.
    pub(crate) qid: Option<u16>,
    pub(crate) hdgst: bool,
    pub(crate) ddgst: bool,
    pub(crate) pool: SlotPool,
    pub(crate) inbox: Arc<CompletionInbox>,
    pub(crate) send_list: std::collections::VecDeque<u16>,
    /// Command currently owned by the send machine.
    pub(crate) snd: Option<u16>,
    pub(crate) c1: Caravan,
    pub(crate) c2: Caravan,
    pub(crate) recv: RecvScratch,
    /// Send side hit a full socket buffer; rearm on write-space.
    pub(crate) want_space: bool,
    pub(crate) handle: Arc<QueueHandle>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    /// Placement hint assigned by the port's rotating cursor.
    pub(crate) cpu: usize,
}

impl Queue {
    pub fn new(
        sock: tokio::net::TcpStream,
        cfg: Arc<Config>,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<Registry>,
        handle: Arc<QueueHandle>,
        cpu: usize,
    ) -> Self {
        Queue {
            sock,
            cfg,
            state: QueueState::Connecting,
            qid: None,
            hdgst: false,
            ddgst: false,
            pool: SlotPool::new(),
            inbox: Arc::new(CompletionInbox::new()),
            send_list: std::collections::VecDeque::new(),
            snd: None,
            c1: Caravan::new("c1", C1_CAPACITY),
            c2: Caravan::new("c2", C2_CAPACITY),
            recv: RecvScratch::new(),
            want_space: false,
            handle,
            registry,
            executor,
            cpu,
        }
    }

    /// Admin and not-yet-connected queues write straight to the socket.
    #[inline]
    pub(crate) fn is_direct(&self) -> bool {
        matches!(self.qid, None | Some(0))
    }

    /// Return a finished command to the free list.
    pub(crate) fn release_slot(&mut self, tag: u16) {
        let slot = self.pool.slot_mut(tag);
        slot.read_data = SgList::empty();
        slot.pending_emit = None;
        self.pool.put(tag);
    }

    /// Synchronous failure path: complete the command with `status` without
    /// involving the executor.
    pub(crate) fn push_error_response(&mut self, tag: u16, status: u16) {
        let slot = self.pool.slot(tag);
        let mut cqe = NvmeCqe::for_command(&slot.sqe, self.qid.unwrap_or(0));
        cqe.set_status(status);
        self.inbox.push(Executed {
            slot: tag,
            outcome: Outcome::Response {
                cqe,
                data: SgList::empty(),
                install: None,
            },
        });
    }

    /// Ask the send machine to solicit the rest of a write payload.
    pub(crate) fn push_solicit(&mut self, tag: u16) {
        self.pool.slot_mut(tag).r2t_outstanding = true;
        self.inbox.push(Executed {
            slot: tag,
            outcome: Outcome::SolicitData,
        });
    }

    /// Hand a fully-received command to the executor.
    pub(crate) fn execute_slot(&mut self, tag: u16) {
        let qid = self.qid;
        let inbox = Arc::clone(&self.inbox);
        let slot = self.pool.slot_mut(tag);
        let data = std::mem::take(&mut slot.data).freeze();
        let req = ExecRequest {
            qid,
            sqe: slot.sqe.clone(),
            data,
            done: Completion::new(inbox, tag),
        };
        self.executor.req_execute(req);
    }

    /// Provision the slot pool from a completed Connect.
    pub(crate) fn apply_install(&mut self, install: SqInstall) {
        if self.pool.installed() {
            debug!(queue = self.handle.id, "duplicate sq install ignored");
            return;
        }
        let nr_cmds = install.size.saturating_mul(2);
        self.pool.install(nr_cmds);
        self.qid = Some(install.qid);
        let _ = self.handle.cntlid.set(install.cntlid);
        debug!(
            queue = self.handle.id,
            qid = install.qid,
            nr_cmds,
            cntlid = install.cntlid,
            "sq installed"
        );
    }
}

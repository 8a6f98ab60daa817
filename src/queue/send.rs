// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Send state machine.
//!
//! A read walks `SendDataPdu → SendData → (SendDdgst) → SendResponse`; a
//! solicited write emits a single `SendR2t`; everything else goes straight
//! to `SendResponse`. On I/O queues each emission is appended to a caravan
//! (C1 for data-bearing traffic and write responses, C2 for R2T and read
//! responses); the admin queue writes directly to the socket. A refused
//! caravan append leaves the command's state untouched so the scheduler
//! can flush and retry.

use bytes::Bytes;
use tracing::trace;
use zerocopy::IntoBytes;

use crate::{
    models::{
        capsule::response::RspCapsuleBuilder,
        common::DIGEST_LEN,
        data::response::C2HDataBuilder,
        digest::header_digest,
        r2t::response::R2tBuilder,
    },
    queue::{
        QueueError,
        caravan::FlushOutcome,
        queue::Queue,
        slot::{SendState, Slot},
    },
    target::executor::{Executed, Outcome, TransferDir},
};

impl Queue {
    /// Runs the send machine up to `budget` command emissions, flushing the
    /// caravans on a latched `send_now`, on a non-positive progress report,
    /// and on the last budget iteration.
    pub(crate) fn try_send(
        &mut self,
        budget: usize,
        ops: &mut usize,
    ) -> Result<i32, QueueError> {
        let mut progressed = false;
        for i in 0..budget {
            let ret = self.send_one()?;
            if ret > 0 {
                progressed = true;
                *ops += 1;
            }
            let force = ret <= 0 || i + 1 == budget;
            // Bytes leaving in a flush count as progress too, so a command
            // rolled back on a full caravan gets retried next pass instead
            // of stranding the worker.
            if self.flush_caravan(true, force)? {
                progressed = true;
            }
            if self.flush_caravan(false, force)? {
                progressed = true;
            }
            if ret <= 0 {
                break;
            }
        }
        Ok(progressed as i32)
    }

    fn flush_caravan(&mut self, first: bool, force: bool) -> Result<bool, QueueError> {
        let c = if first { &mut self.c1 } else { &mut self.c2 };
        if c.is_empty() || !(c.send_now() || force) {
            return Ok(false);
        }
        let before = c.len();
        let outcome = c.flush(&self.sock)?;
        let progressed = match &outcome {
            FlushOutcome::Sent(_) => true,
            _ => c.len() < before,
        };
        match outcome {
            FlushOutcome::Idle => {},
            FlushOutcome::Blocked => {
                self.want_space = true;
            },
            FlushOutcome::Sent(owners) => {
                for tag in owners {
                    self.release_slot(tag);
                }
            },
        }
        Ok(progressed)
    }

    /// Fetch a command if none is held, then walk it through as many of
    /// its stages as the socket and caravans accept.
    fn send_one(&mut self) -> Result<i32, QueueError> {
        if self.snd.is_none() {
            self.fetch_cmd();
        }
        let Some(tag) = self.snd else {
            return Ok(0);
        };

        if self.pool.slot(tag).send_state == SendState::DataPdu
            && self.send_data_pdu(tag)? == 0
        {
            return Ok(0);
        }
        if self.pool.slot(tag).send_state == SendState::Data
            && self.send_data(tag)? == 0
        {
            return Ok(0);
        }
        if self.pool.slot(tag).send_state == SendState::Ddgst
            && self.send_ddgst(tag)? == 0
        {
            return Ok(0);
        }
        if self.pool.slot(tag).send_state == SendState::R2t {
            return self.send_r2t(tag);
        }
        if self.pool.slot(tag).send_state == SendState::Response {
            return self.send_response(tag);
        }
        Ok(1)
    }

    /// Drain the completion inbox into the ordered send list and pop its
    /// head. Completion order across drains is not strictly per-command
    /// monotonic; within one drain, arrival order is kept.
    fn fetch_cmd(&mut self) {
        for e in self.inbox.drain() {
            let Executed { slot: tag, outcome } = e;
            match outcome {
                Outcome::SolicitData => {
                    self.pool.slot_mut(tag).send_state = SendState::R2t;
                },
                Outcome::Response { cqe, data, install } => {
                    if let Some(install) = install {
                        self.apply_install(install);
                    }
                    let ddgst = self.ddgst;
                    let slot = self.pool.slot_mut(tag);
                    let has_read_data = slot.dir == TransferDir::ControllerToHost
                        && cqe.is_success()
                        && !data.is_empty();
                    slot.cqe = cqe;
                    slot.read_data = data;
                    slot.cur_sg = 0;
                    slot.wbytes_done = 0;
                    slot.send_state = if has_read_data {
                        if ddgst {
                            slot.out_ddgst = slot.read_data.crc32c();
                        }
                        SendState::DataPdu
                    } else {
                        SendState::Response
                    };
                },
            }
            self.send_list.push_back(tag);
        }
        self.snd = self.send_list.pop_front();
    }

    fn send_data_pdu(&mut self, tag: u16) -> Result<i32, QueueError> {
        if self.is_direct() {
            self.ensure_data_pdu_built(tag);
            if self.write_direct(tag)? == 0 {
                return Ok(0);
            }
        } else {
            self.ensure_data_pdu_built(tag);
            let slot = self.pool.slot_mut(tag);
            let Some(bytes) = slot.pending_emit.take() else {
                return Err(QueueError::Protocol("missing data pdu image".into()));
            };
            if let Err(back) = self.c1.try_append(bytes, false) {
                self.pool.slot_mut(tag).pending_emit = Some(back);
                return Ok(0);
            }
        }
        self.pool.slot_mut(tag).send_state = SendState::Data;
        Ok(1)
    }

    fn send_data(&mut self, tag: u16) -> Result<i32, QueueError> {
        if self.is_direct() {
            loop {
                let slot = self.pool.slot_mut(tag);
                if slot.cur_sg == slot.read_data.segments().len() {
                    break;
                }
                if slot.pending_emit.is_none() {
                    slot.pending_emit =
                        Some(slot.read_data.segments()[slot.cur_sg].clone());
                }
                if self.write_direct(tag)? == 0 {
                    return Ok(0);
                }
                let slot = self.pool.slot_mut(tag);
                let n = slot.read_data.segments()[slot.cur_sg].len();
                slot.cur_sg += 1;
                slot.wbytes_done += n;
            }
        } else {
            loop {
                let c1 = &mut self.c1;
                let slot = self.pool.slot_mut(tag);
                if slot.cur_sg == slot.read_data.segments().len() {
                    break;
                }
                let seg = slot.read_data.segments()[slot.cur_sg].clone();
                let n = seg.len();
                if c1.try_append(seg, true).is_err() {
                    return Ok(0);
                }
                slot.cur_sg += 1;
                slot.wbytes_done += n;
            }
        }
        let ddgst = self.ddgst;
        let slot = self.pool.slot_mut(tag);
        slot.send_state = if ddgst {
            SendState::Ddgst
        } else {
            SendState::Response
        };
        Ok(1)
    }

    fn send_ddgst(&mut self, tag: u16) -> Result<i32, QueueError> {
        {
            let slot = self.pool.slot_mut(tag);
            if slot.pending_emit.is_none() {
                slot.pending_emit =
                    Some(Bytes::copy_from_slice(&slot.out_ddgst.to_le_bytes()));
            }
        }
        if self.is_direct() {
            if self.write_direct(tag)? == 0 {
                return Ok(0);
            }
        } else {
            let slot = self.pool.slot_mut(tag);
            let Some(bytes) = slot.pending_emit.take() else {
                return Err(QueueError::Protocol("missing ddgst image".into()));
            };
            if let Err(back) = self.c1.try_append(bytes, false) {
                self.pool.slot_mut(tag).pending_emit = Some(back);
                return Ok(0);
            }
        }
        self.pool.slot_mut(tag).send_state = SendState::Response;
        Ok(1)
    }

    /// A single R2T covering the whole unreceived remainder. The command
    /// stays allocated: the solicited data is still to come.
    fn send_r2t(&mut self, tag: u16) -> Result<i32, QueueError> {
        {
            let hdgst = self.hdgst;
            let slot = self.pool.slot_mut(tag);
            if slot.pending_emit.is_none() {
                slot.pending_emit = Some(build_r2t(slot, hdgst));
            }
        }
        if self.is_direct() {
            if self.write_direct(tag)? == 0 {
                return Ok(0);
            }
        } else {
            let slot = self.pool.slot_mut(tag);
            let Some(bytes) = slot.pending_emit.take() else {
                return Err(QueueError::Protocol("missing r2t image".into()));
            };
            if let Err(back) = self.c2.try_append(bytes, false) {
                self.pool.slot_mut(tag).pending_emit = Some(back);
                return Ok(0);
            }
        }
        trace!(queue = self.handle.id, tag, "r2t emitted");
        self.pool.slot_mut(tag).send_state = SendState::Idle;
        self.snd = None;
        Ok(1)
    }

    fn send_response(&mut self, tag: u16) -> Result<i32, QueueError> {
        {
            let hdgst = self.hdgst;
            let slot = self.pool.slot_mut(tag);
            if slot.pending_emit.is_none() {
                slot.pending_emit = Some(build_rsp(slot, hdgst));
            }
        }
        if self.is_direct() {
            if self.write_direct(tag)? == 0 {
                return Ok(0);
            }
            self.pool.slot_mut(tag).send_state = SendState::Idle;
            self.release_slot(tag);
        } else {
            let to_c2 = self.pool.slot(tag).dir == TransferDir::ControllerToHost;
            let slot = self.pool.slot_mut(tag);
            let Some(bytes) = slot.pending_emit.take() else {
                return Err(QueueError::Protocol("missing response image".into()));
            };
            let c = if to_c2 { &mut self.c2 } else { &mut self.c1 };
            if let Err(back) = c.try_append(bytes, false) {
                self.pool.slot_mut(tag).pending_emit = Some(back);
                return Ok(0);
            }
            // Commit-on-flush: the slot is released when the caravan drains.
            c.add_owner(tag);
            self.pool.slot_mut(tag).send_state = SendState::Idle;
        }
        self.snd = None;
        Ok(1)
    }

    /// Push the pending emission image out directly (admin queue and the
    /// pre-connect window). Partial writes accumulate in `send_off`.
    fn write_direct(&mut self, tag: u16) -> Result<i32, QueueError> {
        loop {
            let sock = &self.sock;
            let slot = self.pool.slot_mut(tag);
            let Some(pending) = slot.pending_emit.as_ref() else {
                return Err(QueueError::Protocol("nothing to write".into()));
            };
            if slot.send_off == pending.len() {
                slot.pending_emit = None;
                slot.send_off = 0;
                return Ok(1);
            }
            let n = match sock.try_write(&pending[slot.send_off..]) {
                Ok(0) => return Err(QueueError::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.want_space = true;
                    return Ok(0);
                },
                Err(e) => return Err(e.into()),
            };
            slot.send_off += n;
        }
    }

    /// Build the `c2h_data` header image for a read reply. The PDU's
    /// `plen` covers the whole payload and trailing digest; only header
    /// bytes go out here.
    fn ensure_data_pdu_built(&mut self, tag: u16) {
        let hdgst = self.hdgst;
        let ddgst = self.ddgst;
        let slot = self.pool.slot_mut(tag);
        if slot.pending_emit.is_some() {
            return;
        }
        let mut b = C2HDataBuilder::new()
            .command_id(slot.sqe.command_id.get())
            .window(0, slot.read_data.len() as u32);
        if hdgst {
            b = b.with_header_digest();
        }
        if ddgst {
            b = b.with_data_digest();
        }
        let pdu = b.seal();
        let hlen = crate::models::data::response::C2HDataPdu::HLEN;
        slot.data_pdu.clear();
        slot.data_pdu.reserve(hlen + DIGEST_LEN);
        slot.data_pdu.extend_from_slice(pdu.as_bytes());
        if hdgst {
            let d = header_digest(&slot.data_pdu[..hlen]);
            slot.data_pdu.extend_from_slice(&d.to_le_bytes());
        }
        slot.pending_emit = Some(slot.data_pdu.split().freeze());
    }
}

fn build_rsp(slot: &mut Slot, hdgst: bool) -> Bytes {
    let hlen = crate::models::capsule::response::RspCapsulePdu::HLEN;
    let mut b = RspCapsuleBuilder::new().cqe(slot.cqe.clone());
    if hdgst {
        b = b.with_header_digest();
    }
    slot.rsp_pdu.clear();
    slot.rsp_pdu.reserve(hlen + DIGEST_LEN);
    slot.rsp_pdu.extend_from_slice(b.header.as_bytes());
    if hdgst {
        let d = header_digest(&slot.rsp_pdu[..hlen]);
        slot.rsp_pdu.extend_from_slice(&d.to_le_bytes());
    }
    slot.rsp_pdu.split().freeze()
}

fn build_r2t(slot: &mut Slot, hdgst: bool) -> Bytes {
    let hlen = crate::models::r2t::response::R2tPdu::HLEN;
    let mut b = R2tBuilder::new()
        .command_id(slot.sqe.command_id.get())
        .ttag(slot.tag)
        .window(
            slot.rbytes_done as u32,
            (slot.transfer_len - slot.rbytes_done) as u32,
        );
    if hdgst {
        b = b.with_header_digest();
    }
    slot.r2t_pdu.clear();
    slot.r2t_pdu.reserve(hlen + DIGEST_LEN);
    slot.r2t_pdu.extend_from_slice(b.header.as_bytes());
    if hdgst {
        let d = header_digest(&slot.r2t_pdu[..hlen]);
        slot.r2t_pdu.extend_from_slice(&d.to_le_bytes());
    }
    slot.r2t_pdu.split().freeze()
}

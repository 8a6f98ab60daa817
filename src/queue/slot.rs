// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command control blocks.
//!
//! Per queue, `nr_cmds` slots live in a contiguous array; a slot's tag is
//! its array index and doubles as the wire `ttag`, so solicited-data
//! dispatch is a bounds check. One extra slot is reserved for the initial
//! Fabrics Connect that arrives before the pool is provisioned; it never
//! recycles through the free list.

use bytes::{Bytes, BytesMut};

use crate::{
    models::{
        capsule::response::RspCapsulePdu,
        common::DIGEST_LEN,
        data::response::C2HDataPdu,
        nvme::{NvmeCqe, NvmeSqe},
        r2t::response::R2tPdu,
    },
    queue::sg::{SgBuf, SgList},
    target::executor::TransferDir,
};

/// Wire `ttag` of the reserved connect slot.
pub const CONNECT_TAG: u16 = u16::MAX;

/// Send-machine state of one command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    #[default]
    Idle,
    DataPdu,
    Data,
    Ddgst,
    R2t,
    Response,
}

/// One in-flight command.
#[derive(Debug)]
pub struct Slot {
    pub tag: u16,
    pub sqe: NvmeSqe,
    pub dir: TransferDir,
    pub transfer_len: usize,
    /// Bytes received into the request's data buffer so far.
    pub rbytes_done: usize,
    /// Bytes of payload emitted so far.
    pub wbytes_done: usize,
    /// Inbound window of the data PDU currently being absorbed.
    pub win_start: usize,
    pub win_len: usize,
    /// Write payload being absorbed.
    pub data: SgBuf,
    /// Read payload to emit.
    pub read_data: SgList,
    pub cqe: NvmeCqe,
    /// Validation failed: NVMe status to respond with once any inline
    /// payload has been drained.
    pub failed: Option<u16>,
    pub r2t_outstanding: bool,
    pub send_state: SendState,
    /// Byte offset into the emission currently going out (direct path).
    pub send_off: usize,
    /// Scatter-gather cursor of the payload emission.
    pub cur_sg: usize,
    /// Expected digest of the data window being received.
    pub exp_ddgst: u32,
    /// Digest of the outbound read payload.
    pub out_ddgst: u32,
    /// Emission image built but not yet accepted (caravan full or short
    /// direct write).
    pub pending_emit: Option<Bytes>,
    // Pre-sized PDU build buffers, header-digest trailer included. The
    // bytes crate reclaims the allocation once the frozen image drops.
    pub rsp_pdu: BytesMut,
    pub data_pdu: BytesMut,
    pub r2t_pdu: BytesMut,
}

impl Slot {
    fn new(tag: u16) -> Self {
        Slot {
            tag,
            sqe: NvmeSqe::default(),
            dir: TransferDir::None,
            transfer_len: 0,
            rbytes_done: 0,
            wbytes_done: 0,
            win_start: 0,
            win_len: 0,
            data: SgBuf::empty(),
            read_data: SgList::empty(),
            cqe: NvmeCqe::default(),
            failed: None,
            r2t_outstanding: false,
            send_state: SendState::Idle,
            send_off: 0,
            cur_sg: 0,
            exp_ddgst: 0,
            out_ddgst: 0,
            pending_emit: None,
            rsp_pdu: BytesMut::with_capacity(RspCapsulePdu::HLEN + DIGEST_LEN),
            data_pdu: BytesMut::with_capacity(C2HDataPdu::HLEN + DIGEST_LEN),
            r2t_pdu: BytesMut::with_capacity(R2tPdu::HLEN + DIGEST_LEN),
        }
    }

    /// Rearm per-use state when the slot is taken for a new command.
    pub fn reset(&mut self, sqe: NvmeSqe) {
        self.sqe = sqe;
        self.dir = TransferDir::None;
        self.transfer_len = 0;
        self.rbytes_done = 0;
        self.wbytes_done = 0;
        self.win_start = 0;
        self.win_len = 0;
        self.data = SgBuf::empty();
        self.read_data = SgList::empty();
        self.cqe = NvmeCqe::default();
        self.failed = None;
        self.r2t_outstanding = false;
        self.send_state = SendState::Idle;
        self.send_off = 0;
        self.cur_sg = 0;
        self.exp_ddgst = 0;
        self.out_ddgst = 0;
        self.pending_emit = None;
    }
}

/// Fixed-size slot array plus free list.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Slot>,
    free: Vec<u16>,
    connect: Slot,
    connect_busy: bool,
}

impl SlotPool {
    pub fn new() -> Self {
        SlotPool {
            slots: Vec::new(),
            free: Vec::new(),
            connect: Slot::new(CONNECT_TAG),
            connect_busy: false,
        }
    }

    /// Provision `nr_cmds` slots once the submission queue is installed.
    pub fn install(&mut self, nr_cmds: u16) {
        if self.installed() {
            return;
        }
        self.slots = (0..nr_cmds).map(Slot::new).collect();
        // Pop order matches slot order for the benefit of wire traces.
        self.free = (0..nr_cmds).rev().collect();
    }

    #[inline]
    pub fn installed(&self) -> bool {
        !self.slots.is_empty()
    }

    #[inline]
    pub fn nr_cmds(&self) -> u16 {
        self.slots.len() as u16
    }

    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Take a slot for a new inbound command. Before the pool is installed
    /// only the reserved connect slot exists. `None` means the initiator
    /// oversubscribed, which is fatal.
    pub fn get(&mut self) -> Option<u16> {
        if !self.installed() {
            if self.connect_busy {
                return None;
            }
            self.connect_busy = true;
            return Some(CONNECT_TAG);
        }
        self.free.pop()
    }

    /// Return a slot to the free list. The connect slot never joins the
    /// free list; it only becomes takeable again for the next pre-install
    /// command.
    pub fn put(&mut self, tag: u16) {
        if tag == CONNECT_TAG {
            self.connect_busy = false;
            return;
        }
        debug_assert!(!self.free.contains(&tag));
        self.free.push(tag);
    }

    pub fn slot(&self, tag: u16) -> &Slot {
        if tag == CONNECT_TAG {
            &self.connect
        } else {
            &self.slots[tag as usize]
        }
    }

    pub fn slot_mut(&mut self, tag: u16) -> &mut Slot {
        if tag == CONNECT_TAG {
            &mut self.connect
        } else {
            &mut self.slots[tag as usize]
        }
    }

    /// O(1) lookup of the command a solicited data PDU belongs to.
    pub fn by_ttag(&self, ttag: u16) -> Option<&Slot> {
        if ttag == CONNECT_TAG && self.connect_busy {
            return Some(&self.connect);
        }
        self.slots.get(ttag as usize)
    }
}

impl Default for SlotPool {
    fn default() -> Self {
        Self::new()
    }
}

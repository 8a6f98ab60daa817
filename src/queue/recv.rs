// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Receive state machine.
//!
//! `RecvPdu` absorbs a header into the per-queue scratch: first the 8-byte
//! common header, then the typed remainder plus the optional header digest.
//! Dispatch either produces a command for the executor, arms a payload
//! window (`RecvData` → optional `RecvDdgst`), or completes the initial
//! connection exchange inline. `RecvErr` is terminal.

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    models::{
        common::{CH_LEN, CommonHeader, DIGEST_LEN, PduHeader},
        digest::header_digest,
        init::response::IcRespBuilder,
        parse::InboundPdu,
        pdu_type::PduType,
    },
    queue::{
        QueueError,
        queue::{Queue, QueueState},
        sg::SgBuf,
    },
    target::executor::TransferDir,
};

/// Largest inbound header: a 128-byte `icreq` (digest-free); `cmd` and
/// `h2c_data` headers with their digest trailer are smaller.
pub(crate) const RECV_HDR_MAX: usize = 132;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvState {
    Pdu,
    Data,
    Ddgst,
    Err,
}

/// Per-queue receive scratch; survives short reads between worker passes.
#[derive(Debug)]
pub(crate) struct RecvScratch {
    pub(crate) state: RecvState,
    pub(crate) hdr: [u8; RECV_HDR_MAX],
    pub(crate) off: usize,
    pub(crate) left: usize,
    /// Common header parsed and `left` re-armed for the typed remainder.
    pub(crate) typed: bool,
    /// Command absorbing the current payload window.
    pub(crate) cur: Option<u16>,
    pub(crate) dd_off: usize,
    pub(crate) dd: [u8; DIGEST_LEN],
}

impl RecvScratch {
    pub(crate) fn new() -> Self {
        RecvScratch {
            state: RecvState::Pdu,
            hdr: [0u8; RECV_HDR_MAX],
            off: 0,
            left: CH_LEN,
            typed: false,
            cur: None,
            dd_off: 0,
            dd: [0u8; DIGEST_LEN],
        }
    }
}

impl Default for RecvScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    /// Runs the receive machine up to `budget` times, breaking on the first
    /// non-positive progress report. Returns 1 if anything moved.
    pub(crate) async fn try_recv(
        &mut self,
        budget: usize,
        ops: &mut usize,
    ) -> Result<i32, QueueError> {
        let mut recvd = 0;
        for _ in 0..budget {
            let ret = match self.recv.state {
                RecvState::Pdu => self.recv_pdu().await?,
                RecvState::Data => self.recv_data()?,
                RecvState::Ddgst => self.recv_ddgst()?,
                RecvState::Err => 0,
            };
            if ret <= 0 {
                break;
            }
            recvd += 1;
            *ops += 1;
        }
        Ok((recvd > 0) as i32)
    }

    pub(crate) fn prepare_receive_pdu(&mut self) {
        self.recv.state = RecvState::Pdu;
        self.recv.off = 0;
        self.recv.left = CH_LEN;
        self.recv.typed = false;
        self.recv.cur = None;
        self.recv.dd_off = 0;
    }

    async fn recv_pdu(&mut self) -> Result<i32, QueueError> {
        while self.recv.left > 0 {
            let off = self.recv.off;
            let end = off + self.recv.left;
            let n = match self.sock.try_read(&mut self.recv.hdr[off..end]) {
                Ok(0) => return Err(QueueError::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            self.recv.off += n;
            self.recv.left -= n;
            if !self.recv.typed && self.recv.off == CH_LEN {
                self.arm_typed_header()?;
            }
        }
        self.dispatch_pdu().await
    }

    /// The common header is in; validate it and re-arm `left` to absorb
    /// the rest of the typed header plus the optional header digest.
    fn arm_typed_header(&mut self) -> Result<(), QueueError> {
        let ch = CommonHeader::ref_from_bytes(&self.recv.hdr[..CH_LEN])
            .map_err(|e| QueueError::Protocol(format!("common header: {e}")))?;
        let Some(t) = ch.pdu_type.known() else {
            return Err(QueueError::Protocol(format!(
                "unknown pdu type 0x{:02x}",
                ch.pdu_type.raw()
            )));
        };
        if !matches!(t, PduType::IcReq | PduType::CapsuleCmd | PduType::H2CData) {
            return Err(QueueError::Protocol(format!(
                "pdu type {t:?} not valid on the target side"
            )));
        }
        if ch.hlen as usize != t.expected_hlen() {
            return Err(QueueError::Protocol(format!(
                "{t:?}: bad hlen {} (expected {})",
                ch.hlen,
                t.expected_hlen()
            )));
        }
        if (ch.plen.get() as usize) < ch.hlen as usize {
            return Err(QueueError::Protocol(format!(
                "{t:?}: plen {} shorter than hlen {}",
                ch.plen.get(),
                ch.hlen
            )));
        }
        // The initial connection exchange never carries digests.
        let hdgst = if t == PduType::IcReq {
            0
        } else {
            DIGEST_LEN * self.hdgst as usize
        };
        self.recv.left = ch.hlen as usize - CH_LEN + hdgst;
        self.recv.typed = true;
        Ok(())
    }

    async fn dispatch_pdu(&mut self) -> Result<i32, QueueError> {
        let hlen = {
            let ch = CommonHeader::ref_from_bytes(&self.recv.hdr[..CH_LEN])
                .map_err(|e| QueueError::Protocol(format!("common header: {e}")))?;
            ch.hlen as usize
        };
        let t = {
            let pdu = InboundPdu::from_wire_bytes(&mut self.recv.hdr[..hlen])
                .map_err(|e| QueueError::Protocol(e.to_string()))?;
            pdu.get_type()
                .map_err(|e| QueueError::Protocol(e.to_string()))?
        };

        if self.hdgst && t != PduType::IcReq {
            let want = header_digest(&self.recv.hdr[..hlen]);
            let got = u32::from_le_bytes(
                self.recv.hdr[hlen..hlen + DIGEST_LEN]
                    .try_into()
                    .map_err(|_| QueueError::Protocol("short digest".into()))?,
            );
            if got != want {
                return Err(QueueError::HeaderDigest { got, want });
            }
        }

        match t {
            PduType::IcReq => self.handle_icreq().await,
            PduType::CapsuleCmd => self.handle_cmd(),
            PduType::H2CData => self.handle_h2c_data(),
            other => Err(QueueError::Protocol(format!(
                "unexpected pdu type {other:?}"
            ))),
        }
    }

    /// Initial connection exchange, driven synchronously on the receive
    /// path; the response bypasses the caravans.
    async fn handle_icreq(&mut self) -> Result<i32, QueueError> {
        if self.state != QueueState::Connecting {
            return Err(QueueError::Protocol(
                "icreq on an established connection".into(),
            ));
        }
        let (pfv, hpda, maxr2t, want_hdgst, want_ddgst) = {
            let icreq = crate::models::init::request::IcReqPdu::from_wire_bytes(
                &mut self.recv.hdr[..crate::models::init::request::IcReqPdu::HLEN],
            )
            .map_err(|e| QueueError::Protocol(e.to_string()))?;
            (
                icreq.pfv.get(),
                icreq.hpda,
                icreq.maxr2t.get(),
                icreq.digest.hdgst(),
                icreq.digest.ddgst(),
            )
        };
        if pfv != crate::models::init::common::PFV_1_0 {
            return Err(QueueError::Protocol(format!("unsupported pfv {pfv}")));
        }
        if hpda != 0 {
            return Err(QueueError::Protocol(format!("unsupported hpda {hpda}")));
        }
        if maxr2t != 0 {
            return Err(QueueError::Protocol(format!(
                "unsupported maxr2t {maxr2t}"
            )));
        }

        self.hdgst = want_hdgst && self.cfg.target.header_digest.is_crc32c();
        self.ddgst = want_ddgst && self.cfg.target.data_digest.is_crc32c();

        let icresp = IcRespBuilder::new()
            .digests(self.hdgst, self.ddgst)
            .header;
        self.sock.write_all(icresp.as_bytes()).await?;

        self.state = QueueState::Live;
        debug!(
            queue = self.handle.id,
            hdgst = self.hdgst,
            ddgst = self.ddgst,
            "connection established"
        );
        self.prepare_receive_pdu();
        Ok(1)
    }

    fn handle_cmd(&mut self) -> Result<i32, QueueError> {
        if self.state != QueueState::Live {
            return Err(QueueError::Protocol("cmd before icreq".into()));
        }
        let (sqe, plen, ddgst_flag) = {
            let capsule = crate::models::capsule::request::CmdCapsulePdu::from_wire_bytes(
                &mut self.recv.hdr[..crate::models::capsule::request::CmdCapsulePdu::HLEN],
            )
            .map_err(|e| QueueError::Protocol(e.to_string()))?;
            (
                capsule.sqe.clone(),
                capsule.ch.plen.get() as usize,
                capsule.ch.flags.ddgst(),
            )
        };
        let hlen = crate::models::capsule::request::CmdCapsulePdu::HLEN;
        let hdgst = DIGEST_LEN * self.hdgst as usize;
        let ddgst = DIGEST_LEN * (self.ddgst && ddgst_flag) as usize;
        if ddgst_flag && !self.ddgst {
            return Err(QueueError::Protocol(
                "ddgst flag set but data digest not negotiated".into(),
            ));
        }
        let Some(inline_len) = plen.checked_sub(hlen + hdgst + ddgst) else {
            return Err(QueueError::Protocol(format!(
                "cmd plen {plen} shorter than headers and digests"
            )));
        };
        if self.ddgst && inline_len > 0 && !ddgst_flag {
            return Err(QueueError::Protocol(
                "inline data without ddgst flag".into(),
            ));
        }
        if inline_len > self.cfg.target.inline_data_size as usize {
            return Err(QueueError::Protocol(format!(
                "inline data {inline_len} exceeds limit {}",
                self.cfg.target.inline_data_size
            )));
        }

        let Some(tag) = self.pool.get() else {
            // The initiator promised not to oversubscribe the queue.
            return Err(QueueError::SlotsExhausted);
        };
        self.pool.slot_mut(tag).reset(sqe);

        let init = {
            let slot = self.pool.slot(tag);
            self.executor.req_init(self.qid, &slot.sqe)
        };
        match init {
            Err(sc) => {
                let slot = self.pool.slot_mut(tag);
                slot.failed = Some(sc);
                if inline_len > 0 {
                    // Still drain the payload so framing stays intact.
                    slot.transfer_len = inline_len;
                    slot.data = SgBuf::with_len(inline_len);
                    slot.win_start = 0;
                    slot.win_len = inline_len;
                    self.recv.cur = Some(tag);
                    self.recv.state = RecvState::Data;
                } else {
                    self.push_error_response(tag, sc);
                    self.prepare_receive_pdu();
                }
                Ok(1)
            },
            Ok(shape) => {
                {
                    let slot = self.pool.slot_mut(tag);
                    slot.dir = shape.dir;
                    slot.transfer_len = shape.transfer_len;
                }
                let needs_data = shape.dir == TransferDir::HostToController
                    && shape.transfer_len > 0;
                if inline_len > 0 && !needs_data {
                    return Err(QueueError::Protocol(
                        "inline payload on a command without h2c data".into(),
                    ));
                }
                if needs_data && inline_len > 0 {
                    if inline_len > shape.transfer_len {
                        return Err(QueueError::Protocol(format!(
                            "inline data {inline_len} exceeds transfer_len {}",
                            shape.transfer_len
                        )));
                    }
                    let slot = self.pool.slot_mut(tag);
                    slot.data = SgBuf::with_len(shape.transfer_len);
                    slot.win_start = 0;
                    slot.win_len = inline_len;
                    self.recv.cur = Some(tag);
                    self.recv.state = RecvState::Data;
                } else if needs_data {
                    let slot = self.pool.slot_mut(tag);
                    slot.data = SgBuf::with_len(shape.transfer_len);
                    self.push_solicit(tag);
                    self.prepare_receive_pdu();
                } else {
                    self.execute_slot(tag);
                    self.prepare_receive_pdu();
                }
                Ok(1)
            },
        }
    }

    fn handle_h2c_data(&mut self) -> Result<i32, QueueError> {
        if self.state != QueueState::Live {
            return Err(QueueError::Protocol("h2c_data before icreq".into()));
        }
        let (ttag, data_offset, data_length, ddgst_flag) = {
            let pdu = crate::models::data::request::H2CDataPdu::from_wire_bytes(
                &mut self.recv.hdr[..crate::models::data::request::H2CDataPdu::HLEN],
            )
            .map_err(|e| QueueError::Protocol(e.to_string()))?;
            (
                pdu.ttag.get(),
                pdu.data_offset.get() as usize,
                pdu.data_length.get() as usize,
                pdu.ch.flags.ddgst(),
            )
        };
        if ddgst_flag != (self.ddgst && data_length > 0) {
            return Err(QueueError::Protocol(format!(
                "ddgst flag inconsistent with negotiation (ttag {ttag})"
            )));
        }
        let Some(slot) = self.pool.by_ttag(ttag) else {
            return Err(QueueError::Protocol(format!("unknown ttag {ttag}")));
        };
        if slot.dir != TransferDir::HostToController && slot.failed.is_none() {
            return Err(QueueError::Protocol(format!(
                "h2c_data for a command without h2c data (ttag {ttag})"
            )));
        }
        if data_offset != slot.rbytes_done {
            return Err(QueueError::Protocol(format!(
                "unexpected data_offset {data_offset} (expected {})",
                slot.rbytes_done
            )));
        }
        if data_offset + data_length > slot.transfer_len {
            return Err(QueueError::Protocol(format!(
                "data window [{data_offset}, +{data_length}) exceeds transfer_len {}",
                slot.transfer_len
            )));
        }
        let tag = slot.tag;
        {
            let slot = self.pool.slot_mut(tag);
            slot.win_start = data_offset;
            slot.win_len = data_length;
        }
        self.recv.cur = Some(tag);
        self.recv.state = RecvState::Data;
        Ok(1)
    }

    fn recv_data(&mut self) -> Result<i32, QueueError> {
        let Some(tag) = self.recv.cur else {
            return Err(QueueError::Protocol("recv_data without a command".into()));
        };
        loop {
            let sock = &self.sock;
            let slot = self.pool.slot_mut(tag);
            let remaining = slot.win_start + slot.win_len - slot.rbytes_done;
            if remaining == 0 {
                break;
            }
            let start = slot.rbytes_done;
            let mut iovs = slot.data.window_slices(start, remaining);
            let n = match sock.try_read_vectored(&mut iovs) {
                Ok(0) => return Err(QueueError::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            drop(iovs);
            slot.rbytes_done += n;
        }
        if self.ddgst && self.pool.slot(tag).win_len > 0 {
            let slot = self.pool.slot_mut(tag);
            slot.exp_ddgst = slot.data.crc32c_range(slot.win_start, slot.win_len);
            self.recv.dd_off = 0;
            self.recv.state = RecvState::Ddgst;
            return Ok(1);
        }
        self.data_window_done(tag)
    }

    fn recv_ddgst(&mut self) -> Result<i32, QueueError> {
        let Some(tag) = self.recv.cur else {
            return Err(QueueError::Protocol("recv_ddgst without a command".into()));
        };
        while self.recv.dd_off < DIGEST_LEN {
            let off = self.recv.dd_off;
            let n = match self.sock.try_read(&mut self.recv.dd[off..]) {
                Ok(0) => return Err(QueueError::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            self.recv.dd_off += n;
        }
        let got = u32::from_le_bytes(self.recv.dd);
        let want = self.pool.slot(tag).exp_ddgst;
        if got != want {
            // The command is finished with an error; the queue itself goes
            // down right after.
            warn!(queue = self.handle.id, tag, "data digest mismatch");
            self.release_slot(tag);
            return Err(QueueError::DataDigest { got, want });
        }
        self.data_window_done(tag)
    }

    /// One inbound payload window fully absorbed (and digest-verified when
    /// negotiated).
    fn data_window_done(&mut self, tag: u16) -> Result<i32, QueueError> {
        let (failed, done, dir, soliciting) = {
            let slot = self.pool.slot(tag);
            (
                slot.failed,
                slot.rbytes_done == slot.transfer_len,
                slot.dir,
                slot.r2t_outstanding,
            )
        };
        if let Some(sc) = failed {
            if done {
                self.push_error_response(tag, sc);
            }
        } else if done {
            self.execute_slot(tag);
        } else if dir == TransferDir::HostToController && !soliciting {
            // Partial inline payload: solicit the remainder.
            self.push_solicit(tag);
        }
        self.prepare_receive_pdu();
        Ok(1)
    }
}

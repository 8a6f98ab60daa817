// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout};

use crate::models::{
    common::{CH_LEN, CommonHeader, DIGEST_LEN, PduHeader, RawPduFlags},
    nvme::NvmeCqe,
    pdu_type::PduType,
};

/// Response capsule PDU (`rsp`): the common header followed by a 16-byte
/// NVMe completion queue entry. Never carries a payload.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RspCapsulePdu {
    pub ch: CommonHeader,
    pub cqe: NvmeCqe,
}

impl RspCapsulePdu {
    pub const HLEN: usize = CH_LEN + crate::models::nvme::CQE_LEN;

    pub fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != Self::HLEN {
            bail!("buffer length must be {}, got {}", Self::HLEN, buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_wire_bytes(buf: &mut [u8]) -> Result<&mut Self> {
        let hdr = <Self as zerocopy::FromBytes>::mut_from_bytes(buf)
            .map_err(|e| anyhow!("failed convert buffer RspCapsulePdu: {e}"))?;
        if hdr.ch.pdu_type.known() != Some(PduType::CapsuleResp) {
            bail!(
                "RspCapsulePdu: invalid pdu type 0x{:02x}",
                hdr.ch.pdu_type.raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for response capsules.
#[derive(Debug, Default)]
pub struct RspCapsuleBuilder {
    pub header: RspCapsulePdu,
}

impl RspCapsuleBuilder {
    pub fn new() -> Self {
        RspCapsuleBuilder {
            header: RspCapsulePdu {
                ch: CommonHeader::new(PduType::CapsuleResp, RspCapsulePdu::HLEN as u8),
                ..Default::default()
            },
        }
    }

    pub fn cqe(mut self, cqe: NvmeCqe) -> Self {
        self.header.cqe = cqe;
        self
    }

    pub fn with_header_digest(mut self) -> Self {
        self.header.ch.flags.set_hdgst(true);
        self.header
            .ch
            .plen
            .set((RspCapsulePdu::HLEN + DIGEST_LEN) as u32);
        self
    }
}

impl PduHeader for RspCapsulePdu {
    #[inline]
    fn to_wire_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.to_wire_bytes(buf)
    }

    #[inline]
    fn get_type(&self) -> Result<PduType> {
        Ok(PduType::try_from(self.ch.pdu_type.raw())?)
    }

    #[inline]
    fn get_flags(&self) -> RawPduFlags {
        self.ch.flags
    }

    #[inline]
    fn get_header_len(&self) -> usize {
        self.ch.hlen as usize
    }

    #[inline]
    fn get_pdu_len(&self) -> usize {
        self.ch.plen.get() as usize
    }

    #[inline]
    fn set_pdu_len(&mut self, len: u32) {
        self.ch.plen.set(len);
    }
}


// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use enum_dispatch::enum_dispatch;

use crate::models::{
    capsule::request::CmdCapsulePdu,
    common::{PduHeader, RawPduFlags},
    data::request::H2CDataPdu,
    init::request::IcReqPdu,
    pdu_type::PduType,
};

/// Typed view over the receive scratch once the common header is in.
///
/// Only the PDU types a target accepts appear here; everything else is a
/// protocol error and tears the connection down.
#[enum_dispatch(PduHeader)]
#[derive(Debug)]
pub enum InboundPdu<'a> {
    IcReq(&'a mut IcReqPdu),
    CapsuleCmd(&'a mut CmdCapsulePdu),
    H2CData(&'a mut H2CDataPdu),
}

impl<'a> InboundPdu<'a> {
    pub fn from_wire_bytes(bytes: &'a mut [u8]) -> Result<Self> {
        let t = PduType::try_from(bytes[0])
            .map_err(|e| anyhow::anyhow!("invalid pdu type: {}", e))?;
        match t {
            PduType::IcReq => {
                let req = IcReqPdu::from_wire_bytes(bytes)?;
                Ok(InboundPdu::IcReq(req))
            },
            PduType::CapsuleCmd => {
                let req = CmdCapsulePdu::from_wire_bytes(bytes)?;
                Ok(InboundPdu::CapsuleCmd(req))
            },
            PduType::H2CData => {
                let req = H2CDataPdu::from_wire_bytes(bytes)?;
                Ok(InboundPdu::H2CData(req))
            },
            other => bail!("unsupported inbound pdu type: {:?}", other),
        }
    }
}

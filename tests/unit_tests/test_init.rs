// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use hex_literal::hex;
use nvmet_tcp_rs::models::{
    init::{request::IcReqPdu, response::{IcRespBuilder, IcRespPdu}},
    pdu_type::PduType,
};
use zerocopy::IntoBytes;

#[test]
fn icreq_parse_and_reencode_is_identity() -> Result<()> {
    // type=icreq, hlen=128, plen=128, pfv=1, hpda=0, digest=HDGST|DDGST,
    // maxr2t=0, 112 reserved bytes.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&hex!("00 00 80 00 80 00 00 00"));
    bytes.extend_from_slice(&hex!("01 00 00 03 00 00 00 00"));
    bytes.extend_from_slice(&[0u8; 112]);
    assert_eq!(bytes.len(), IcReqPdu::HLEN);

    let parsed = IcReqPdu::from_wire_bytes(&mut bytes)?;
    assert_eq!(parsed.ch.pdu_type.known(), Some(PduType::IcReq));
    assert_eq!(parsed.pfv.get(), 1);
    assert_eq!(parsed.hpda, 0);
    assert!(parsed.digest.hdgst());
    assert!(parsed.digest.ddgst());
    assert_eq!(parsed.maxr2t.get(), 0);

    let mut out = [0u8; IcReqPdu::HLEN];
    parsed.to_wire_bytes(&mut out)?;
    assert_eq!(out.as_slice(), bytes.as_slice());
    Ok(())
}

#[test]
fn icreq_with_wrong_type_is_rejected() {
    let mut bytes = vec![0u8; IcReqPdu::HLEN];
    bytes[0] = 0x05;
    assert!(IcReqPdu::from_wire_bytes(&mut bytes).is_err());
}

#[test]
fn icresp_builder_wire_image() -> Result<()> {
    let resp = IcRespBuilder::new().digests(false, false).header;
    let bytes = resp.as_bytes();
    assert_eq!(bytes.len(), IcRespPdu::HLEN);
    // type=icresp, hlen=128, plen=128, pfv=1, cpda=0, digest=0,
    // maxdata=0xffff.
    assert_eq!(&bytes[..16], hex!("01 00 80 00 80 00 00 00 01 00 00 00 ff ff 00 00"));
    assert!(bytes[16..].iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn icresp_echoes_enabled_digests() -> Result<()> {
    let resp = IcRespBuilder::new().digests(true, true).header;
    assert!(resp.digest.hdgst());
    assert!(resp.digest.ddgst());

    let mut bytes = resp.as_bytes().to_vec();
    let parsed = IcRespPdu::from_wire_bytes(&mut bytes)?;
    assert!(parsed.digest.hdgst());
    assert!(parsed.digest.ddgst());
    assert_eq!(parsed.maxdata.get(), IcRespPdu::MAXDATA);
    Ok(())
}

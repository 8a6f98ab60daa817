// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use hex_literal::hex;
use nvmet_tcp_rs::models::{
    pdu_type::PduType,
    r2t::response::{R2tBuilder, R2tPdu},
};
use zerocopy::IntoBytes;

#[test]
fn r2t_wire_image() {
    let r2t = R2tBuilder::new()
        .command_id(5)
        .ttag(2)
        .window(0, 8192)
        .header;
    // type=r2t, hlen=24, plen=24, cid=5, ttag=2, offset=0, length=0x2000.
    assert_eq!(
        r2t.as_bytes(),
        hex!(
            "09 00 18 00 18 00 00 00"
            "05 00 02 00 00 00 00 00"
            "00 20 00 00 00 00 00 00"
        )
    );
}

#[test]
fn r2t_round_trips() -> Result<()> {
    let built = R2tBuilder::new()
        .command_id(11)
        .ttag(7)
        .window(4096, 4096)
        .header;
    let mut bytes = built.as_bytes().to_vec();
    let parsed = R2tPdu::from_wire_bytes(&mut bytes)?;
    assert_eq!(parsed.ch.pdu_type.known(), Some(PduType::R2T));
    assert_eq!(parsed.command_id.get(), 11);
    assert_eq!(parsed.ttag.get(), 7);
    assert_eq!(parsed.r2t_offset.get(), 4096);
    assert_eq!(parsed.r2t_length.get(), 4096);

    let mut out = [0u8; R2tPdu::HLEN];
    parsed.to_wire_bytes(&mut out)?;
    assert_eq!(out.as_slice(), bytes.as_slice());
    Ok(())
}

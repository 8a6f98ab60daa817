// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use nvmet_tcp_rs::models::{
    common::{DIGEST_LEN, PduHeader},
    data::{
        request::{H2CDataBuilder, H2CDataPdu},
        response::{C2HDataBuilder, C2HDataPdu},
    },
    pdu_type::PduType,
};
use zerocopy::IntoBytes;

#[test]
fn c2h_data_plen_covers_whole_transfer() {
    let pdu = C2HDataBuilder::new().command_id(3).window(0, 512).seal();
    assert_eq!(pdu.ch.pdu_type.known(), Some(PduType::C2HData));
    assert_eq!(pdu.ch.pdo as usize, C2HDataPdu::HLEN);
    assert_eq!(pdu.get_pdu_len(), C2HDataPdu::HLEN + 512);
    assert!(pdu.ch.flags.data_last());
    assert_eq!(pdu.data_length.get(), 512);
    assert_eq!(pdu.data_offset.get(), 0);
}

#[test]
fn c2h_data_digest_trailers_shift_pdo_and_plen() {
    let pdu = C2HDataBuilder::new()
        .command_id(3)
        .window(0, 512)
        .with_header_digest()
        .with_data_digest()
        .seal();
    assert_eq!(pdu.ch.pdo as usize, C2HDataPdu::HLEN + DIGEST_LEN);
    assert_eq!(
        pdu.get_pdu_len(),
        C2HDataPdu::HLEN + DIGEST_LEN + 512 + DIGEST_LEN
    );
    assert!(pdu.ch.flags.hdgst());
    assert!(pdu.ch.flags.ddgst());
    assert_eq!(pdu.data_len(true, true), 512);
}

#[test]
fn h2c_data_round_trips() -> Result<()> {
    let built = H2CDataBuilder::new()
        .command_id(4)
        .ttag(2)
        .window(4096, 8192)
        .header;
    let mut bytes = built.as_bytes().to_vec();
    assert_eq!(bytes.len(), H2CDataPdu::HLEN);

    let parsed = H2CDataPdu::from_wire_bytes(&mut bytes)?;
    assert_eq!(parsed.ttag.get(), 2);
    assert_eq!(parsed.command_id.get(), 4);
    assert_eq!(parsed.data_offset.get(), 4096);
    assert_eq!(parsed.data_length.get(), 8192);
    assert_eq!(parsed.get_pdu_len(), H2CDataPdu::HLEN + 8192);
    assert_eq!(parsed.data_len(false, false), 8192);
    Ok(())
}

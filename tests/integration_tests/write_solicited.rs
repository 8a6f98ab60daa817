// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use nvmet_tcp_rs::models::{nvme::opcode, pdu_type::PduType};
use rand::RngExt;
use serial_test::serial;
use tokio::io::AsyncWriteExt;

use crate::integration_tests::common::{
    cmd_capsule, connect_queue, connect_target, h2c_capsule, handshake, parse_c2h,
    parse_r2t, parse_rsp, read_pdu, rw_sqe, start_target,
};

#[tokio::test]
#[serial]
async fn solicited_write_via_r2t() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 1, 63).await?;

    // 8 KiB write with no inline data: the target must solicit the whole
    // payload with a single R2T.
    let capsule = cmd_capsule(rw_sqe(opcode::WRITE, 11, 8, 16), &[], false, false);
    s.write_all(&capsule).await?;

    let (t1, r2t_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t1, PduType::R2T);
    let r2t = parse_r2t(&r2t_bytes)?;
    assert_eq!(r2t.command_id.get(), 11);
    assert_eq!(r2t.r2t_offset.get(), 0);
    assert_eq!(r2t.r2t_length.get(), 8192);

    let mut payload = vec![0u8; 8192];
    rand::rng().fill(&mut payload[..]);
    let data = h2c_capsule(11, r2t.ttag.get(), 0, &payload, false, false);
    s.write_all(&data).await?;

    let (t2, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t2, PduType::CapsuleResp);
    let rsp = parse_rsp(&rsp_bytes)?;
    assert_eq!(rsp.cqe.command_id.get(), 11);
    assert!(rsp.cqe.is_success());

    // Verify the payload landed block by block.
    let capsule = cmd_capsule(rw_sqe(opcode::READ, 12, 8, 16), &[], false, false);
    s.write_all(&capsule).await?;
    let (t3, data_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t3, PduType::C2HData);
    let (hdr, got) = parse_c2h(&data_bytes)?;
    assert_eq!(hdr.data_length.get(), 8192);
    assert_eq!(got, payload.as_slice());
    let (t4, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t4, PduType::CapsuleResp);
    assert!(parse_rsp(&rsp_bytes)?.cqe.is_success());
    Ok(())
}

#[tokio::test]
#[serial]
async fn solicited_write_split_across_data_pdus() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 1, 63).await?;

    let capsule = cmd_capsule(rw_sqe(opcode::WRITE, 21, 64, 8), &[], false, false);
    s.write_all(&capsule).await?;
    let (_, r2t_bytes) = read_pdu(&mut s).await?;
    let r2t = parse_r2t(&r2t_bytes)?;
    assert_eq!(r2t.r2t_length.get(), 4096);

    let mut payload = vec![0u8; 4096];
    rand::rng().fill(&mut payload[..]);

    // The host may answer one R2T with several data PDUs as long as the
    // offsets line up.
    let first = h2c_capsule(21, r2t.ttag.get(), 0, &payload[..1024], false, false);
    s.write_all(&first).await?;
    let second = h2c_capsule(21, r2t.ttag.get(), 1024, &payload[1024..], false, false);
    s.write_all(&second).await?;

    let (t2, rsp_bytes) = read_pdu(&mut s).await?;
    assert_eq!(t2, PduType::CapsuleResp);
    assert!(parse_rsp(&rsp_bytes)?.cqe.is_success());
    Ok(())
}

#[tokio::test]
#[serial]
async fn stale_data_offset_is_fatal() -> Result<()> {
    let t = start_target().await?;
    let mut s = connect_target(&t).await?;
    handshake(&mut s, false, false).await?;
    connect_queue(&mut s, 1, 63).await?;

    let capsule = cmd_capsule(rw_sqe(opcode::WRITE, 31, 0, 8), &[], false, false);
    s.write_all(&capsule).await?;
    let (_, r2t_bytes) = read_pdu(&mut s).await?;
    let r2t = parse_r2t(&r2t_bytes)?;

    // Wrong offset: the engine expects data to resume at rbytes_done.
    let payload = vec![0u8; 1024];
    let bad = h2c_capsule(31, r2t.ttag.get(), 512, &payload, false, false);
    s.write_all(&bad).await?;

    crate::integration_tests::common::wait_for_queues(&t.registry, 0).await?;
    Ok(())
}

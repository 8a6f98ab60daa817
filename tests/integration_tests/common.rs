// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared initiator-side plumbing: a loopback target backed by the
//! in-memory executor, plus raw wire helpers for driving it.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use nvmet_tcp_rs::{
    cfg::config::Config,
    models::{
        capsule::{request::CmdCapsuleBuilder, response::RspCapsulePdu},
        common::CH_LEN,
        data::{request::H2CDataBuilder, response::C2HDataPdu},
        digest::{data_digest, header_digest},
        init::{request::IcReqPdu, response::IcRespPdu},
        nvme::{NvmeSqe, fabrics, opcode},
        pdu_type::PduType,
        r2t::response::R2tPdu,
    },
    target::{
        executor::CommandExecutor, mem::{CONNECT_DATA_LEN, MemExecutor}, port::Port,
        registry::Registry,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use zerocopy::{FromBytes, IntoBytes};

pub struct TestTarget {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub cancel: CancellationToken,
}

impl Drop for TestTarget {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn start_target() -> Result<TestTarget> {
    start_target_with(Arc::new(MemExecutor::new())).await
}

pub async fn start_target_with(
    executor: Arc<dyn CommandExecutor>,
) -> Result<TestTarget> {
    let mut cfg = Config::default();
    cfg.target.listen_address = "127.0.0.1:0".to_string();
    cfg.validate_and_normalize()?;
    let cfg = Arc::new(cfg);

    let registry = Arc::new(Registry::new());
    let cancel = CancellationToken::new();
    let port = Port::bind(
        Arc::clone(&cfg),
        Arc::clone(&registry),
        executor,
        cancel.clone(),
    )
    .await?;
    let addr = port.local_addr()?;
    tokio::spawn(port.run());
    Ok(TestTarget {
        addr,
        registry,
        cancel,
    })
}

/// Drives the initial connection exchange and returns the parsed `icresp`.
pub async fn handshake(
    stream: &mut TcpStream,
    hdgst: bool,
    ddgst: bool,
) -> Result<IcRespPdu> {
    let mut icreq = IcReqPdu::new();
    icreq.digest.set_hdgst(hdgst);
    icreq.digest.set_ddgst(ddgst);
    stream.write_all(icreq.as_bytes()).await?;

    let mut buf = [0u8; IcRespPdu::HLEN];
    stream.read_exact(&mut buf).await?;
    IcRespPdu::read_from_bytes(&buf).map_err(|e| anyhow!("bad icresp: {e}"))
}

pub fn rw_sqe(op: u8, cid: u16, slba: u64, nlb: u16) -> NvmeSqe {
    let mut sqe = NvmeSqe {
        opcode: op,
        ..Default::default()
    };
    sqe.command_id.set(cid);
    sqe.nsid.set(1);
    sqe.cdw10.set(slba as u32);
    sqe.cdw11.set((slba >> 32) as u32);
    sqe.cdw12.set((nlb - 1) as u32);
    sqe
}

pub fn admin_sqe(op: u8, cid: u16) -> NvmeSqe {
    let mut sqe = NvmeSqe {
        opcode: op,
        ..Default::default()
    };
    sqe.command_id.set(cid);
    sqe
}

pub fn connect_sqe(cid: u16, qid: u16, sqsize: u16) -> NvmeSqe {
    let mut raw = [0u8; 64];
    raw[0] = opcode::FABRICS;
    raw[2..4].copy_from_slice(&cid.to_le_bytes());
    raw[4] = fabrics::CONNECT;
    raw[24..26].copy_from_slice(&qid.to_le_bytes());
    raw[26..28].copy_from_slice(&sqsize.to_le_bytes());
    NvmeSqe::read_from_bytes(&raw).expect("sqe is 64 bytes")
}

/// Full command capsule wire image, digests included when negotiated.
pub fn cmd_capsule(sqe: NvmeSqe, inline: &[u8], hdgst: bool, ddgst: bool) -> Vec<u8> {
    let hlen = nvmet_tcp_rs::models::capsule::request::CmdCapsulePdu::HLEN;
    let hdgst_len = 4 * hdgst as usize;
    let ddgst_len = if ddgst && !inline.is_empty() { 4 } else { 0 };

    let mut pdu = CmdCapsuleBuilder::new().sqe(sqe).header;
    pdu.ch.flags.set_hdgst(hdgst);
    pdu.ch.flags.set_ddgst(ddgst_len > 0);
    if !inline.is_empty() {
        pdu.ch.pdo = (hlen + hdgst_len) as u8;
    }
    pdu.ch
        .plen
        .set((hlen + hdgst_len + inline.len() + ddgst_len) as u32);

    let mut out = Vec::with_capacity(hlen + hdgst_len + inline.len() + ddgst_len);
    out.extend_from_slice(pdu.as_bytes());
    if hdgst {
        out.extend_from_slice(&header_digest(&out[..hlen]).to_le_bytes());
    }
    out.extend_from_slice(inline);
    if ddgst_len > 0 {
        out.extend_from_slice(&data_digest(inline).to_le_bytes());
    }
    out
}

/// Solicited write payload wire image.
pub fn h2c_capsule(
    cid: u16,
    ttag: u16,
    offset: u32,
    payload: &[u8],
    hdgst: bool,
    ddgst: bool,
) -> Vec<u8> {
    let hlen = nvmet_tcp_rs::models::data::request::H2CDataPdu::HLEN;
    let hdgst_len = 4 * hdgst as usize;
    let ddgst_len = 4 * ddgst as usize;

    let mut pdu = H2CDataBuilder::new()
        .command_id(cid)
        .ttag(ttag)
        .window(offset, payload.len() as u32)
        .header;
    pdu.ch.flags.set_hdgst(hdgst);
    pdu.ch.flags.set_ddgst(ddgst);
    pdu.ch.pdo = (hlen + hdgst_len) as u8;
    pdu.ch
        .plen
        .set((hlen + hdgst_len + payload.len() + ddgst_len) as u32);

    let mut out = Vec::with_capacity(hlen + hdgst_len + payload.len() + ddgst_len);
    out.extend_from_slice(pdu.as_bytes());
    if hdgst {
        out.extend_from_slice(&header_digest(&out[..hlen]).to_le_bytes());
    }
    out.extend_from_slice(payload);
    if ddgst {
        out.extend_from_slice(&data_digest(payload).to_le_bytes());
    }
    out
}

/// One whole PDU off the wire: common header, then `plen - 8` more bytes.
pub async fn read_pdu(stream: &mut TcpStream) -> Result<(PduType, Vec<u8>)> {
    let mut ch = [0u8; CH_LEN];
    stream.read_exact(&mut ch).await?;
    let plen = u32::from_le_bytes(ch[4..8].try_into().expect("4 bytes")) as usize;
    if plen < CH_LEN {
        bail!("bogus plen {plen}");
    }
    let mut full = vec![0u8; plen];
    full[..CH_LEN].copy_from_slice(&ch);
    stream.read_exact(&mut full[CH_LEN..]).await?;
    let t = PduType::try_from(ch[0]).map_err(|e| anyhow!("{e}"))?;
    Ok((t, full))
}

pub fn parse_rsp(bytes: &[u8]) -> Result<RspCapsulePdu> {
    RspCapsulePdu::read_from_bytes(&bytes[..RspCapsulePdu::HLEN])
        .map_err(|e| anyhow!("bad rsp capsule: {e}"))
}

pub fn parse_c2h(bytes: &[u8]) -> Result<(C2HDataPdu, &[u8])> {
    let hdr = C2HDataPdu::read_from_bytes(&bytes[..C2HDataPdu::HLEN])
        .map_err(|e| anyhow!("bad c2h_data: {e}"))?;
    let start = hdr.ch.pdo as usize;
    let len = hdr.data_length.get() as usize;
    let payload = &bytes[start..start + len];
    Ok((hdr, payload))
}

pub fn parse_r2t(bytes: &[u8]) -> Result<R2tPdu> {
    R2tPdu::read_from_bytes(&bytes[..R2tPdu::HLEN]).map_err(|e| anyhow!("bad r2t: {e}"))
}

/// Installs an I/O (or admin) submission queue via Fabrics Connect.
pub async fn connect_queue(stream: &mut TcpStream, qid: u16, sqsize: u16) -> Result<()> {
    connect_queue_with_digests(stream, qid, sqsize, false).await
}

pub async fn connect_queue_with_digests(
    stream: &mut TcpStream,
    qid: u16,
    sqsize: u16,
    hdgst: bool,
) -> Result<()> {
    let capsule = cmd_capsule(
        connect_sqe(0, qid, sqsize),
        &[0u8; CONNECT_DATA_LEN],
        hdgst,
        false,
    );
    stream.write_all(&capsule).await?;
    let (t, bytes) = read_pdu(stream).await?;
    if t != PduType::CapsuleResp {
        bail!("expected connect response, got {t:?}");
    }
    let rsp = parse_rsp(&bytes)?;
    if !rsp.cqe.is_success() {
        bail!("connect failed with status {:#06x}", rsp.cqe.status_code());
    }
    Ok(())
}

/// Waits until the registry drops to `n` live queues.
pub async fn wait_for_queues(registry: &Registry, n: usize) -> Result<()> {
    for _ in 0..100 {
        if registry.len() == n {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    bail!("registry stuck at {} queues (wanted {n})", registry.len())
}

pub async fn connect_target(t: &TestTarget) -> Result<TcpStream> {
    TcpStream::connect(t.addr).await.context("connect target")
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Listener handling.
//!
//! A port binds with forced socket buffers and a fixed backlog, then
//! accepts connections into new queues. Each accepted socket gets
//! `TCP_NODELAY` and an abortive linger; a rotating cursor spreads new
//! queues across workers.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::Config,
    queue::queue::Queue,
    target::{executor::CommandExecutor, registry::Registry},
};

pub struct Port {
    listener: TcpListener,
    cfg: Arc<Config>,
    registry: Arc<Registry>,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
    last_cpu: AtomicUsize,
    traddr: String,
}

impl Port {
    pub async fn bind(
        cfg: Arc<Config>,
        registry: Arc<Registry>,
        executor: Arc<dyn CommandExecutor>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let addr: SocketAddr = cfg
            .target
            .listen_address
            .parse()
            .with_context(|| format!("bad ListenAddress {}", cfg.target.listen_address))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_send_buffer_size(cfg.runtime.socket_buffer_bytes)?;
        socket.set_recv_buffer_size(cfg.runtime.socket_buffer_bytes)?;
        socket.bind(addr)?;
        let listener = socket.listen(cfg.runtime.backlog)?;
        let traddr = listener.local_addr()?.to_string();
        info!(%traddr, "port listening");
        Ok(Port {
            listener,
            cfg,
            registry,
            executor,
            cancel,
            last_cpu: AtomicUsize::new(0),
            traddr,
        })
    }

    /// Transport address, as reported to the discovery service.
    pub fn traddr(&self) -> &str {
        &self.traddr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; exits when the port is cancelled.
    pub async fn run(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(traddr = %self.traddr, "port shutting down");
                    return Ok(());
                },
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept_one(stream, peer),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                },
            }
        }
    }

    fn accept_one(&self, stream: TcpStream, peer: SocketAddr) {
        if self.registry.len() >= self.cfg.runtime.max_queues as usize {
            warn!(%peer, "queue limit reached, dropping connection");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, error = %e, "set_nodelay failed");
            return;
        }
        // Abortive close: a torn-down queue resets rather than lingers.
        if let Err(e) = stream.set_linger(Some(Duration::ZERO)) {
            warn!(%peer, error = %e, "set_linger failed");
            return;
        }

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let cpu = self.last_cpu.fetch_add(1, Ordering::Relaxed) % cpus;

        let handle = self.registry.register(peer);
        debug!(queue = handle.id, %peer, cpu, "connection accepted");
        let queue = Queue::new(
            stream,
            Arc::clone(&self.cfg),
            Arc::clone(&self.executor),
            Arc::clone(&self.registry),
            handle,
            cpu,
        );
        tokio::spawn(queue.run());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::Digest;

/// Page granule used for payload scatter-gather buffers.
pub const PAGE_SIZE: usize = 4096;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Parameters visible on the wire or negotiated at connection setup.
    pub target: TargetConfig,
    /// Implementation/runtime parameters that never travel over the wire.
    pub runtime: RuntimeConfig,
}

/// Wire-facing target parameters.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TargetConfig {
    #[serde(rename = "ListenAddress")]
    /// `host:port` the target listens on (NVMe/TCP default port is 4420).
    pub listen_address: String,

    #[serde(rename = "HeaderDigest")]
    /// Whether a requested header digest is accepted.
    pub header_digest: Digest,

    #[serde(rename = "DataDigest")]
    /// Whether a requested data digest is accepted.
    pub data_digest: Digest,

    #[serde(rename = "InlineDataSize", default = "default_inline_data_size")]
    /// Maximum in-capsule write payload accepted per command.
    pub inline_data_size: u32,
}

/// Runtime-only settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "SocketBufferBytes", default = "default_socket_buffer")]
    /// Forced SO_SNDBUF/SO_RCVBUF size for accepted connections.
    pub socket_buffer_bytes: u32,

    #[serde(rename = "Backlog", default = "default_backlog")]
    /// Listener backlog.
    pub backlog: u32,

    #[serde(rename = "MaxQueues")]
    /// External limit on simultaneously live queues.
    pub max_queues: u32,
}

fn default_inline_data_size() -> u32 {
    (4 * PAGE_SIZE) as u32
}

fn default_socket_buffer() -> u32 {
    8 * 1024 * 1024
}

fn default_backlog() -> u32 {
    128
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.target.listen_address.is_empty(),
            "ListenAddress must not be empty"
        );
        ensure!(self.runtime.max_queues >= 1, "MaxQueues must be >= 1");
        ensure!(
            self.target.inline_data_size as usize % PAGE_SIZE == 0,
            "InlineDataSize must be a multiple of {PAGE_SIZE}"
        );

        // The gather buffers rely on the kernel accepting a whole batch; a
        // send buffer smaller than one full caravan defeats that.
        if (self.runtime.socket_buffer_bytes as usize)
            < crate::queue::caravan::C1_CAPACITY
        {
            self.runtime.socket_buffer_bytes = default_socket_buffer();
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig {
                listen_address: "127.0.0.1:4420".to_string(),
                header_digest: Digest::CRC32C,
                data_digest: Digest::CRC32C,
                inline_data_size: default_inline_data_size(),
            },
            runtime: RuntimeConfig {
                socket_buffer_bytes: default_socket_buffer(),
                backlog: default_backlog(),
                max_queues: 128,
            },
        }
    }
}

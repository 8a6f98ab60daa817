// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use nvmet_tcp_rs::{
    cfg::{cli::config_path_from_args, config::Config, logger::init_logger},
    target::{mem::MemExecutor, port::Port, registry::Registry},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("configs/logger.yaml")?;

    let cfg = config_path_from_args("configs/target.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;
    let cfg = Arc::new(cfg);

    let registry = Arc::new(Registry::new());
    let executor = Arc::new(MemExecutor::new());
    let cancel = CancellationToken::new();

    let port = Port::bind(
        Arc::clone(&cfg),
        Arc::clone(&registry),
        executor,
        cancel.clone(),
    )
    .await?;
    info!("target ready on {}", port.traddr());

    let accept = tokio::spawn(port.run());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    registry.shutdown_all();
    accept.await??;

    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use reverse_tunnel_rs::{
    cfg::{cli::config_path_from_args, config::ClientConfig, logger::init_logger},
    client::control,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml")?;

    let cfg = config_path_from_args("config/client.yaml")
        .and_then(ClientConfig::load_from_file)
        .context("failed to resolve or load client config")?;

    control::run(cfg, CancellationToken::new()).await
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use reverse_tunnel_rs::{
    cfg::{cli::config_path_from_args, config::ServerConfig, logger::init_logger},
    server::Server,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml")?;

    let cfg = config_path_from_args("config/server.yaml")
        .and_then(ServerConfig::load_from_file)
        .context("failed to resolve or load server config")?;

    let server = Server::bind(&cfg).await?;
    server.run().await
}

//! Server role: control-plane acceptor, public-port acceptors and the shared
//! registration state.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Control-port acceptor and per-connection handlers.
pub mod control;
/// Public-port acceptors, one per configured binding.
pub mod public;
/// Process-wide client and session maps.
pub mod registry;

use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::{
    cfg::config::{PublicBinding, ServerConfig},
    server::registry::Registry,
};

/// A fully bound server, ready to run its acceptor loops.
///
/// Binding is separated from running so that startup failures abort the
/// process before any client traffic is accepted, and so callers can observe
/// the actual bound addresses.
pub struct Server {
    registry: Arc<Registry>,
    control: TcpListener,
    publics: Vec<(TcpListener, PublicBinding)>,
    allowed: Arc<HashSet<String>>,
    buf_size: usize,
}

impl Server {
    /// Binds the control listener and one public listener per configured
    /// binding. Any bind failure is fatal.
    pub async fn bind(cfg: &ServerConfig) -> Result<Self> {
        let settings = &cfg.server;

        let control = TcpListener::bind(format!("0.0.0.0:{}", settings.control_port))
            .await
            .with_context(|| {
                format!("failed to bind control port {}", settings.control_port)
            })?;
        info!(addr = %control.local_addr()?, "control listener ready");

        let mut publics = Vec::with_capacity(settings.clients.len());
        for binding in &settings.clients {
            let listener = TcpListener::bind(format!("0.0.0.0:{}", binding.public_port))
                .await
                .with_context(|| {
                    format!(
                        "failed to bind public port {} for {}",
                        binding.public_port, binding.client_id
                    )
                })?;
            info!(
                addr = %listener.local_addr()?,
                client_id = %binding.client_id,
                backend = %format!("{}:{}", binding.target_host, binding.target_port),
                "public listener ready"
            );
            publics.push((listener, binding.clone()));
        }

        let allowed: HashSet<String> = settings
            .clients
            .iter()
            .map(|b| b.client_id.clone())
            .collect();

        Ok(Self {
            registry: Arc::new(Registry::new()),
            control,
            publics,
            allowed: Arc::new(allowed),
            buf_size: settings.buf_size,
        })
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.control.local_addr()?)
    }

    pub fn public_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.publics
            .iter()
            .map(|(listener, _)| listener.local_addr().map_err(Into::into))
            .collect()
    }

    /// Shared registration state, exposed so operators and tests can observe
    /// which clients are online and how many sessions are parked.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Runs every acceptor loop until the process is killed.
    pub async fn run(self) -> Result<()> {
        for (listener, binding) in self.publics {
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                let client_id = binding.client_id.clone();
                if let Err(e) = public::accept_loop(listener, binding, registry).await {
                    error!(%client_id, "public acceptor exited: {e:#}");
                }
            });
        }

        control::accept_loop(self.control, self.registry, self.allowed, self.buf_size)
            .await
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::proto::record::{MAX_FIELD_LEN, OPEN_TUNNEL_FIXED_LEN};

/// Smallest accepted read-buffer capacity.
pub const MIN_BUF_SIZE: usize = 64;

/// Server-role configuration document.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    pub server: ServerSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerSettings {
    /// Control port the clients dial, string decimal.
    #[serde(rename = "port")]
    pub control_port: String,

    /// Read-buffer capacity shared by every control read loop. Also bounds
    /// the largest tunnel-open record a public acceptor may emit.
    #[serde(rename = "bufSize")]
    pub buf_size: usize,

    /// Allow-list of clients, each with its public-port binding.
    pub clients: Vec<PublicBinding>,
}

/// One `(client identifier, public port, target host, target port)` tuple.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PublicBinding {
    #[serde(rename = "clientId")]
    pub client_id: String,

    /// Public port external users connect to, string decimal.
    #[serde(rename = "port")]
    pub public_port: String,

    /// Backend host the client bridges each session to.
    #[serde(rename = "tHost")]
    pub target_host: String,

    /// Backend port, kept as text because it travels the wire verbatim.
    #[serde(rename = "tPort")]
    pub target_port: String,
}

impl PublicBinding {
    /// On-wire size of the tunnel-open record this binding produces.
    pub fn open_record_len(&self) -> usize {
        OPEN_TUNNEL_FIXED_LEN + self.target_host.len() + self.target_port.len()
    }
}

impl ServerConfig {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: ServerConfig =
            serde_yaml::from_str(&s).context("failed to parse server config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants the acceptors rely on.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;

        ensure!(
            s.buf_size >= MIN_BUF_SIZE,
            "bufSize must be >= {MIN_BUF_SIZE}"
        );
        s.control_port
            .parse::<u16>()
            .context("server port must be a decimal TCP port")?;

        for binding in &s.clients {
            ensure!(!binding.client_id.is_empty(), "clientId must not be empty");
            binding.public_port.parse::<u16>().with_context(|| {
                format!("public port for {} must be a decimal TCP port", binding.client_id)
            })?;
            ensure!(
                binding.target_host.len() <= MAX_FIELD_LEN,
                "tHost for {} exceeds {MAX_FIELD_LEN} bytes",
                binding.client_id
            );
            ensure!(
                !binding.target_port.is_empty()
                    && binding.target_port.len() <= MAX_FIELD_LEN,
                "tPort for {} must be 1..={MAX_FIELD_LEN} bytes",
                binding.client_id
            );
            // The whole tunnel-open record must fit one pre-allocated buffer.
            ensure!(
                s.buf_size > binding.open_record_len(),
                "bufSize {} cannot hold the tunnel-open record for {} ({} bytes)",
                s.buf_size,
                binding.client_id,
                binding.open_record_len()
            );
        }

        Ok(())
    }
}

/// Client-role configuration document.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    pub client: ClientSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientSettings {
    /// Server host to dial.
    pub host: String,

    /// Server control port, string decimal.
    pub port: String,

    /// Identifier presented at registration; must appear in the server's
    /// allow-list.
    #[serde(rename = "clientId")]
    pub client_id: String,

    /// Delay between heartbeat writes.
    #[serde(rename = "pingInterval", with = "serde_secs")]
    pub ping_interval: Duration,

    /// Consecutive heartbeat failures after which the control connection is
    /// declared dead.
    #[serde(rename = "pingMaxCnt")]
    pub ping_max_cnt: u32,

    /// Pause before re-dialing a lost control connection.
    #[serde(rename = "reconWaitTime", with = "serde_secs")]
    pub recon_wait_time: Duration,

    /// Read-buffer capacity of the control read loop.
    #[serde(rename = "bufSize")]
    pub buf_size: usize,
}

impl ClientSettings {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ClientConfig {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: ClientConfig =
            serde_yaml::from_str(&s).context("failed to parse client config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.client;

        ensure!(!c.host.is_empty(), "host must not be empty");
        c.port
            .parse::<u16>()
            .context("client port must be a decimal TCP port")?;
        ensure!(!c.client_id.is_empty(), "clientId must not be empty");
        ensure!(
            !c.ping_interval.is_zero(),
            "pingInterval must be at least one second"
        );
        ensure!(c.ping_max_cnt >= 1, "pingMaxCnt must be >= 1");
        ensure!(
            !c.recon_wait_time.is_zero(),
            "reconWaitTime must be at least one second"
        );
        ensure!(
            c.buf_size >= MIN_BUF_SIZE,
            "bufSize must be >= {MIN_BUF_SIZE}"
        );

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use reverse_tunnel_rs::{
    cfg::{
        config::{ClientConfig, ClientSettings, PublicBinding, ServerConfig, ServerSettings},
        logger::init_logger,
    },
    server::{Server, registry::Registry},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = init_logger("tests/config_logger.yaml");
});

pub fn init_test_logger() {
    Lazy::force(&LOGGER);
}

/// Echoes every byte back on each accepted connection.
pub async fn echo_backend() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = conn.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    Ok(addr)
}

/// An address nothing listens on; dials to it are refused.
pub async fn dead_target() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

pub fn binding_for(client_id: &str, target: SocketAddr) -> PublicBinding {
    PublicBinding {
        client_id: client_id.to_string(),
        public_port: "0".to_string(),
        target_host: target.ip().to_string(),
        target_port: target.port().to_string(),
    }
}

pub fn server_config(bindings: Vec<PublicBinding>) -> ServerConfig {
    ServerConfig {
        server: ServerSettings {
            control_port: "0".to_string(),
            buf_size: 1024,
            clients: bindings,
        },
    }
}

pub fn client_config(client_id: &str, control: SocketAddr) -> ClientConfig {
    ClientConfig {
        client: ClientSettings {
            host: control.ip().to_string(),
            port: control.port().to_string(),
            client_id: client_id.to_string(),
            ping_interval: Duration::from_secs(1),
            ping_max_cnt: 3,
            recon_wait_time: Duration::from_secs(1),
            buf_size: 1024,
        },
    }
}

pub struct TestServer {
    pub registry: Arc<Registry>,
    pub control: SocketAddr,
    pub publics: Vec<SocketAddr>,
}

/// The server binds the wildcard address; dial it via loopback.
fn loopback(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new([127, 0, 0, 1].into(), addr.port())
    } else {
        addr
    }
}

/// Binds a server from `cfg` and runs it in the background.
pub async fn spawn_server(cfg: &ServerConfig) -> Result<TestServer> {
    let server = Server::bind(cfg).await?;
    let test = TestServer {
        registry: server.registry(),
        control: loopback(server.control_addr()?),
        publics: server.public_addrs()?.into_iter().map(loopback).collect(),
    };
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    Ok(test)
}

pub async fn wait_until(what: &str, cond: impl Fn() -> bool) -> Result<()> {
    for _ in 0..200 {
        if cond() {
            return Ok(());
        }
        sleep(Duration::from_millis(25)).await;
    }
    bail!("timed out waiting for {what}")
}

pub async fn read_exactly(stream: &mut TcpStream, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .context("read timed out")??;
    Ok(buf)
}

/// True when a read on `stream` stays silent for `quiet`.
pub async fn stays_silent(stream: &mut TcpStream, quiet: Duration) -> bool {
    let mut byte = [0u8; 1];
    timeout(quiet, stream.read(&mut byte)).await.is_err()
}

/// Pushes `payload` through a public port and expects it echoed back.
pub async fn echo_through(public: SocketAddr, payload: &[u8]) -> Result<()> {
    let mut user = TcpStream::connect(public).await?;
    user.write_all(payload).await?;
    let back = read_exactly(&mut user, payload.len()).await?;
    if back != payload {
        bail!("echo mismatch: sent {payload:?}, got {back:?}");
    }
    Ok(())
}

/// Retries short echo probes until the full tunnel path answers.
pub async fn wait_for_tunnel(public: SocketAddr) -> Result<()> {
    for _ in 0..50 {
        let probe = async {
            let mut user = TcpStream::connect(public).await?;
            user.write_all(b"ping").await?;
            let mut buf = [0u8; 4];
            user.read_exact(&mut buf).await?;
            anyhow::ensure!(&buf == b"ping", "unexpected probe answer");
            Ok::<_, anyhow::Error>(())
        };
        if timeout(Duration::from_millis(500), probe).await.is_ok_and(|r| r.is_ok()) {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    bail!("tunnel never became ready on {public}")
}

//! TCP 回显服务：把每个对端发来的帧按同一分帧规则回给该对端。
//!
//! 用法：`tcp_echo [config.toml]`，缺省使用内置的 `configs/tcp_echo.toml`。

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use deliverer_core::ManagerBuilder;
use deliverer_examples::{ExampleConfig, init_tracing};
use tokio::runtime::Handle;
use tracing::{info, warn};

const BUNDLED_CONFIG: &str = include_str!("../../configs/tcp_echo.toml");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = match std::env::args().nth(1) {
        Some(path) => ExampleConfig::load(path)?,
        None => ExampleConfig::from_toml_str(BUNDLED_CONFIG)?,
    };

    let manager = Arc::new(
        ManagerBuilder::new()
            .config(config.manager.clone())
            .build()
            .context("failed to build manager")?,
    );
    manager.on_connected(|peer| info!(peer = %peer, "peer connected"));
    manager.on_disconnected(|peer| info!(peer = %peer, "peer disconnected"));
    let echo = Arc::downgrade(&manager);
    manager.on_receive_data(move |peer, frame: &Bytes| {
        let Some(manager) = echo.upgrade() else {
            return;
        };
        if let Err(err) = manager.send_packet_to(frame, peer) {
            warn!(peer = %peer, code = err.code(), error = %err, "echo failed");
        }
    });

    let protocol = config.transport.build(Handle::current());
    manager
        .start(protocol, config.packet_rule.build()?, None)
        .with_context(|| format!("failed to start {}", config.transport.kind()))?;
    info!(transport = config.transport.kind(), "echo service running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    manager.close();
    Ok(())
}

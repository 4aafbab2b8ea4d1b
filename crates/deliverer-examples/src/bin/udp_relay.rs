//! UDP 中继：在 `[transport]` 上接收报文，逐个经 `[forward]` 发出。
//!
//! 用法：`udp_relay [config.toml]`，缺省使用内置的 `configs/udp_relay.toml`。

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use deliverer_core::{ManagerBuilder, NoDivisionRule};
use deliverer_examples::{ExampleConfig, init_tracing};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

const BUNDLED_CONFIG: &str = include_str!("../../configs/udp_relay.toml");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = match std::env::args().nth(1) {
        Some(path) => ExampleConfig::load(path)?,
        None => ExampleConfig::from_toml_str(BUNDLED_CONFIG)?,
    };
    let forward = config
        .forward
        .clone()
        .context("udp_relay requires a [forward] transport")?;

    let downstream = Arc::new(
        ManagerBuilder::new()
            .config(config.manager.clone())
            .build()
            .context("failed to build downstream manager")?,
    );
    downstream
        .start(
            forward.build(Handle::current()),
            Box::new(NoDivisionRule::new()),
            None,
        )
        .with_context(|| format!("failed to start {}", forward.kind()))?;

    let upstream = ManagerBuilder::new()
        .config(config.manager.clone())
        .build()
        .context("failed to build upstream manager")?;
    let relay = Arc::clone(&downstream);
    upstream.on_receive_data(move |source, datagram: &Bytes| {
        debug!(source = %source, len = datagram.len(), "relaying datagram");
        if let Err(err) = relay.send(datagram) {
            warn!(code = err.code(), error = %err, "relay failed");
        }
    });
    upstream
        .start(
            config.transport.build(Handle::current()),
            config.packet_rule.build()?,
            None,
        )
        .with_context(|| format!("failed to start {}", config.transport.kind()))?;
    info!(
        from = config.transport.kind(),
        to = forward.kind(),
        "relay running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    upstream.close();
    downstream.close();
    Ok(())
}

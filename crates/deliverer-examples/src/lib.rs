#![doc = r#"
# deliverer-examples

## 定位（Why）
- 演示如何从一份 TOML 文件装配 Manager：`[manager]` 决定派发方式，`[packet_rule]` 选择分帧规则，
  `[transport]` 选择传输及其参数；
- 二进制 `tcp_echo`、`udp_relay` 共用本库的配置加载与日志初始化。

## 契约（What）
- [`ExampleConfig::from_toml_str`] 解析整份配置，未知字段直接报错；
- [`TransportConfig::build`] 在给定 Tokio 运行时上构造对应的 Protocol；
- [`init_tracing`] 安装 `fmt` 输出，过滤规则读取 `RUST_LOG`，缺省 `info`。
"#]

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use deliverer_core::{ManagerConfig, PacketRuleConfig, Protocol};
use deliverer_transport_tcp::{
    TcpClientConfig, TcpClientProtocol, TcpServerConfig, TcpServerProtocol,
};
use deliverer_transport_udp::{
    UdpReceiverConfig, UdpReceiverProtocol, UdpSenderConfig, UdpSenderProtocol,
};
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

/// 一份示例配置文件的全部内容。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExampleConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub packet_rule: PacketRuleConfig,
    pub transport: TransportConfig,
    /// 中继类示例的下游传输。
    #[serde(default)]
    pub forward: Option<TransportConfig>,
}

/// 传输选择；TOML 中以子表名区分，例如 `[transport.tcp_server]`。
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportConfig {
    TcpClient(TcpClientConfig),
    TcpServer(TcpServerConfig),
    UdpSender(UdpSenderConfig),
    UdpReceiver(UdpReceiverConfig),
}

impl ExampleConfig {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("invalid example configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("in {}", path.display()))
    }
}

impl TransportConfig {
    /// 在给定运行时上构造 Protocol。
    pub fn build(&self, handle: Handle) -> Arc<dyn Protocol> {
        match self {
            TransportConfig::TcpClient(config) => {
                Arc::new(TcpClientProtocol::with_runtime(config.clone(), handle))
            }
            TransportConfig::TcpServer(config) => {
                Arc::new(TcpServerProtocol::with_runtime(config.clone(), handle))
            }
            TransportConfig::UdpSender(config) => {
                Arc::new(UdpSenderProtocol::with_runtime(config.clone(), handle))
            }
            TransportConfig::UdpReceiver(config) => {
                Arc::new(UdpReceiverProtocol::with_runtime(config.clone(), handle))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::TcpClient(_) => "tcp_client",
            TransportConfig::TcpServer(_) => "tcp_server",
            TransportConfig::UdpSender(_) => "udp_sender",
            TransportConfig::UdpReceiver(_) => "udp_receiver",
        }
    }
}

/// 安装全局日志订阅者；重复调用时保留先安装者。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_configs_parse() {
        let echo = ExampleConfig::from_toml_str(include_str!("../configs/tcp_echo.toml"))
            .expect("tcp_echo.toml");
        assert_eq!(echo.transport.kind(), "tcp_server");
        assert_eq!(echo.manager.dispatch_thread_name, "echo-dispatch");
        assert!(echo.packet_rule.build().is_ok());
        assert!(echo.forward.is_none());

        let relay = ExampleConfig::from_toml_str(include_str!("../configs/udp_relay.toml"))
            .expect("udp_relay.toml");
        assert_eq!(relay.transport.kind(), "udp_receiver");
        assert_eq!(relay.forward.as_ref().map(TransportConfig::kind), Some("udp_sender"));
        assert!(!relay.manager.event_on_dispatch_context);
        assert_eq!(
            relay.packet_rule,
            PacketRuleConfig::NoDivision {
                max_frame_size: deliverer_core::DEFAULT_MAX_FRAME_SIZE
            }
        );
    }

    #[test]
    fn missing_transport_is_rejected() {
        let err = ExampleConfig::from_toml_str("[manager]\n").expect_err("no transport");
        assert!(format!("{err:#}").contains("transport"));
    }
}

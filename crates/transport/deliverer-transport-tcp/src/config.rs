use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use socket2::SockRef;
use tokio::net::TcpStream;

/// 缺省单次读取缓冲大小。
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `SO_LINGER` 与 `TCP_NODELAY` 两个最常调整的选项配置化，避免调用方直接操作 `socket2`；
/// - 客户端建连与服务端接受连接后都会调用同一个 `apply`，两端行为一致。
///
/// ## 核心逻辑（How）
/// - `linger` 为 `Some(dur)` 时通过 `socket2::SockRef::set_linger` 写入 `SO_LINGER`，
///   关闭阶段在 `dur` 后仍未发送完就以 RST 释放；`None` 沿用内核默认；
/// - `nodelay` 直接写入 `TCP_NODELAY`，缺省开启，小帧消息无需等待 Nagle 合并。
///
/// ## 注意事项（Trade-offs）
/// - `SO_LINGER` 在 Linux 上取整到秒；过小的值可能丢弃发送缓冲中的数据并让对端收到 `ECONNRESET`。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TcpSocketConfig {
    linger_ms: Option<u64>,
    nodelay: bool,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self {
            linger_ms: None,
            nodelay: true,
        }
    }
}

impl TcpSocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger_ms = linger.map(|dur| u64::try_from(dur.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger_ms.map(Duration::from_millis)
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        if let Some(linger) = self.linger() {
            SockRef::from(stream).set_linger(Some(linger))?;
        }
        Ok(())
    }
}

/// TCP 客户端配置。
///
/// `reconnect_interval_ms` 为 `None` 时不自动重连：建连失败或连接断开后 Protocol 进入 `Closed`；
/// 设置后在断开或建连失败时按该间隔持续重试，直到 `close`。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TcpClientConfig {
    pub server: SocketAddr,
    #[serde(default)]
    pub reconnect_interval_ms: Option<u64>,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default)]
    pub socket: TcpSocketConfig,
}

impl TcpClientConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            reconnect_interval_ms: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            socket: TcpSocketConfig::default(),
        }
    }

    /// 开启自动重连。
    pub fn with_auto_reconnect(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_socket_config(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.reconnect_interval_ms.map(Duration::from_millis)
    }
}

/// TCP 服务端配置。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TcpServerConfig {
    pub bind: SocketAddr,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default)]
    pub socket: TcpSocketConfig,
}

impl TcpServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            socket: TcpSocketConfig::default(),
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_socket_config(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linger_round_trips_through_builder() {
        let linger = Some(Duration::from_secs(2));
        let config = TcpSocketConfig::new().with_linger(linger).with_nodelay(false);
        assert_eq!(config.linger(), linger);
        assert!(!config.nodelay());
    }

    #[test]
    fn client_config_parses_from_toml() {
        let config: TcpClientConfig = toml::from_str(
            "server = \"127.0.0.1:9099\"\nreconnect_interval_ms = 250\n[socket]\nlinger_ms = 1000",
        )
        .expect("parse");
        assert_eq!(config.server, "127.0.0.1:9099".parse().expect("addr"));
        assert_eq!(config.reconnect_interval(), Some(Duration::from_millis(250)));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.socket.linger(), Some(Duration::from_secs(1)));
        assert!(config.socket.nodelay());
    }

    #[test]
    fn server_config_defaults() {
        let config: TcpServerConfig = toml::from_str("bind = \"0.0.0.0:0\"").expect("parse");
        assert_eq!(config, TcpServerConfig::new("0.0.0.0:0".parse().expect("addr")));
    }
}

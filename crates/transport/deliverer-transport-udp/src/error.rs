use std::net::SocketAddr;

use deliverer_core::DelivererError;
use thiserror::Error;

/// UDP 模块统一错误类型。
///
/// 对外统一转换为 [`DelivererError`]：绑定与地址查询归入 `TransportStart`，收发归入 `TransportSend`，
/// 文案前缀为 `deliverer.transport.udp.*` 错误码。
#[derive(Debug, Error)]
pub enum UdpError {
    /// 绑定失败。
    #[error("无法绑定 UDP 套接字到 {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// 设置默认目的地址失败。
    #[error("无法将 UDP 套接字关联到 {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// 查询本地地址失败。
    #[error("无法获取 UDP 套接字本地地址: {0}")]
    LocalAddr(#[source] std::io::Error),
    /// 当前线程不在 Tokio 运行时内。
    #[error("未找到 Tokio 运行时: {0}")]
    Runtime(#[source] tokio::runtime::TryCurrentError),
    /// 发送失败。
    #[error("发送 UDP 报文失败: {0}")]
    Send(#[source] std::io::Error),
    /// 报文超过配置的最大长度。
    #[error("UDP 报文长度 {len} 超过上限 {max}")]
    Oversized { len: usize, max: usize },
}

impl UdpError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            UdpError::Bind { .. } => "deliverer.transport.udp.bind_failed",
            UdpError::Connect { .. } => "deliverer.transport.udp.connect_failed",
            UdpError::LocalAddr(_) => "deliverer.transport.udp.local_addr_failed",
            UdpError::Runtime(_) => "deliverer.transport.udp.runtime_unavailable",
            UdpError::Send(_) => "deliverer.transport.udp.send_failed",
            UdpError::Oversized { .. } => "deliverer.transport.udp.oversized",
        }
    }
}

impl From<UdpError> for DelivererError {
    fn from(error: UdpError) -> Self {
        let detail = format!("[{}] {}", error.code(), error);
        match error {
            UdpError::Send(_) | UdpError::Oversized { .. } => DelivererError::send_failed(detail),
            _ => DelivererError::start_failed(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deliverer_core::error::codes;
    use std::io;

    #[test]
    fn bind_errors_become_start_failures() {
        let err: DelivererError = UdpError::Bind {
            addr: "127.0.0.1:9".parse().expect("addr"),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        }
        .into();
        assert_eq!(err.code(), codes::PROTOCOL_START_FAILED);
        assert!(err.to_string().contains("deliverer.transport.udp.bind_failed"));
    }

    #[test]
    fn oversized_datagrams_become_send_failures() {
        let err: DelivererError = UdpError::Oversized { len: 10, max: 4 }.into();
        assert_eq!(err.code(), codes::TRANSPORT_SEND_FAILED);
    }
}

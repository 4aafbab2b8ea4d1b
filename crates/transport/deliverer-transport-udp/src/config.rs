use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::Deserialize;

/// IPv4 UDP 报文的最大载荷。
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// UDP 发送端配置。
///
/// `bind` 缺省为与目的地址同族的通配地址、系统分配端口。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UdpSenderConfig {
    pub destination: SocketAddr,
    #[serde(default)]
    pub bind: Option<SocketAddr>,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl UdpSenderConfig {
    pub fn new(destination: SocketAddr) -> Self {
        Self {
            destination,
            bind: None,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size.clamp(1, MAX_DATAGRAM_SIZE);
        self
    }

    /// 实际使用的本地绑定地址。
    pub fn local_bind(&self) -> SocketAddr {
        self.bind.unwrap_or_else(|| match self.destination {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        })
    }
}

/// UDP 接收端配置。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UdpReceiverConfig {
    pub bind: SocketAddr,
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl UdpReceiverConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size.clamp(1, MAX_DATAGRAM_SIZE);
        self
    }
}

fn default_max_datagram_size() -> usize {
    MAX_DATAGRAM_SIZE
}

#![deny(unsafe_code)]
#![doc = r#"
# deliverer-transport-udp

## 模块使命（Why）
- 为 `deliverer-core` 提供无连接传输：[`UdpSenderProtocol`] 向固定目的地址发送报文，
  [`UdpReceiverProtocol`] 在本地端口接收报文；
- 报文边界天然存在，通常与 `NoDivisionRule` 搭配使用。

## 核心契约（What）
- 两端都在 `start` 中同步绑定，端口冲突等错误立即返回；
- 发送端绑定后即为 `Connected`，并接收来自目的地址的回包；接收端处于 `Listening`，不可发送；
- 错误先以 [`UdpError`] 描述，再转换为 [`DelivererError`](deliverer_core::DelivererError)，文案携带 `deliverer.transport.udp.*` 错误码。

## 实现策略（How）
- 绑定使用标准库套接字完成后通过 `UdpSocket::from_std` 注册到构造时捕获的 Tokio 运行时；
- 接收泵与写任务运行在该运行时上，`close` 取消两者。

## 风险提示（Trade-offs）
- UDP 不保证送达与顺序，Manager 的分帧状态对报文丢失无感知。
"#]

mod config;
mod error;
mod receiver;
mod sender;
mod socket;

pub use config::{MAX_DATAGRAM_SIZE, UdpReceiverConfig, UdpSenderConfig};
pub use error::UdpError;
pub use receiver::UdpReceiverProtocol;
pub use sender::UdpSenderProtocol;

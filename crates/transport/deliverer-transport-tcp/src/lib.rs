#![deny(unsafe_code)]
#![doc = r#"
# deliverer-transport-tcp

## 模块使命（Why）
- 为 `deliverer-core` 的 [`Protocol`](deliverer_core::Protocol) 契约提供基于 Tokio 的 TCP 实现：
  主动连接的 [`TcpClientProtocol`] 与监听多对端的 [`TcpServerProtocol`]；
- 读写泵运行在 Tokio 运行时上，事件在 I/O 任务中产生，由 Manager 决定是否切换到派发上下文。

## 核心契约（What）
- 客户端：`start` 异步建连，成功后上报 `Connected(id)`；可配置自动重连；
- 服务端：`start` 同步绑定并进入 `Listening`，每个接入对端拥有独立身份，支持广播与定向发送；
- IO 错误经 `OperationKind` 表映射为 [`DelivererError`](deliverer_core::DelivererError)，文案携带 `deliverer.transport.tcp.*` 错误码。

## 实现策略（How）
- [`TcpSocketConfig`] 在建连或接受连接后立即写入 `SO_LINGER`、`TCP_NODELAY`；
- 每条连接拆分为读半部与写半部，写半部由独立任务消费无界通道，`send` 永不阻塞调用方。

## 风险提示（Trade-offs）
- Protocol 构造时捕获 Tokio 运行时句柄，运行时关闭后 `start` 启动的任务随之终止；
- 写通道无界，发送方需自行控制速率。
"#]

mod client;
mod config;
mod error;
mod link;
mod server;

pub use client::TcpClientProtocol;
pub use config::{DEFAULT_READ_BUFFER_SIZE, TcpClientConfig, TcpServerConfig, TcpSocketConfig};
pub use server::TcpServerProtocol;

#![deny(unsafe_code)]
#![doc = r#"
# deliverer-core

## 设计动机（Why）
- **定位**：可插拔的网络通信门面。使用方面对一个 [`Manager`]，通过它启动连接、发送对象、
  接收 `Connected / Disconnected / ReceiveData` 三类事件；
- **可替换的四件策略**：传输（[`Protocol`]）、分帧（[`PacketRule`]）、序列化（[`DeliveryBox`]）
  与事件派发上下文（[`DispatchQueue`]）彼此独立，任意组合；
- **并发纪律**：网络 I/O 发生在传输的后台上下文，事件按配置切换到指定的单线程上下文，
  或直接在 I/O 上下文中回调；`close` 返回后旧连接的事件不会迟到。

## 核心契约（What）
- [`Manager::start`] 绑定一组策略，重复调用返回 [`DelivererError::AlreadyStarted`]；
- [`Manager::send`] 在未启动时返回 [`DelivererError::NotStarted`]；
- 入站字节按来源身份累积，由 PacketRule 切帧、DeliveryBox 解码后逐帧派发；
- 入站帧超过上限时强制关闭传输并派发 `Disconnected`；
- 错误统一为 [`DelivererError`]，每个变体附带稳定错误码（见 [`error::codes`]）。

## 模块地图（How）
- [`protocol`]：Protocol 契约、身份、状态机与订阅槽位；
- [`packet_rule`]：分帧契约与长度前缀、分隔符、定长、不分帧四种参考规则；
- [`delivery_box`]：序列化契约与字节直通、UTF-8 字符串、JSON 三种参考实现；
- [`dispatch`]：派发队列契约，手动泵出与后台线程两种实现；
- [`manager`]：编排核心；[`config`]：TOML 配置；[`loopback`]：进程内回环传输；
- [`testing`]：测试观察者，记录事件及其执行线程。

## 风险与考量（Trade-offs）
- 具体网络传输位于独立 crate（`deliverer-transport-tcp`、`deliverer-transport-udp`），
  核心 crate 只依赖 `tokio::sync`，不绑定运行时。
"#]

pub mod config;
pub mod delivery_box;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod loopback;
pub mod manager;
pub mod packet_rule;
pub mod protocol;
pub mod testing;

pub use config::{ManagerConfig, PacketRuleConfig};
#[cfg(feature = "json")]
pub use delivery_box::JsonBox;
pub use delivery_box::{DeliveryBox, PassThrough, Utf8StringBox};
pub use dispatch::{DispatchQueue, DispatchTask, ManualDispatcher, ThreadDispatcher};
pub use error::{DelivererError, Result};
pub use events::{HandlerId, ManagerEvent};
pub use loopback::LoopbackProtocol;
pub use manager::{Manager, ManagerBuilder};
pub use packet_rule::{
    DEFAULT_MAX_FRAME_SIZE, Endian, FixedLengthRule, HeaderWidth, NoDivisionRule, PacketRule,
    SizeBodyRule, TerminateRule,
};
pub use protocol::{
    EventSink, Protocol, ProtocolEvent, ProtocolId, ProtocolState, SinkSlot, StateCell,
};

//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为 Manager 及三类可插拔策略（Protocol / PacketRule / DeliveryBox）提供统一的错误域；
//! - 区分“本地误用”（`AlreadyStarted`、`NotStarted`、`NotConnected`、`UnknownTarget`）与
//!   “协作方失败”（`TransportSend`、`FrameTooLarge`、`Encoding`、`Decoding` 等）两大类。
//!
//! ## 设计要求（What）
//! - 所有变体派生 [`thiserror::Error`]，可直接交给 `anyhow` 等上层框架处理；
//! - 每个变体通过 [`DelivererError::code`] 暴露稳定错误码，格式为 `<领域>.<语义>`，便于日志检索与聚合；
//! - 核心不做任何自动重试，错误一律同步返回给发起调用方。

use std::borrow::Cow;

use thiserror::Error;

/// 稳定错误码集合。
///
/// 错误码遵循 `deliverer.<组件>.<语义>` 命名，传输实现 crate 也复用这些常量，
/// 使同一语义在不同介质上拥有一致的检索键。
pub mod codes {
    /// `start` 时已有 Protocol 绑定。
    pub const MANAGER_ALREADY_STARTED: &str = "deliverer.manager.already_started";
    /// 尚未 `start` 就调用发送。
    pub const MANAGER_NOT_STARTED: &str = "deliverer.manager.not_started";
    /// `send_to` 指定的目标不属于当前 Protocol。
    pub const MANAGER_UNKNOWN_TARGET: &str = "deliverer.manager.unknown_target";
    /// Protocol 未处于 Connected 状态。
    pub const PROTOCOL_NOT_CONNECTED: &str = "deliverer.protocol.not_connected";
    /// Protocol 启动（连接/监听）失败。
    pub const PROTOCOL_START_FAILED: &str = "deliverer.protocol.start_failed";
    /// 底层传输发送失败。
    pub const TRANSPORT_SEND_FAILED: &str = "deliverer.transport.send_failed";
    /// 帧长度超出 PacketRule 上限。
    pub const PACKET_FRAME_TOO_LARGE: &str = "deliverer.packet.frame_too_large";
    /// DeliveryBox 序列化失败。
    pub const DELIVERY_ENCODE: &str = "deliverer.delivery.encode";
    /// DeliveryBox 反序列化失败。
    pub const DELIVERY_DECODE: &str = "deliverer.delivery.decode";
    /// 配置解析失败。
    pub const CONFIG_INVALID: &str = "deliverer.config.invalid";
}

/// 通信门面的统一错误类型。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可安全跨线程传播；
///   - 需要携带上下文的变体使用 `Cow<'static, str>` 保存描述，静态文案零分配；
///   - `FrameTooLarge` 在入站路径上不会返回给调用方，而是触发 Manager 强制关闭连接并广播 `Disconnected`。
/// - **执行 (How)**：`code()` 将变体映射到 [`codes`] 中的稳定错误码。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DelivererError {
    /// Manager 已绑定 Protocol，必须先 `close` 才能再次 `start`。
    #[error("manager already started; call close() before starting again")]
    AlreadyStarted,

    /// Manager 尚未绑定 Protocol。
    #[error("manager is not started")]
    NotStarted,

    /// Protocol 尚未进入 Connected 状态，无法发送。
    #[error("protocol {protocol} is not connected")]
    NotConnected { protocol: u64 },

    /// `send_to` 的目标身份与当前绑定的 Protocol 不匹配。
    #[error("target {target} is not served by the bound protocol")]
    UnknownTarget { target: u64 },

    /// Protocol 的连接/监听流程失败。
    #[error("protocol failed to start: {detail}")]
    TransportStart { detail: Cow<'static, str> },

    /// 底层传输发送失败，原样上抛，不做重试。
    #[error("transport send failed: {detail}")]
    TransportSend { detail: Cow<'static, str> },

    /// 残留缓冲在未形成完整帧前超出上限，或声明的帧体长度超限。
    #[error("frame of {len} bytes exceeds maximum frame size {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// DeliveryBox 无法把对象编码为字节。
    #[error("encoding failed: {detail}")]
    Encoding { detail: Cow<'static, str> },

    /// DeliveryBox 无法把字节解码为对象。
    #[error("decoding failed: {detail}")]
    Decoding { detail: Cow<'static, str> },

    /// 配置文本无法解析。
    #[error("invalid configuration: {detail}")]
    Config { detail: Cow<'static, str> },
}

impl DelivererError {
    /// 返回变体对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DelivererError::AlreadyStarted => codes::MANAGER_ALREADY_STARTED,
            DelivererError::NotStarted => codes::MANAGER_NOT_STARTED,
            DelivererError::NotConnected { .. } => codes::PROTOCOL_NOT_CONNECTED,
            DelivererError::UnknownTarget { .. } => codes::MANAGER_UNKNOWN_TARGET,
            DelivererError::TransportStart { .. } => codes::PROTOCOL_START_FAILED,
            DelivererError::TransportSend { .. } => codes::TRANSPORT_SEND_FAILED,
            DelivererError::FrameTooLarge { .. } => codes::PACKET_FRAME_TOO_LARGE,
            DelivererError::Encoding { .. } => codes::DELIVERY_ENCODE,
            DelivererError::Decoding { .. } => codes::DELIVERY_DECODE,
            DelivererError::Config { .. } => codes::CONFIG_INVALID,
        }
    }

    /// 是否属于调用方误用（同步返回、永不重试）。
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            DelivererError::AlreadyStarted
                | DelivererError::NotStarted
                | DelivererError::NotConnected { .. }
                | DelivererError::UnknownTarget { .. }
        )
    }

    /// 构造发送失败错误。
    pub fn send_failed(detail: impl Into<Cow<'static, str>>) -> Self {
        DelivererError::TransportSend {
            detail: detail.into(),
        }
    }

    /// 构造启动失败错误。
    pub fn start_failed(detail: impl Into<Cow<'static, str>>) -> Self {
        DelivererError::TransportStart {
            detail: detail.into(),
        }
    }

    /// 构造编码失败错误。
    pub fn encoding(detail: impl Into<Cow<'static, str>>) -> Self {
        DelivererError::Encoding {
            detail: detail.into(),
        }
    }

    /// 构造解码失败错误。
    pub fn decoding(detail: impl Into<Cow<'static, str>>) -> Self {
        DelivererError::Decoding {
            detail: detail.into(),
        }
    }
}

/// crate 级 `Result` 别名，默认错误类型为 [`DelivererError`]。
pub type Result<T, E = DelivererError> = std::result::Result<T, E>;

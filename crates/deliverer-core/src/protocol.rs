//! Protocol 契约：一条逻辑连接端点的抽象。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 让 Manager 只依赖“连接/监听、发送、关闭、事件上报”四项能力，具体介质（TCP、UDP、进程内回环）
//!   由外部 crate 实现；
//! - 事件在传输自身的 I/O 上下文中产生，Manager 负责后续的分帧、反序列化与线程切换。
//!
//! ## 契约（What）
//! - 状态机：`Unstarted → {Connecting, Listening} → Connected → Closed`，`Connected` 可因失败或显式关闭直接进入 `Closed`；
//! - `send` 在非 `Connected` 状态返回 [`DelivererError::NotConnected`]；
//! - `close` 幂等，可在任意状态（包括连接中）调用；
//! - 订阅通过 [`EventSink`] 安装，`unsubscribe` 返回后 Protocol 不得再发起新的回调。
//!
//! ## 注意事项（Trade-offs）
//! - trait 方法全部接收 `&self`：事件回调与使用方调用可能并发发生，实现需自行使用内部可变性；
//! - 数据块边界由传输决定，不携带任何分帧保证。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{DelivererError, Result};

/// 连接端点的稳定身份。
///
/// 同一进程内单调分配、永不复用；监听型 Protocol 为每个接入的对端额外分配一个身份，
/// 使用方据此区分多客户端场景中的不同对端。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProtocolId(u64);

static NEXT_PROTOCOL_ID: AtomicU64 = AtomicU64::new(1);

impl ProtocolId {
    /// 分配一个新的身份。
    pub fn next() -> Self {
        ProtocolId(NEXT_PROTOCOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始数值，供日志与错误上下文使用。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol#{}", self.0)
    }
}

/// Protocol 生命周期状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ProtocolState {
    Unstarted = 0,
    Connecting = 1,
    Listening = 2,
    Connected = 3,
    Closed = 4,
}

impl ProtocolState {
    /// 是否可以发送数据。
    pub fn is_usable(self) -> bool {
        matches!(self, ProtocolState::Connected)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProtocolState::Unstarted,
            1 => ProtocolState::Connecting,
            2 => ProtocolState::Listening,
            3 => ProtocolState::Connected,
            _ => ProtocolState::Closed,
        }
    }
}

/// 以原子变量承载 [`ProtocolState`]，供传输实现在 I/O 任务与调用方之间共享状态。
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// 初始状态为 `Unstarted`。
    pub const fn new() -> Self {
        StateCell(AtomicU8::new(ProtocolState::Unstarted as u8))
    }

    pub fn get(&self) -> ProtocolState {
        ProtocolState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ProtocolState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// 仅当当前状态等于 `expected` 时迁移到 `next`，返回是否迁移成功。
    pub fn transition_from(&self, expected: ProtocolState, next: ProtocolState) -> bool {
        self.0
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// 仅当当前状态不是 `Closed` 时迁移，返回是否迁移成功。
    ///
    /// `Closed` 是吸收态：关闭与迟到的连接完成回调竞争时，后者不能把状态拉回 `Connected`。
    pub fn transition_unless_closed(&self, next: ProtocolState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == ProtocolState::Closed as u8 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// 迁移到 `Closed`，返回迁移前的状态。
    pub fn close(&self) -> ProtocolState {
        ProtocolState::from_u8(self.0.swap(ProtocolState::Closed as u8, Ordering::AcqRel))
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Protocol 上报的三类事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolEvent {
    /// 对端链路可用，携带该链路的身份（监听型 Protocol 为对端子身份）。
    Connected(ProtocolId),
    /// 链路丢失或被显式关闭。
    Disconnected(ProtocolId),
    /// 一段原始字节，边界由传输决定。
    DataReceived(ProtocolId, Bytes),
}

impl ProtocolEvent {
    /// 事件来源身份。
    pub fn source(&self) -> ProtocolId {
        match self {
            ProtocolEvent::Connected(id)
            | ProtocolEvent::Disconnected(id)
            | ProtocolEvent::DataReceived(id, _) => *id,
        }
    }
}

/// 事件订阅回调。
pub type EventSink = Arc<dyn Fn(ProtocolEvent) + Send + Sync>;

/// 传输实现共享的订阅槽位。
///
/// `emit` 先克隆出当前订阅者再在锁外调用，回调内部可以再次 `emit`、`clear` 甚至重新 `install`；
/// 代价是 `clear` 返回时可能仍有一次已取出订阅者的回调在其他线程执行，
/// 订阅方需要在自己的边界上再做一次有效性检查（Manager 以会话的拆除标志完成这一步）。
#[derive(Default)]
pub struct SinkSlot {
    sink: RwLock<Option<EventSink>>,
}

impl SinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, sink: EventSink) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear(&self) {
        self.sink.write().take();
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.read().is_some()
    }

    /// 把事件交给当前订阅者；无订阅者时静默丢弃。
    pub fn emit(&self, event: ProtocolEvent) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

impl fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSlot")
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// 连接端点契约，具体介质由外部 crate 实现。
///
/// # 契约说明（What）
/// - `start`：开始连接或监听；成功返回只代表流程已启动，`Connected` 事件可能稍后异步到达；
/// - `send`：把字节交给传输，非阻塞；仅 `Connected` 状态可用；
/// - `send_to`：面向监听型 Protocol 的定向发送，默认实现只接受自身身份；
/// - `accepts_target`：判断某身份是否由本 Protocol 服务，Manager 在 `send_to` 前据此校验；
/// - `close`：幂等，释放传输资源，取消挂起的 I/O。
pub trait Protocol: Send + Sync + 'static {
    /// 本端点身份。
    fn id(&self) -> ProtocolId;

    /// 当前状态。
    fn state(&self) -> ProtocolState;

    /// 安装事件回调，替换已有订阅。
    fn subscribe(&self, sink: EventSink);

    /// 移除事件回调。
    fn unsubscribe(&self);

    /// 开始连接或监听。
    fn start(&self) -> Result<()>;

    /// 发送一段字节。
    fn send(&self, buf: &[u8]) -> Result<()>;

    /// 定向发送；默认仅在目标为自身时退化为 [`Protocol::send`]。
    fn send_to(&self, buf: &[u8], target: ProtocolId) -> Result<()> {
        if target == self.id() {
            self.send(buf)
        } else {
            Err(DelivererError::UnknownTarget {
                target: target.get(),
            })
        }
    }

    /// 目标身份是否由本 Protocol 服务。
    fn accepts_target(&self, target: ProtocolId) -> bool {
        target == self.id()
    }

    /// 关闭传输。
    fn close(&self);
}

impl fmt::Debug for dyn Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = ProtocolId::next();
        let b = ProtocolId::next();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(format!("{a}"), format!("protocol#{}", a.get()));
    }

    #[test]
    fn closed_state_absorbs_late_transitions() {
        let cell = StateCell::new();
        assert!(cell.transition_unless_closed(ProtocolState::Connecting));
        assert_eq!(cell.close(), ProtocolState::Connecting);
        assert!(!cell.transition_unless_closed(ProtocolState::Connected));
        assert_eq!(cell.get(), ProtocolState::Closed);
    }

    #[test]
    fn only_one_concurrent_start_wins_the_transition() {
        let cell = Arc::new(StateCell::new());
        let winners: usize = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    cell.transition_from(ProtocolState::Unstarted, ProtocolState::Connecting)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().expect("join")))
            .sum();
        assert_eq!(winners, 1);
        assert_eq!(cell.get(), ProtocolState::Connecting);
        assert!(!cell.transition_from(ProtocolState::Unstarted, ProtocolState::Listening));
    }

    #[test]
    fn sink_slot_stops_delivery_after_clear() {
        let slot = SinkSlot::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        slot.install(Arc::new(move |event| sink_seen.lock().push(event)));

        let id = ProtocolId::next();
        slot.emit(ProtocolEvent::Connected(id));
        slot.clear();
        slot.emit(ProtocolEvent::Disconnected(id));

        assert_eq!(*seen.lock(), vec![ProtocolEvent::Connected(id)]);
        assert!(!slot.is_subscribed());
    }
}

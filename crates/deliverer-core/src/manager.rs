//! Manager：把 Protocol、PacketRule、DeliveryBox 与派发上下文组合成一个通信门面。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 使用方只面对 `start / send / close` 与三类事件，不关心字节如何分帧、对象如何编码、
//!   事件在哪个线程产生；
//! - 网络事件在传输的后台上下文中产生，Manager 负责把它们安全地交给使用方，
//!   并保证 `close` 返回后旧连接的事件不会迟到。
//!
//! ## 体系位置（Architecture）
//! - 出站：`send(&T)` → `DeliveryBox::serialize` → `Protocol::send`；
//! - 入站：`ProtocolEvent` → 按来源身份累积残留 → `PacketRule::extract_frames`
//!   → 逐帧 `DeliveryBox::deserialize` → 派发 → 使用方回调。
//!
//! ## 核心机制（How）
//! - 每次 `start` 创建一个 `Session`，持有本次绑定的三件策略与残留缓冲；
//!   Protocol 的事件回调只弱引用该会话，会话被释放后迟到的事件自然失效；
//! - 会话携带拆除标志与一把读写闸门：派发边界在读锁内检查标志后才调用使用方回调，
//!   `close` 置位标志后获取写锁，等待已经越过检查的派发执行完毕；
//! - 使用方在回调内部调用 `close`（同一线程正在派发该会话）时不等待闸门，避免自锁；
//! - 入站帧超过上限时强制关闭 Protocol，为越限来源以及所有已报告 `Connected`
//!   且尚未断开的对端补发 `Disconnected`。
//!
//! ## 契约（What）
//! - 同一时刻至多绑定一个 Protocol；重复 `start` 返回 `AlreadyStarted`；
//! - 未启动时 `send` 返回 `NotStarted`；`close` 幂等，未启动时为空操作；
//! - 显式 `close` 先退订再关闭传输，因此不会产生 `Disconnected` 事件；
//! - 同一 Protocol 的事件按产生顺序派发，同一数据块切出的多帧按切分顺序逐帧派发；
//! - 单个回调失败（panic）不影响后续事件；
//! - `Drop` 等价于一次 `close`。
//!
//! ## 注意事项（Trade-offs）
//! - 直接派发模式下回调运行在传输的 I/O 上下文中，阻塞回调会拖慢该连接的读循环；
//! - 反序列化失败的帧记录 `warn!` 后丢弃，不会中断连接。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::delivery_box::{DeliveryBox, PassThrough};
use crate::dispatch::{DispatchQueue, ThreadDispatcher};
use crate::error::{DelivererError, Result};
use crate::events::{HandlerId, HandlerRegistry, ManagerEvent};
use crate::packet_rule::PacketRule;
use crate::protocol::{EventSink, Protocol, ProtocolEvent, ProtocolId};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// 当前线程正在派发的会话序号。
    static DISPATCHING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// 在作用域内把会话标记为“本线程正在派发”。
struct DispatchMark(u64);

impl DispatchMark {
    fn enter(serial: u64) -> Self {
        DISPATCHING.with(|stack| stack.borrow_mut().push(serial));
        DispatchMark(serial)
    }

    fn is_active(serial: u64) -> bool {
        DISPATCHING.with(|stack| stack.borrow().contains(&serial))
    }
}

impl Drop for DispatchMark {
    fn drop(&mut self) {
        DISPATCHING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|serial| *serial == self.0) {
                stack.remove(pos);
            }
        });
    }
}

/// 一次 `start` 到 `close` 之间的绑定。
struct Session<T> {
    serial: u64,
    protocol: Arc<dyn Protocol>,
    rule: Box<dyn PacketRule>,
    delivery_box: Arc<dyn DeliveryBox<T>>,
    residues: Mutex<HashMap<ProtocolId, BytesMut>>,
    /// 已向使用方报告 `Connected`、尚未报告 `Disconnected` 的身份，按连接顺序。
    live: Mutex<Vec<ProtocolId>>,
    tearing_down: AtomicBool,
    gate: RwLock<()>,
}

impl<T> Session<T> {
    fn is_tearing_down(&self) -> bool {
        self.tearing_down.load(Ordering::Acquire)
    }
}

struct Inner<T> {
    handlers: HandlerRegistry<T>,
    dispatcher: Option<Arc<dyn DispatchQueue>>,
    default_box: Arc<dyn DeliveryBox<T>>,
    session: Mutex<Option<Arc<Session<T>>>>,
}

impl<T: Send + 'static> Inner<T> {
    fn current(&self) -> Result<Arc<Session<T>>> {
        self.session.lock().clone().ok_or(DelivererError::NotStarted)
    }

    /// 若会话仍是当前绑定则解除绑定，返回是否解除。
    fn detach(&self, session: &Arc<Session<T>>) -> bool {
        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
            slot.take();
            true
        } else {
            false
        }
    }

    fn sink_for(self: &Arc<Self>, session: &Arc<Session<T>>) -> EventSink {
        let inner = Arc::downgrade(self);
        let session = Arc::downgrade(session);
        Arc::new(move |event| {
            let (Some(inner), Some(session)) = (inner.upgrade(), session.upgrade()) else {
                return;
            };
            inner.on_protocol_event(&session, event);
        })
    }

    fn on_protocol_event(self: &Arc<Self>, session: &Arc<Session<T>>, event: ProtocolEvent) {
        if session.is_tearing_down() {
            debug!(
                target: "deliverer::manager",
                protocol = %event.source(),
                "dropping event raised during teardown"
            );
            return;
        }
        match event {
            ProtocolEvent::Connected(id) => {
                {
                    let mut live = session.live.lock();
                    if !live.contains(&id) {
                        live.push(id);
                    }
                }
                self.publish(session, ManagerEvent::Connected(id), false);
            }
            ProtocolEvent::Disconnected(id) => {
                session.residues.lock().remove(&id);
                session.live.lock().retain(|peer| *peer != id);
                self.publish(session, ManagerEvent::Disconnected(id), false);
            }
            ProtocolEvent::DataReceived(id, chunk) => self.on_data(session, id, chunk),
        }
    }

    fn on_data(self: &Arc<Self>, session: &Arc<Session<T>>, source: ProtocolId, chunk: Bytes) {
        let mut residues = session.residues.lock();
        let residue = residues.entry(source).or_default();
        let max = session.rule.max_frame_size();
        let extracted = session
            .rule
            .extract_frames(residue, &chunk)
            .and_then(|frames| {
                if residue.len() > max {
                    return Err(DelivererError::FrameTooLarge {
                        len: residue.len(),
                        max,
                    });
                }
                Ok(frames)
            });

        let frames = match extracted {
            Ok(frames) => frames,
            Err(err) => {
                residues.remove(&source);
                drop(residues);
                self.abort_link(session, source, err);
                return;
            }
        };
        if frames.is_empty() {
            return;
        }
        debug!(
            target: "deliverer::manager",
            protocol = %source,
            rule = session.rule.name(),
            frames = frames.len(),
            residue = residue.len(),
            "frames extracted"
        );

        let mut events = Vec::with_capacity(frames.len());
        for frame in frames {
            match session.delivery_box.deserialize(frame) {
                Ok(payload) => events.push(ManagerEvent::ReceiveData(source, payload)),
                Err(err) => warn!(
                    target: "deliverer::manager",
                    protocol = %source,
                    code = err.code(),
                    error = %err,
                    "dropping frame that failed to decode"
                ),
            }
        }

        // 队列模式下在残留锁内提交，保证并发数据块的事件按切分顺序入队。
        if self.dispatcher.is_some() {
            for event in events {
                self.publish(session, event, false);
            }
            drop(residues);
        } else {
            drop(residues);
            for event in events {
                self.publish(session, event, false);
            }
        }
    }

    /// 入站帧超限：解除绑定，关闭传输并补发 `Disconnected`。
    ///
    /// 扇出型传输随之关闭全部对端，退订后它们的断开事件不会再上报，
    /// 因此对仍在 `live` 中的其余身份逐一补发。
    fn abort_link(
        self: &Arc<Self>,
        session: &Arc<Session<T>>,
        source: ProtocolId,
        err: DelivererError,
    ) {
        warn!(
            target: "deliverer::manager",
            protocol = %source,
            code = err.code(),
            error = %err,
            "inbound data violates frame limit; closing protocol"
        );
        self.detach(session);
        if session.tearing_down.swap(true, Ordering::AcqRel) {
            return;
        }
        session.protocol.unsubscribe();
        session.protocol.close();
        session.residues.lock().clear();
        let others: Vec<ProtocolId> = std::mem::take(&mut *session.live.lock())
            .into_iter()
            .filter(|peer| *peer != source)
            .collect();
        self.publish(session, ManagerEvent::Disconnected(source), true);
        for peer in others {
            self.publish(session, ManagerEvent::Disconnected(peer), true);
        }
    }

    fn publish(self: &Arc<Self>, session: &Arc<Session<T>>, event: ManagerEvent<T>, forced: bool) {
        match &self.dispatcher {
            Some(queue) => {
                let inner = Arc::downgrade(self);
                let session = Arc::clone(session);
                queue.submit(Box::new(move || {
                    if let Some(inner) = inner.upgrade() {
                        inner.deliver(&session, &event, forced);
                    }
                }));
            }
            None => self.deliver(session, &event, forced),
        }
    }

    /// 派发边界：在闸门读锁内检查拆除标志，再调用使用方回调。
    fn deliver(&self, session: &Session<T>, event: &ManagerEvent<T>, forced: bool) {
        let _gate = session.gate.read_recursive();
        if !forced && session.is_tearing_down() {
            debug!(
                target: "deliverer::manager",
                protocol = %event.source(),
                event = event.kind(),
                "discarding in-flight event after close"
            );
            return;
        }
        let _mark = DispatchMark::enter(session.serial);
        self.handlers.deliver(event);
    }
}

impl<T> Inner<T> {
    fn tear_down(&self, session: &Session<T>, reason: &'static str) {
        session.tearing_down.store(true, Ordering::Release);
        session.protocol.unsubscribe();
        if !DispatchMark::is_active(session.serial) {
            drop(session.gate.write());
        }
        session.protocol.close();
        session.residues.lock().clear();
        info!(
            target: "deliverer::manager",
            protocol = %session.protocol.id(),
            reason,
            "manager closed"
        );
    }
}

/// 通信门面。
///
/// `T` 为使用方面对的载荷类型，缺省为原始字节 [`Bytes`]。
pub struct Manager<T = Bytes> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Manager<T> {
    /// 绑定一组策略并启动 Protocol。
    ///
    /// `delivery_box` 为 `None` 时使用构建 Manager 时提供的缺省 DeliveryBox。
    /// Protocol 启动失败时立即解除绑定并返回其错误，Manager 回到未启动状态。
    pub fn start(
        &self,
        protocol: Arc<dyn Protocol>,
        rule: Box<dyn PacketRule>,
        delivery_box: Option<Arc<dyn DeliveryBox<T>>>,
    ) -> Result<()> {
        let session = {
            let mut slot = self.inner.session.lock();
            if slot.is_some() {
                return Err(DelivererError::AlreadyStarted);
            }
            let session = Arc::new(Session {
                serial: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
                protocol,
                rule,
                delivery_box: delivery_box.unwrap_or_else(|| Arc::clone(&self.inner.default_box)),
                residues: Mutex::new(HashMap::new()),
                live: Mutex::new(Vec::new()),
                tearing_down: AtomicBool::new(false),
                gate: RwLock::new(()),
            });
            session.protocol.subscribe(self.inner.sink_for(&session));
            *slot = Some(Arc::clone(&session));
            session
        };

        if let Err(err) = session.protocol.start() {
            warn!(
                target: "deliverer::manager",
                protocol = %session.protocol.id(),
                code = err.code(),
                error = %err,
                "protocol failed to start"
            );
            if self.inner.detach(&session) {
                session.tearing_down.store(true, Ordering::Release);
                session.protocol.unsubscribe();
                session.protocol.close();
            }
            return Err(err);
        }

        info!(
            target: "deliverer::manager",
            protocol = %session.protocol.id(),
            rule = session.rule.name(),
            dispatch = if self.inner.dispatcher.is_some() { "queue" } else { "direct" },
            "manager started"
        );
        Ok(())
    }

    /// 关闭并释放当前绑定；幂等。
    ///
    /// 返回后旧 Protocol 的任何事件都不会再到达使用方回调。
    pub fn close(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        self.inner.tear_down(&session, "close");
    }

    /// 序列化后交给 Protocol 发送。
    pub fn send(&self, value: &T) -> Result<()> {
        let session = self.inner.current()?;
        let payload = session.delivery_box.serialize(value)?;
        session.protocol.send(&payload)
    }

    /// 定向发送给某个对端身份。
    pub fn send_to(&self, value: &T, target: ProtocolId) -> Result<()> {
        let session = self.inner.current()?;
        if !session.protocol.accepts_target(target) {
            return Err(DelivererError::UnknownTarget {
                target: target.get(),
            });
        }
        let payload = session.delivery_box.serialize(value)?;
        session.protocol.send_to(&payload, target)
    }

    /// 序列化后再按绑定的 PacketRule 加上帧格式发送。
    pub fn send_packet(&self, value: &T) -> Result<()> {
        let session = self.inner.current()?;
        let payload = session.delivery_box.serialize(value)?;
        let packet = session.rule.make_send_packet(&payload)?;
        session.protocol.send(&packet)
    }

    /// [`Manager::send_packet`] 的定向版本。
    pub fn send_packet_to(&self, value: &T, target: ProtocolId) -> Result<()> {
        let session = self.inner.current()?;
        if !session.protocol.accepts_target(target) {
            return Err(DelivererError::UnknownTarget {
                target: target.get(),
            });
        }
        let payload = session.delivery_box.serialize(value)?;
        let packet = session.rule.make_send_packet(&payload)?;
        session.protocol.send_to(&packet, target)
    }

    pub fn is_started(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// 当前绑定的 Protocol。
    pub fn current_protocol(&self) -> Option<Arc<dyn Protocol>> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.protocol))
    }

    /// 事件是否切换到派发上下文执行。
    pub fn is_event_on_dispatch_context(&self) -> bool {
        self.inner.dispatcher.is_some()
    }

    pub fn on_connected(&self, handler: impl Fn(ProtocolId) + Send + Sync + 'static) -> HandlerId {
        self.inner.handlers.add_connected(Arc::new(handler))
    }

    pub fn on_disconnected(
        &self,
        handler: impl Fn(ProtocolId) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.handlers.add_disconnected(Arc::new(handler))
    }

    pub fn on_receive_data(
        &self,
        handler: impl Fn(ProtocolId, &T) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.handlers.add_receive_data(Arc::new(handler))
    }

    /// 注销回调，返回是否找到。
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }
}

impl<T> Drop for Manager<T> {
    fn drop(&mut self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        self.inner.tear_down(&session, "drop");
    }
}

impl<T> fmt::Debug for Manager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocol = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.protocol.id());
        f.debug_struct("Manager")
            .field("protocol", &protocol)
            .field("dispatch_queue", &self.inner.dispatcher.is_some())
            .field("handlers", &self.inner.handlers)
            .finish()
    }
}

/// Manager 构建器。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 缺省配置与工厂默认一致：事件切换到派发上下文；
///   - 派发模式开启且未提供队列时，构建一个以 `dispatch_thread_name` 命名的 [`ThreadDispatcher`]；
///   - 派发模式关闭时忽略提供的队列，回调直接在 I/O 上下文执行。
/// - **前置条件**：`build` 仅适用于字节载荷；类型化载荷使用 `build_with_box` 提供缺省 DeliveryBox。
#[derive(Default)]
pub struct ManagerBuilder {
    config: ManagerConfig,
    dispatch_queue: Option<Arc<dyn DispatchQueue>>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_on_dispatch_context(mut self, enabled: bool) -> Self {
        self.config.event_on_dispatch_context = enabled;
        self
    }

    /// 使用外部提供的派发队列，例如由应用主循环泵出的 [`crate::ManualDispatcher`]。
    pub fn dispatch_queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.dispatch_queue = Some(queue);
        self
    }

    /// 构建字节载荷的 Manager，缺省 DeliveryBox 为 [`PassThrough`]。
    pub fn build(self) -> Result<Manager<Bytes>> {
        self.build_with_box(Arc::new(PassThrough))
    }

    /// 构建类型化载荷的 Manager。
    pub fn build_with_box<T: Send + 'static>(
        self,
        default_box: Arc<dyn DeliveryBox<T>>,
    ) -> Result<Manager<T>> {
        let dispatcher = if self.config.event_on_dispatch_context {
            match self.dispatch_queue {
                Some(queue) => Some(queue),
                None => {
                    let thread = ThreadDispatcher::spawn(self.config.dispatch_thread_name.clone())
                        .map_err(|err| DelivererError::Config {
                            detail: format!(
                                "failed to spawn dispatch thread `{}`: {err}",
                                self.config.dispatch_thread_name
                            )
                            .into(),
                        })?;
                    Some(Arc::new(thread) as Arc<dyn DispatchQueue>)
                }
            }
        } else {
            if self.dispatch_queue.is_some() {
                debug!(
                    target: "deliverer::manager",
                    "direct delivery configured; supplied dispatch queue is ignored"
                );
            }
            None
        };

        Ok(Manager {
            inner: Arc::new(Inner {
                handlers: HandlerRegistry::new(),
                dispatcher,
                default_box,
                session: Mutex::new(None),
            }),
        })
    }
}

impl fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("config", &self.config)
            .field("dispatch_queue", &self.dispatch_queue.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackProtocol;
    use crate::packet_rule::SizeBodyRule;
    use parking_lot::Mutex;

    fn direct() -> Manager {
        ManagerBuilder::new()
            .event_on_dispatch_context(false)
            .build()
            .expect("build")
    }

    #[test]
    fn dispatch_mark_tracks_nesting() {
        assert!(!DispatchMark::is_active(7));
        {
            let _outer = DispatchMark::enter(7);
            {
                let _inner = DispatchMark::enter(7);
                assert!(DispatchMark::is_active(7));
            }
            assert!(DispatchMark::is_active(7));
        }
        assert!(!DispatchMark::is_active(7));
    }

    #[test]
    fn close_from_inside_handler_does_not_deadlock() {
        let manager = Arc::new(direct());
        let protocol = LoopbackProtocol::silent();
        let closer = Arc::downgrade(&manager);
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        manager.on_receive_data(move |_, _| {
            *counter.lock() += 1;
            if let Some(manager) = closer.upgrade() {
                manager.close();
            }
        });
        manager
            .start(protocol.clone(), Box::new(SizeBodyRule::new()), None)
            .expect("start");

        protocol.inject(&[0, 0, 0, 1, b'a', 0, 0, 0, 1, b'b']);
        assert!(!manager.is_started());
        // 第二帧属于同一数据块，但会话已在第一帧的回调中拆除。
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn drop_closes_the_protocol() {
        let protocol = LoopbackProtocol::silent();
        {
            let manager = direct();
            manager
                .start(protocol.clone(), Box::new(SizeBodyRule::new()), None)
                .expect("start");
        }
        assert_eq!(protocol.state(), crate::protocol::ProtocolState::Closed);
    }

    #[test]
    fn residue_is_tracked_per_source() {
        let manager = direct();
        let protocol = LoopbackProtocol::silent();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on_receive_data(move |id, payload: &Bytes| sink.lock().push((id, payload.clone())));
        manager
            .start(protocol.clone(), Box::new(SizeBodyRule::new()), None)
            .expect("start");

        let peer_a = ProtocolId::next();
        let peer_b = ProtocolId::next();
        protocol.inject_from(peer_a, &[0, 0, 0, 2, b'a']);
        protocol.inject_from(peer_b, &[0, 0, 0, 1, b'z']);
        protocol.inject_from(peer_a, &[b'b']);

        assert_eq!(
            *seen.lock(),
            vec![
                (peer_b, Bytes::from_static(b"z")),
                (peer_a, Bytes::from_static(b"ab")),
            ]
        );
    }
}

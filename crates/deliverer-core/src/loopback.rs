//! 进程内回环 Protocol。
//!
//! 不依赖任何网络介质，用于单元测试、示例以及在没有对端时验证 Manager 的编排：
//! - `echo`：发出的字节原样作为入站数据回到自身；
//! - `silent`：只记录发出的字节，入站数据由测试通过 [`LoopbackProtocol::inject`] 注入；
//! - `pair`：两个端点互为对端，一端发送即另一端收到。
//!
//! `inject` / `inject_from` / `drop_link` 可以在任意线程调用，模拟传输在后台上下文产生事件。

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{DelivererError, Result};
use crate::protocol::{
    EventSink, Protocol, ProtocolEvent, ProtocolId, ProtocolState, SinkSlot, StateCell,
};

enum Route {
    Echo,
    Silent,
    Peer(Weak<LoopbackProtocol>),
}

pub struct LoopbackProtocol {
    id: ProtocolId,
    state: StateCell,
    sink: SinkSlot,
    route: Mutex<Route>,
    sent: Mutex<Vec<Bytes>>,
}

impl LoopbackProtocol {
    fn with_route(route: Route) -> Self {
        Self {
            id: ProtocolId::next(),
            state: StateCell::new(),
            sink: SinkSlot::new(),
            route: Mutex::new(route),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn echo() -> Arc<Self> {
        Arc::new(Self::with_route(Route::Echo))
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::with_route(Route::Silent))
    }

    /// 一对互为对端的端点。
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let left = Arc::new(Self::with_route(Route::Silent));
        let right = Arc::new(Self::with_route(Route::Peer(Arc::downgrade(&left))));
        *left.route.lock() = Route::Peer(Arc::downgrade(&right));
        (left, right)
    }

    /// 以自身身份注入一段入站字节。
    pub fn inject(&self, chunk: &[u8]) {
        self.deliver(Bytes::copy_from_slice(chunk));
    }

    /// 以指定来源身份注入入站字节，模拟多对端的监听型传输。
    pub fn inject_from(&self, source: ProtocolId, chunk: &[u8]) {
        self.sink.emit(ProtocolEvent::DataReceived(
            source,
            Bytes::copy_from_slice(chunk),
        ));
    }

    fn deliver(&self, chunk: Bytes) {
        self.sink.emit(ProtocolEvent::DataReceived(self.id, chunk));
    }

    /// 模拟链路丢失：进入 `Closed` 并上报 `Disconnected`。
    pub fn drop_link(&self) {
        if self.state.close() == ProtocolState::Connected {
            self.sink.emit(ProtocolEvent::Disconnected(self.id));
        }
    }

    /// 已发送的全部字节块。
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    fn peer(&self) -> Option<Arc<LoopbackProtocol>> {
        match &*self.route.lock() {
            Route::Peer(peer) => peer.upgrade(),
            Route::Echo | Route::Silent => None,
        }
    }
}

impl Protocol for LoopbackProtocol {
    fn id(&self) -> ProtocolId {
        self.id
    }

    fn state(&self) -> ProtocolState {
        self.state.get()
    }

    fn subscribe(&self, sink: EventSink) {
        self.sink.install(sink);
    }

    fn unsubscribe(&self) {
        self.sink.clear();
    }

    fn start(&self) -> Result<()> {
        match self.state.get() {
            ProtocolState::Unstarted => {
                self.state.set(ProtocolState::Connected);
                self.sink.emit(ProtocolEvent::Connected(self.id));
                Ok(())
            }
            other => Err(DelivererError::start_failed(format!(
                "loopback {} cannot start from state {other:?}",
                self.id
            ))),
        }
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        if !self.state.get().is_usable() {
            return Err(DelivererError::NotConnected {
                protocol: self.id.get(),
            });
        }
        let chunk = Bytes::copy_from_slice(buf);
        self.sent.lock().push(chunk.clone());

        let echo = matches!(&*self.route.lock(), Route::Echo);
        if echo {
            self.deliver(chunk);
        } else if let Some(peer) = self.peer() {
            peer.deliver(chunk);
        }
        Ok(())
    }

    fn close(&self) {
        if self.state.close() == ProtocolState::Connected {
            self.sink.emit(ProtocolEvent::Disconnected(self.id));
            if let Some(peer) = self.peer() {
                peer.drop_link();
            }
        }
    }
}

impl fmt::Debug for LoopbackProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackProtocol")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish()
    }
}

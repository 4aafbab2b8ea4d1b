//! 面向使用方的事件与回调注册表。
//!
//! # 教案级注释
//!
//! ## 契约（What）
//! - 三类事件各自维护有序回调列表，按注册顺序调用；
//! - 每个回调的 panic 被单独捕获并记录 `warn!`，不影响同一事件的后续回调，也不影响后续事件；
//! - 调用前先对回调列表做快照，回调内部可以安全地注册或注销回调。
//!
//! ## 注意事项（Trade-offs）
//! - 快照意味着在回调执行期间注销的回调仍会收到本次事件，下一次事件起生效。

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::protocol::ProtocolId;

/// 使用方观察到的事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ManagerEvent<T> {
    Connected(ProtocolId),
    Disconnected(ProtocolId),
    ReceiveData(ProtocolId, T),
}

impl<T> ManagerEvent<T> {
    /// 事件来源身份。
    pub fn source(&self) -> ProtocolId {
        match self {
            ManagerEvent::Connected(id)
            | ManagerEvent::Disconnected(id)
            | ManagerEvent::ReceiveData(id, _) => *id,
        }
    }

    /// 事件类别名，用于日志。
    pub fn kind(&self) -> &'static str {
        match self {
            ManagerEvent::Connected(_) => "connected",
            ManagerEvent::Disconnected(_) => "disconnected",
            ManagerEvent::ReceiveData(..) => "receive_data",
        }
    }
}

/// 回调注册句柄，用于注销。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HandlerId(u64);

type LinkHandler = Arc<dyn Fn(ProtocolId) + Send + Sync>;
type DataHandler<T> = Arc<dyn Fn(ProtocolId, &T) + Send + Sync>;

pub(crate) struct HandlerRegistry<T> {
    next_id: AtomicU64,
    connected: RwLock<Vec<(HandlerId, LinkHandler)>>,
    disconnected: RwLock<Vec<(HandlerId, LinkHandler)>>,
    receive_data: RwLock<Vec<(HandlerId, DataHandler<T>)>>,
}

impl<T> HandlerRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connected: RwLock::new(Vec::new()),
            disconnected: RwLock::new(Vec::new()),
            receive_data: RwLock::new(Vec::new()),
        }
    }

    fn allocate(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_connected(&self, handler: LinkHandler) -> HandlerId {
        let id = self.allocate();
        self.connected.write().push((id, handler));
        id
    }

    pub(crate) fn add_disconnected(&self, handler: LinkHandler) -> HandlerId {
        let id = self.allocate();
        self.disconnected.write().push((id, handler));
        id
    }

    pub(crate) fn add_receive_data(&self, handler: DataHandler<T>) -> HandlerId {
        let id = self.allocate();
        self.receive_data.write().push((id, handler));
        id
    }

    /// 注销回调，返回是否找到。
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        fn drop_from<H>(list: &RwLock<Vec<(HandlerId, H)>>, id: HandlerId) -> bool {
            let mut guard = list.write();
            let before = guard.len();
            guard.retain(|(existing, _)| *existing != id);
            guard.len() != before
        }
        drop_from(&self.connected, id)
            || drop_from(&self.disconnected, id)
            || drop_from(&self.receive_data, id)
    }

    pub(crate) fn len(&self) -> usize {
        self.connected.read().len() + self.disconnected.read().len() + self.receive_data.read().len()
    }

    /// 把事件交给对应类别的全部回调。
    pub(crate) fn deliver(&self, event: &ManagerEvent<T>) {
        match event {
            ManagerEvent::Connected(id) => {
                let snapshot = snapshot(&self.connected);
                for handler in snapshot {
                    isolate(event.kind(), *id, || handler(*id));
                }
            }
            ManagerEvent::Disconnected(id) => {
                let snapshot = snapshot(&self.disconnected);
                for handler in snapshot {
                    isolate(event.kind(), *id, || handler(*id));
                }
            }
            ManagerEvent::ReceiveData(id, payload) => {
                let snapshot = snapshot(&self.receive_data);
                for handler in snapshot {
                    isolate(event.kind(), *id, || handler(*id, payload));
                }
            }
        }
    }
}

fn snapshot<H: Clone>(list: &RwLock<Vec<(HandlerId, H)>>) -> Vec<H> {
    list.read().iter().map(|(_, handler)| handler.clone()).collect()
}

fn isolate(kind: &'static str, protocol: ProtocolId, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        warn!(
            target: "deliverer::manager",
            event = kind,
            protocol = %protocol,
            "event handler panicked; continuing with remaining handlers"
        );
    }
}

impl<T> fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("connected", &self.connected.read().len())
            .field("disconnected", &self.disconnected.read().len())
            .field("receive_data", &self.receive_data.read().len())
            .finish()
    }
}

//! 测试观察者：记录 Manager 派发给使用方的全部事件。
//!
//! # 教案式说明
//! - **意图 (Why)**：集成测试需要断言“收到了哪些事件、按什么顺序、在哪个线程”，
//!   每个测试各写一遍回调收集代码既冗长又容易遗漏线程信息；
//! - **契约 (What)**：`attach` 在 Manager 上注册三类回调，每条记录携带事件本身与执行回调的线程；
//!   `wait_for` 在派发线程异步执行时阻塞等待记录数达到预期；
//! - **实现 (How)**：以 `parking_lot::Mutex` + `Condvar` 保存记录，回调只做克隆与追加。

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::events::{HandlerId, ManagerEvent};
use crate::manager::Manager;
use crate::protocol::ProtocolId;

/// 一条事件记录。
#[derive(Clone, Debug)]
pub struct RecordedEvent<T> {
    pub event: ManagerEvent<T>,
    pub thread: ThreadId,
}

struct Shared<T> {
    records: Mutex<Vec<RecordedEvent<T>>>,
    changed: Condvar,
}

impl<T> Shared<T> {
    fn push(&self, event: ManagerEvent<T>) {
        self.records.lock().push(RecordedEvent {
            event,
            thread: thread::current().id(),
        });
        self.changed.notify_all();
    }
}

/// Manager 事件记录器。
pub struct EventRecorder<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventRecorder<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(Vec::new()),
                changed: Condvar::new(),
            }),
        }
    }

    /// 在 Manager 上注册记录回调，返回三个回调句柄。
    pub fn attach(&self, manager: &Manager<T>) -> [HandlerId; 3] {
        let connected = Arc::clone(&self.shared);
        let disconnected = Arc::clone(&self.shared);
        let received = Arc::clone(&self.shared);
        [
            manager.on_connected(move |id| connected.push(ManagerEvent::Connected(id))),
            manager.on_disconnected(move |id| disconnected.push(ManagerEvent::Disconnected(id))),
            manager.on_receive_data(move |id, payload: &T| {
                received.push(ManagerEvent::ReceiveData(id, payload.clone()))
            }),
        ]
    }

    pub fn records(&self) -> Vec<RecordedEvent<T>> {
        self.shared.records.lock().clone()
    }

    pub fn events(&self) -> Vec<ManagerEvent<T>> {
        self.shared
            .records
            .lock()
            .iter()
            .map(|record| record.event.clone())
            .collect()
    }

    /// 全部 `ReceiveData` 载荷，按派发顺序。
    pub fn received(&self) -> Vec<(ProtocolId, T)> {
        self.shared
            .records
            .lock()
            .iter()
            .filter_map(|record| match &record.event {
                ManagerEvent::ReceiveData(id, payload) => Some((*id, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn connected(&self) -> Vec<ProtocolId> {
        self.filter_ids(|event| matches!(event, ManagerEvent::Connected(_)))
    }

    pub fn disconnected(&self) -> Vec<ProtocolId> {
        self.filter_ids(|event| matches!(event, ManagerEvent::Disconnected(_)))
    }

    /// 执行过回调的线程集合（去重，保持首次出现顺序）。
    pub fn threads(&self) -> Vec<ThreadId> {
        let mut threads = Vec::new();
        for record in self.shared.records.lock().iter() {
            if !threads.contains(&record.thread) {
                threads.push(record.thread);
            }
        }
        threads
    }

    pub fn len(&self) -> usize {
        self.shared.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.shared.records.lock().clear();
    }

    /// 等待记录数至少达到 `count`，超时返回 `false`。
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut records = self.shared.records.lock();
        while records.len() < count {
            if self
                .shared
                .changed
                .wait_until(&mut records, deadline)
                .timed_out()
            {
                return records.len() >= count;
            }
        }
        true
    }

    fn filter_ids(&self, keep: impl Fn(&ManagerEvent<T>) -> bool) -> Vec<ProtocolId> {
        self.shared
            .records
            .lock()
            .iter()
            .filter(|record| keep(&record.event))
            .map(|record| record.event.source())
            .collect()
    }
}

impl<T> std::fmt::Debug for EventRecorder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("records", &self.shared.records.lock().len())
            .finish()
    }
}

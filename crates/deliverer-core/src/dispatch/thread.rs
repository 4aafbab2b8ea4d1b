use std::io;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use super::{DispatchQueue, DispatchTask};

/// 以一个具名后台线程作为派发上下文。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 任务通过 Tokio 无界通道送入线程，线程以 `blocking_recv` 逐个执行，天然保持 FIFO；
///   - 单个任务 panic 不会终止线程，后续任务继续执行；
///   - `shutdown` 关闭通道、执行完已入队任务后回收线程；`Drop` 自动调用 `shutdown`。
/// - **执行 (How)**：线程不依赖 Tokio 运行时，仅使用 `tokio::sync::mpsc` 的阻塞接收端。
/// - **风险 (Trade-offs)**：在派发线程内部调用 `shutdown` 不会 join 自身，只关闭通道。
pub struct ThreadDispatcher {
    sender: Mutex<Option<UnboundedSender<DispatchTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    name: String,
}

impl ThreadDispatcher {
    /// 启动派发线程。
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, mut receiver) = unbounded_channel::<DispatchTask>();
        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(task) = receiver.blocking_recv() {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                    warn!(target: "deliverer::dispatch", "dispatch task panicked; continuing");
                }
            }
            debug!(target: "deliverer::dispatch", "dispatch thread drained");
        })?;
        let thread_id = worker.thread().id();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            thread_id,
            name,
        })
    }

    /// 派发线程的标识。
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 停止接收新任务，执行完存量任务后回收线程。
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(target: "deliverer::dispatch", name = %self.name, "dispatch thread terminated abnormally");
            }
        }
    }
}

impl DispatchQueue for ThreadDispatcher {
    fn submit(&self, task: DispatchTask) {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) if sender.send(task).is_ok() => {}
            _ => {
                warn!(target: "deliverer::dispatch", name = %self.name, "dispatch thread stopped; task dropped");
            }
        }
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDispatcher")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn executes_on_named_worker_in_order() {
        let dispatcher = ThreadDispatcher::spawn("dispatch-test").expect("spawn");
        let (tx, rx) = mpsc::channel();
        for index in 0..16 {
            let tx = tx.clone();
            dispatcher.submit(Box::new(move || {
                let current = thread::current();
                tx.send((index, current.id(), current.name().map(str::to_owned)))
                    .expect("report");
            }));
        }

        for expected in 0..16 {
            let (index, id, name) = rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
            assert_eq!(index, expected);
            assert_eq!(id, dispatcher.thread_id());
            assert_eq!(name.as_deref(), Some("dispatch-test"));
        }
    }

    #[test]
    fn panicking_task_does_not_stop_worker() {
        let dispatcher = ThreadDispatcher::spawn("dispatch-panic").expect("spawn");
        let hits = Arc::new(Mutex::new(0));
        fn explode() {
            panic!("handler exploded");
        }
        dispatcher.submit(Box::new(explode));
        let counter = Arc::clone(&hits);
        dispatcher.submit(Box::new(move || *counter.lock() += 1));
        dispatcher.shutdown();
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn submissions_after_shutdown_are_dropped() {
        let dispatcher = ThreadDispatcher::spawn("dispatch-closed").expect("spawn");
        dispatcher.shutdown();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        dispatcher.submit(Box::new(move || *counter.lock() += 1));
        assert_eq!(*hits.lock(), 0);
    }
}

use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::{DispatchQueue, DispatchTask};

/// 由使用方主循环驱动的派发队列。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `submit` 只入队；任务在调用 [`ManualDispatcher::run_pending`] 的线程上按 FIFO 执行；
///   - `run_pending` 只执行调用时已在队列中的任务，执行期间新提交的任务留到下一轮，
///     避免任务不断自我提交导致主循环饿死；
///   - 记录最近一次泵出任务的线程，便于断言事件确实落在指定上下文。
/// - **风险 (Trade-offs)**：使用方不泵队列时任务会一直堆积，队列本身无上限。
#[derive(Default)]
pub struct ManualDispatcher {
    queue: Mutex<VecDeque<DispatchTask>>,
    pump_thread: Mutex<Option<ThreadId>>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行当前已排队的全部任务，返回执行数量。
    pub fn run_pending(&self) -> usize {
        *self.pump_thread.lock() = Some(thread::current().id());
        let batch: VecDeque<DispatchTask> = std::mem::take(&mut *self.queue.lock());
        let executed = batch.len();
        for task in batch {
            task();
        }
        executed
    }

    /// 队列中等待执行的任务数。
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// 最近一次调用 `run_pending` 的线程。
    pub fn pump_thread(&self) -> Option<ThreadId> {
        *self.pump_thread.lock()
    }
}

impl DispatchQueue for ManualDispatcher {
    fn submit(&self, task: DispatchTask) {
        self.queue.lock().push_back(task);
    }
}

impl std::fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn runs_tasks_in_submission_order_on_pumping_thread() {
        let dispatcher = ManualDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for index in 0..4 {
            let seen = Arc::clone(&seen);
            dispatcher.submit(Box::new(move || {
                seen.lock().push((index, thread::current().id()))
            }));
        }
        assert_eq!(dispatcher.pending(), 4);
        assert_eq!(dispatcher.run_pending(), 4);

        let me = thread::current().id();
        let seen = seen.lock();
        assert_eq!(
            seen.iter().map(|(index, _)| *index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(seen.iter().all(|(_, id)| *id == me));
        assert_eq!(dispatcher.pump_thread(), Some(me));
    }

    #[test]
    fn tasks_submitted_while_pumping_wait_for_next_round() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher.submit(Box::new(move || inner.submit(Box::new(|| {}))));

        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(dispatcher.run_pending(), 1);
        assert_eq!(dispatcher.pending(), 0);
    }
}

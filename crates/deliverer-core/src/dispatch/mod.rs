//! 事件派发上下文。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 网络 I/O 运行在传输自己的后台上下文中，而使用方通常希望事件回调在一个指定的单线程上下文
//!   （例如应用主循环）中执行；
//! - Manager 只依赖 [`DispatchQueue::submit`] 这一项能力，不绑定任何具体调度器。
//!
//! ## 契约（What）
//! - `submit` 非阻塞，提交方不等待任务执行完成；
//! - 同一队列上提交的任务按提交顺序、在同一逻辑上下文中逐个执行；
//! - 队列已关闭时提交的任务被丢弃（并记录日志），不会回落到提交方线程执行。
//!
//! ## 提供的实现（How）
//! - [`ManualDispatcher`]：由使用方在自己的主循环中调用 `run_pending` 泵出任务；
//! - [`ThreadDispatcher`]：持有一个具名后台线程，通过 Tokio 无界通道接收任务。

mod manual;
mod thread;

pub use manual::ManualDispatcher;
pub use thread::ThreadDispatcher;

/// 提交到派发上下文的任务。
pub type DispatchTask = Box<dyn FnOnce() + Send + 'static>;

/// 单线程派发上下文能力。
pub trait DispatchQueue: Send + Sync + 'static {
    /// 提交任务，立即返回。
    fn submit(&self, task: DispatchTask);
}

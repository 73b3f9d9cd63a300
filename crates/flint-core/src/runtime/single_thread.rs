use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::executor::{EventExecutor, Task};
use super::task_queue::{ScheduledEntry, panic_message, run_task_isolated};

struct QueueState {
    immediate: VecDeque<Task>,
    scheduled: BinaryHeap<ScheduledEntry>,
}

struct Shared {
    name: String,
    state: Mutex<QueueState>,
    condvar: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
    thread_id: OnceLock<ThreadId>,
}

/// `SingleThreadEventLoop` 是生产形态的协作式事件循环：专属线程 + 条件变量驱动。
///
/// # 设计背景（Why）
/// - 每条通道的私有状态只允许其所属循环的线程变更，循环线程即“单一写者”；
/// - 定时任务（连接超时等）与立即任务共用一个唤醒机制，避免额外的计时线程。
///
/// # 逻辑解析（How）
/// - 内部为一把互斥锁保护的 `(FIFO 立即队列, 截止时间堆)`，提交路径在持锁
///   状态下入队并唤醒循环线程；
/// - 循环线程每轮先收割到期定时任务、再收割全部立即任务，然后在锁外逐个
///   执行，任务内 panic 被捕获并记录，循环存活；
/// - 无任务时按“下一个截止时间”限时休眠，无定时任务则无限休眠。
///
/// # 契约说明（What）
/// - `execute` 提交的任务保持 FIFO；`schedule` 按 `(截止时间, 序号)` 触发；
/// - `shutdown` 批量取消未到期定时任务；已入队的立即任务仍会执行完毕，
///   其后线程退出；停机后提交的任务被静默丢弃并记录；
/// - 本循环由专属线程泵送，`run_pending_tasks`/`run_scheduled_tasks`
///   恒定返回 0 / `None`。
///
/// # 风险提示（Trade-offs）
/// - 任务在锁外执行，意味着任务内再次提交任务不会死锁，但也意味着
///   “收割批次”与“执行批次”之间可能插入新的提交——FIFO 语义仍然成立，
///   因为新任务总是追加在下一批次之后。
pub struct SingleThreadEventLoop {
    shared: Arc<Shared>,
}

impl SingleThreadEventLoop {
    /// 创建并立即启动循环线程。
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(QueueState {
                immediate: VecDeque::new(),
                scheduled: BinaryHeap::new(),
            }),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            thread_id: OnceLock::new(),
        });
        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("flint-loop-{name}"))
            .spawn(move || Self::run(worker))
            .expect("事件循环线程创建失败");
        Arc::new(Self { shared })
    }

    fn run(shared: Arc<Shared>) {
        let _ = shared.thread_id.set(thread::current().id());
        loop {
            let mut ready: Vec<Task> = Vec::new();
            {
                let mut state = shared.state.lock();
                let now = Instant::now();
                while state
                    .scheduled
                    .peek()
                    .is_some_and(|entry| entry.deadline() <= now)
                {
                    if let Some(entry) = state.scheduled.pop() {
                        ready.push(entry.into_task());
                    }
                }
                ready.extend(state.immediate.drain(..));
                if ready.is_empty() {
                    if shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    match state.scheduled.peek().map(ScheduledEntry::deadline) {
                        Some(deadline) => {
                            let _ = shared.condvar.wait_until(&mut state, deadline);
                        }
                        None => shared.condvar.wait(&mut state),
                    }
                    continue;
                }
            }
            for task in ready {
                if let Some(payload) = run_task_isolated(task) {
                    tracing::warn!(
                        event_loop = %shared.name,
                        panic = %panic_message(payload.as_ref()),
                        "事件循环任务 panic，已隔离"
                    );
                }
            }
        }
        tracing::debug!(event_loop = %shared.name, "事件循环线程退出");
    }

    /// 循环名称，用于日志归属。
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl EventExecutor for SingleThreadEventLoop {
    fn execute_dyn(&self, task: Task) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::debug!(event_loop = %self.shared.name, "停机后提交的立即任务被丢弃");
            return;
        }
        let mut state = self.shared.state.lock();
        state.immediate.push_back(task);
        drop(state);
        self.shared.condvar.notify_one();
    }

    fn schedule_dyn(&self, delay: Duration, task: Task) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::debug!(event_loop = %self.shared.name, "停机后提交的定时任务被丢弃");
            return;
        }
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let entry = ScheduledEntry::new(Instant::now() + delay, seq, task);
        let mut state = self.shared.state.lock();
        state.scheduled.push(entry);
        drop(state);
        self.shared.condvar.notify_one();
    }

    fn in_event_loop(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = {
            let mut state = self.shared.state.lock();
            let cancelled = state.scheduled.len();
            state.scheduled.clear();
            cancelled
        };
        if cancelled > 0 {
            tracing::debug!(
                event_loop = %self.shared.name,
                cancelled,
                "停机批量取消未到期定时任务"
            );
        }
        self.shared.condvar.notify_all();
    }

    fn run_pending_tasks(&self) -> usize {
        // 专属线程负责泵送；外部调用方无法代为驱动。
        0
    }

    fn run_scheduled_tasks(&self) -> Option<Duration> {
        None
    }
}

impl Drop for SingleThreadEventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

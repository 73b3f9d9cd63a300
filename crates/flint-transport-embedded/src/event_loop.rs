use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use flint_core::error::{CoreError, ErrorRef, codes};
use flint_core::runtime::{EventExecutor, Task, TaskQueue, panic_message, run_task_isolated};

/// `ManualEventLoop` 是确定性测试专用的事件循环：不拥有线程，泵送权完全
/// 交给调用方。
///
/// # 设计背景（Why）
/// - 协议栈测试需要逐拍推进的调度：何时执行多少任务、虚拟时间前进多少，
///   必须由测试代码决定；后台线程会把时序变成不可复现的竞态。
///
/// # 逻辑解析（How）
/// - 复用核心的 [`TaskQueue`]（FIFO 立即队列 + 截止时间堆）；
/// - 时间是虚拟的：`advance_time` 显式推进，定时任务按虚拟时刻到期；
/// - 泵送中任务 panic 被隔离捕获，**首个**异常暂存，由调用方在下一次
///   检查时取走——绝不在泵送中途抛出。
///
/// # 契约说明（What）
/// - `in_event_loop` 恒为 `true`：驱动泵送的调用线程就是循环线程；
/// - `run_pending_tasks` 一直执行到立即队列排空（任务追加的任务同批执行）；
/// - `run_scheduled_tasks` 执行全部到期定时任务并返回距下一个截止时间的
///   剩余时长；
/// - `shutdown` 批量取消未到期定时任务。
pub struct ManualEventLoop {
    queue: TaskQueue,
    now: Mutex<Instant>,
    shutdown: AtomicBool,
    captured: Mutex<Option<ErrorRef>>,
}

impl ManualEventLoop {
    /// 创建手动泵送的循环。
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: TaskQueue::new(),
            now: Mutex::new(Instant::now()),
            shutdown: AtomicBool::new(false),
            captured: Mutex::new(None),
        })
    }

    /// 当前虚拟时刻。
    pub fn now(&self) -> Instant {
        *self.now.lock()
    }

    /// 推进虚拟时间；随后调用 `run_scheduled_tasks` 触发到期任务。
    pub fn advance_time(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    /// 暂存一个异常；仅首个被保留。
    pub fn capture(&self, err: ErrorRef) {
        let mut captured = self.captured.lock();
        if captured.is_none() {
            *captured = Some(err);
        }
    }

    /// 取走暂存的首个异常。
    pub fn take_captured(&self) -> Option<ErrorRef> {
        self.captured.lock().take()
    }

    fn run_isolated(&self, task: Task) {
        if let Some(payload) = run_task_isolated(task) {
            let message = panic_message(payload.as_ref());
            tracing::debug!(panic = %message, "泵送任务 panic，已捕获暂存");
            self.capture(
                CoreError::new(codes::TASK_PANIC, format!("泵送任务 panic: {message}"))
                    .into_shared(),
            );
        }
    }
}

impl EventExecutor for ManualEventLoop {
    fn execute_dyn(&self, task: Task) {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::debug!("停机后提交的立即任务被丢弃");
            return;
        }
        self.queue.push(task);
    }

    fn schedule_dyn(&self, delay: Duration, task: Task) {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::debug!("停机后提交的定时任务被丢弃");
            return;
        }
        let deadline = self.now() + delay;
        self.queue.push_scheduled(deadline, task);
    }

    fn in_event_loop(&self) -> bool {
        // 泵送线程即循环线程：注册到本循环的通道可以就地执行操作。
        true
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.queue.cancel_scheduled();
        if cancelled > 0 {
            tracing::debug!(cancelled, "停机批量取消未到期定时任务");
        }
    }

    fn run_pending_tasks(&self) -> usize {
        let mut executed = 0;
        while let Some(task) = self.queue.pop() {
            executed += 1;
            self.run_isolated(task);
        }
        executed
    }

    fn run_scheduled_tasks(&self) -> Option<Duration> {
        let now = self.now();
        while let Some(task) = self.queue.pop_due(now) {
            self.run_isolated(task);
        }
        self.queue.next_deadline(now)
    }
}

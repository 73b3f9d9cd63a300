use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::executor::Task;

/// 截止时间有序队列中的一项定时任务。
///
/// # 契约说明（What）
/// - 排序键为 `(deadline, seq)`：截止时间早者先出队；同一截止时间按提交
///   顺序（序号）出队，保证调度的确定性。
pub struct ScheduledEntry {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl ScheduledEntry {
    pub(crate) fn new(deadline: Instant, seq: u64, task: Task) -> Self {
        Self {
            deadline,
            seq,
            task,
        }
    }

    /// 任务的触发时间点。
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 取出任务闭包。
    pub fn into_task(self) -> Task {
        self.task
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap 是最大堆：反转比较方向，使“截止时间最早”成为堆顶。
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// `TaskQueue` 是立即队列与定时队列的共享实现。
///
/// # 设计背景（Why）
/// - 生产循环与手动泵送循环对“FIFO 立即队列 + 截止时间有序队列”的需求完全
///   一致，差异仅在于由谁驱动泵送；把队列本身抽出来，两种循环各自包一层。
///
/// # 契约说明（What）
/// - `push` 保持 FIFO；`push_scheduled` 以 `(deadline, seq)` 排序；
/// - `pop_due` 只弹出 `now` 之前到期的任务；
/// - `cancel_scheduled` 批量丢弃全部未到期任务并返回数量（停机路径）。
pub struct TaskQueue {
    immediate: Mutex<VecDeque<Task>>,
    scheduled: Mutex<BinaryHeap<ScheduledEntry>>,
    seq: AtomicU64,
}

impl TaskQueue {
    /// 创建空队列。
    pub fn new() -> Self {
        Self {
            immediate: Mutex::new(VecDeque::new()),
            scheduled: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// 入队立即任务。
    pub fn push(&self, task: Task) {
        self.immediate.lock().push_back(task);
    }

    /// 入队定时任务。
    pub fn push_scheduled(&self, deadline: Instant, task: Task) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.scheduled.lock().push(ScheduledEntry {
            deadline,
            seq,
            task,
        });
    }

    /// 弹出一个立即任务。
    pub fn pop(&self) -> Option<Task> {
        self.immediate.lock().pop_front()
    }

    /// 弹出一个已到期的定时任务。
    pub fn pop_due(&self, now: Instant) -> Option<Task> {
        let mut scheduled = self.scheduled.lock();
        if scheduled
            .peek()
            .is_some_and(|entry| entry.deadline <= now)
        {
            return scheduled.pop().map(ScheduledEntry::into_task);
        }
        None
    }

    /// 距下一个定时任务截止时间的剩余时长；队列为空时返回 `None`。
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.scheduled
            .lock()
            .peek()
            .map(|entry| entry.deadline.saturating_duration_since(now))
    }

    /// 是否存在待执行的立即任务。
    pub fn has_pending(&self) -> bool {
        !self.immediate.lock().is_empty()
    }

    /// 批量取消全部定时任务，返回被丢弃的数量。
    pub fn cancel_scheduled(&self) -> usize {
        let mut scheduled = self.scheduled.lock();
        let cancelled = scheduled.len();
        scheduled.clear();
        cancelled
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// 在 panic 隔离下执行一个任务；返回被捕获的 panic 载荷（若有）。
///
/// # 契约说明（What）
/// - 任务抛出的 panic 不会穿透调用方；由调用方决定记录或暂存载荷。
pub fn run_task_isolated(task: Task) -> Option<Box<dyn Any + Send>> {
    catch_unwind(AssertUnwindSafe(task)).err()
}

/// 从 panic 载荷中提取可读消息。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "未知 panic 载荷".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 定时任务应按 `(deadline, seq)` 的顺序出队。
    #[test]
    fn scheduled_entries_pop_in_deadline_then_seq_order() {
        let queue = TaskQueue::new();
        let base = Instant::now();
        let order = std::sync::Arc::new(Mutex::new(Vec::new()));
        for (label, offset_ms) in [("late", 20u64), ("early-a", 5), ("early-b", 5)] {
            let order = std::sync::Arc::clone(&order);
            queue.push_scheduled(
                base + Duration::from_millis(offset_ms),
                Box::new(move || order.lock().push(label)),
            );
        }
        let far_future = base + Duration::from_secs(1);
        while let Some(task) = queue.pop_due(far_future) {
            task();
        }
        assert_eq!(*order.lock(), vec!["early-a", "early-b", "late"]);
    }

    /// `pop_due` 不应弹出未到期的任务。
    #[test]
    fn pop_due_respects_deadline() {
        let queue = TaskQueue::new();
        let base = Instant::now();
        queue.push_scheduled(base + Duration::from_secs(60), Box::new(|| {}));
        assert!(queue.pop_due(base).is_none());
        assert!(queue.next_deadline(base).is_some());
        assert_eq!(queue.cancel_scheduled(), 1);
        assert!(queue.next_deadline(base).is_none());
    }
}

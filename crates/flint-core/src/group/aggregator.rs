use std::sync::Arc;

use thiserror::Error;

use crate::channel::ChannelId;
use crate::completion::{Completion, Outcome};
use crate::error::{CoreError, ErrorRef, codes};

/// 复合失败：广播收敛时仍处于失败态的全部 `(成员, 根因)` 对。
///
/// # 契约说明（What）
/// - 仅在聚合收敛时构造，枚举“彼时已观察到失败”的成员；
/// - 调用方据此区分部分失败与全量失败。
#[derive(Debug, Error)]
#[error("通道组广播存在 {} 个失败成员", .failures.len())]
pub struct GroupFailure {
    failures: Vec<(ChannelId, ErrorRef)>,
}

impl GroupFailure {
    /// 全部失败对的只读视图。
    pub fn failures(&self) -> &[(ChannelId, ErrorRef)] {
        &self.failures
    }
}

struct Counters {
    success: usize,
    failures: Vec<(ChannelId, ErrorRef)>,
    resolved: bool,
}

struct AggregatorInner {
    expected: usize,
    counters: spin::Mutex<Counters>,
    aggregate: Completion,
}

/// `GroupCompletion` 是一次广播操作的聚合完成句柄。
///
/// # 设计背景（Why）
/// - 广播对 N 个成员各自产生一个完成句柄，调用方需要一个“全体收敛后
///   恰好收敛一次”的聚合视图；
/// - 语义刻意保持“等全体完成、报告彼时已失败者”，**不是** fail-fast：
///   先失败的成员不会提前终止聚合，这是可观察行为的一部分，不得更改。
///
/// # 逻辑解析（How）
/// - 成功/失败计数与失败对列表驻留在一把短临界区自旋锁内——记录路径只做
///   计数与追加，代价恒小；
/// - 当 `成功 + 失败 == 成员数` 时由最后一个记录者收敛聚合句柄：无失败则
///   成功，否则以 `group.partial_failure` 失败并携带 [`GroupFailure`]；
/// - 成员取消计入失败（根因为 `task.cancelled`）。
///
/// # 不变量（Invariants）
/// - `成功 + 失败` 永不超过成员数（每个成员句柄恰好回调一次）；
/// - 聚合句柄恰好收敛一次。
#[derive(Clone)]
pub struct GroupCompletion {
    inner: Arc<AggregatorInner>,
}

impl GroupCompletion {
    /// 创建期望 `expected` 个成员结果的聚合器。
    ///
    /// # 契约说明（What）
    /// - `expected == 0` 时立即成功收敛（空广播合法且常见于空匹配）。
    pub fn new(expected: usize) -> Self {
        let inner = Arc::new(AggregatorInner {
            expected,
            counters: spin::Mutex::new(Counters {
                success: 0,
                failures: Vec::new(),
                resolved: false,
            }),
            aggregate: Completion::new(),
        });
        if expected == 0 {
            inner.aggregate.try_succeed(());
            let mut counters = inner.counters.lock();
            counters.resolved = true;
            drop(counters);
        }
        Self { inner }
    }

    /// 记录一个成员结果；由成员完成句柄的监听器调用，恰好一次。
    pub fn record(&self, id: ChannelId, outcome: &Outcome<()>) {
        let resolution = {
            let mut counters = self.inner.counters.lock();
            if counters.resolved {
                return;
            }
            match outcome {
                Outcome::Succeeded(()) => counters.success += 1,
                Outcome::Failed(err) => {
                    counters.failures.push((id, ErrorRef::clone(err)));
                }
                Outcome::Cancelled => {
                    counters.failures.push((
                        id,
                        CoreError::new(codes::CANCELLED, "成员操作被取消").into_shared(),
                    ));
                }
            }
            debug_assert!(
                counters.success + counters.failures.len() <= self.inner.expected,
                "聚合计数不得超过成员数"
            );
            if counters.success + counters.failures.len() == self.inner.expected {
                counters.resolved = true;
                // 克隆而非搬移：收敛后计数查询仍需看到完整失败列表。
                Some(counters.failures.clone())
            } else {
                None
            }
        };
        // 收敛动作在自旋锁外执行：聚合句柄的监听器可能做任意工作。
        if let Some(failures) = resolution {
            if failures.is_empty() {
                self.inner.aggregate.try_succeed(());
            } else {
                let failed = failures.len();
                let err = CoreError::new(
                    codes::GROUP_PARTIAL_FAILURE,
                    format!("{failed}/{} 个成员操作失败", self.inner.expected),
                )
                .with_cause(GroupFailure { failures });
                self.inner.aggregate.try_fail(err);
            }
        }
    }

    /// 聚合完成句柄。
    pub fn completion(&self) -> Completion {
        self.inner.aggregate.clone()
    }

    /// 聚合是否已收敛。
    pub fn is_done(&self) -> bool {
        self.inner.aggregate.is_done()
    }

    /// 成员数。
    pub fn expected(&self) -> usize {
        self.inner.expected
    }

    /// 当前成功计数。
    pub fn success_count(&self) -> usize {
        self.inner.counters.lock().success
    }

    /// 当前失败计数。
    pub fn failure_count(&self) -> usize {
        self.inner.counters.lock().failures.len()
    }

    /// 部分成功：存在成功成员且并非全体成功。
    pub fn is_partial_success(&self) -> bool {
        let counters = self.inner.counters.lock();
        counters.success > 0 && counters.success < self.inner.expected
    }

    /// 部分失败：存在失败成员且并非全体失败。
    pub fn is_partial_failure(&self) -> bool {
        let counters = self.inner.counters.lock();
        let failed = counters.failures.len();
        failed > 0 && failed < self.inner.expected
    }

    /// 聚合失败根因（未失败或未收敛时为 `None`）。
    pub fn cause(&self) -> Option<ErrorRef> {
        self.inner.aggregate.cause()
    }
}

impl std::fmt::Debug for GroupCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCompletion")
            .field("expected", &self.inner.expected)
            .field("done", &self.is_done())
            .finish()
    }
}

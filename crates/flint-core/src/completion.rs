use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::ErrorRef;

/// 完成句柄对外可见的四种状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    /// 尚未写入结果。
    Pending,
    /// 操作成功。
    Succeeded,
    /// 操作失败，可通过 [`Completion::cause`] 取得根因。
    Failed,
    /// 操作被取消。
    Cancelled,
}

/// 一次异步操作的最终结果。
///
/// # 契约说明（What）
/// - 监听器以 `&Outcome<T>` 观察结果；失败根因以 [`ErrorRef`] 共享，
///   允许聚合器等多个观察者持有同一份错误。
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    /// 操作成功并携带结果值。
    Succeeded(T),
    /// 操作失败。
    Failed(ErrorRef),
    /// 操作被取消。
    Cancelled,
}

impl<T> Outcome<T> {
    /// 是否成功。
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    /// 取得失败根因（取消不携带根因）。
    pub fn cause(&self) -> Option<&ErrorRef> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

enum Slot<T> {
    Pending {
        listeners: Vec<Listener<T>>,
        wakers: Vec<Waker>,
    },
    Resolved(Outcome<T>),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

/// `Completion` 是单次赋值的完成句柄：一次异步操作的结果载体。
///
/// # 设计背景（Why）
/// - 通道的生命周期与 I/O 操作全部立即返回，真实工作延后到所属事件循环；
///   调用方需要一个可克隆、可跨线程观察的句柄来等待结局。
/// - “先写者胜”是连接建立与关闭竞争的基础语义：建立方与关闭方都可能
///   尝试写入连接完成句柄，后到者必须退化为无操作。
///
/// # 逻辑解析（How）
/// - 内部为 `Mutex<Slot>`：Pending 态积累监听器与 waker，写入结果时一次性
///   取出并在写入线程上触发；Condvar 支撑阻塞等待路径。
/// - `try_succeed` / `try_fail` / `try_cancel` 返回是否由本次调用完成写入。
///
/// # 契约说明（What）
/// - **单次赋值**：状态一经写入不可变更；重复写入返回 `false` 且无副作用；
/// - **监听器**：已完成时在调用线程立即执行，否则在完成线程执行，恰好一次；
/// - **void 变体**：[`Completion::void`] 丢弃结果与监听器，用于发后不理热路径，
///   不可用于等待（`wait` 立即返回，Future 立即以 `Cancelled` 收敛）。
///
/// # 风险提示（Trade-offs）
/// - 监听器在完成线程同步执行，实现方不应在监听器内做重量级工作；
///   需要回到某个事件循环时应自行 `execute` 转投。
pub struct Completion<T = ()> {
    inner: Option<Arc<Inner<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// 创建待完成的句柄。
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                slot: Mutex::new(Slot::Pending {
                    listeners: Vec::new(),
                    wakers: Vec::new(),
                }),
                condvar: Condvar::new(),
            })),
        }
    }

    /// 创建 void 句柄：结果与监听器全部丢弃的发后不理形态。
    pub fn void() -> Self {
        Self { inner: None }
    }

    /// 创建已成功的句柄。
    pub fn succeeded(value: T) -> Self {
        let completion = Self::new();
        let _ = completion.try_succeed(value);
        completion
    }

    /// 创建已失败的句柄。
    pub fn failed(err: impl Into<ErrorRef>) -> Self {
        let completion = Self::new();
        let _ = completion.try_fail(err);
        completion
    }

    /// 是否为 void 变体。
    pub fn is_void(&self) -> bool {
        self.inner.is_none()
    }

    /// 尝试以成功收敛；返回本次调用是否真正写入了结果。
    pub fn try_succeed(&self, value: T) -> bool {
        self.resolve(Outcome::Succeeded(value))
    }

    /// 尝试以失败收敛；后到者退化为无操作。
    pub fn try_fail(&self, err: impl Into<ErrorRef>) -> bool {
        self.resolve(Outcome::Failed(err.into()))
    }

    /// 尝试以取消收敛。
    pub fn try_cancel(&self) -> bool {
        self.resolve(Outcome::Cancelled)
    }

    fn resolve(&self, outcome: Outcome<T>) -> bool {
        let Some(inner) = &self.inner else {
            // void：写入被接受但不可观察。
            return true;
        };
        let (listeners, wakers) = {
            let mut slot = inner.slot.lock();
            match &mut *slot {
                Slot::Resolved(_) => return false,
                Slot::Pending { listeners, wakers } => {
                    let listeners = std::mem::take(listeners);
                    let wakers = std::mem::take(wakers);
                    *slot = Slot::Resolved(outcome.clone());
                    (listeners, wakers)
                }
            }
        };
        // 监听器在锁外执行：允许监听器内部继续访问本句柄而不会自锁。
        inner.condvar.notify_all();
        for listener in listeners {
            listener(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// 当前状态快照。
    pub fn state(&self) -> CompletionState {
        let Some(inner) = &self.inner else {
            return CompletionState::Pending;
        };
        match &*inner.slot.lock() {
            Slot::Pending { .. } => CompletionState::Pending,
            Slot::Resolved(Outcome::Succeeded(_)) => CompletionState::Succeeded,
            Slot::Resolved(Outcome::Failed(_)) => CompletionState::Failed,
            Slot::Resolved(Outcome::Cancelled) => CompletionState::Cancelled,
        }
    }

    /// 是否已收敛（成功/失败/取消任一）。
    pub fn is_done(&self) -> bool {
        self.state() != CompletionState::Pending
    }

    /// 是否成功收敛。
    pub fn is_succeeded(&self) -> bool {
        self.state() == CompletionState::Succeeded
    }

    /// 是否失败收敛。
    pub fn is_failed(&self) -> bool {
        self.state() == CompletionState::Failed
    }

    /// 取得失败根因；未失败时返回 `None`。
    pub fn cause(&self) -> Option<ErrorRef> {
        let inner = self.inner.as_ref()?;
        match &*inner.slot.lock() {
            Slot::Resolved(Outcome::Failed(err)) => Some(Arc::clone(err)),
            _ => None,
        }
    }

    /// 注册完成监听器。
    ///
    /// # 契约说明（What）
    /// - 已完成时在当前线程立即执行；否则存储并在完成线程执行，恰好一次；
    /// - void 句柄直接丢弃监听器。
    pub fn on_complete(&self, listener: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let Some(inner) = &self.inner else {
            return;
        };
        let resolved = {
            let mut slot = inner.slot.lock();
            match &mut *slot {
                Slot::Pending { listeners, .. } => {
                    listeners.push(Box::new(listener));
                    return;
                }
                Slot::Resolved(outcome) => outcome.clone(),
            }
        };
        // 已完成：在锁外立即回调，保持与完成路径一致的重入安全性。
        listener(&resolved);
    }

    /// 阻塞等待收敛（同步语义需要调用方显式等待）。
    pub fn wait(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut slot = inner.slot.lock();
        while matches!(&*slot, Slot::Pending { .. }) {
            inner.condvar.wait(&mut slot);
        }
    }

    /// 带超时的阻塞等待；返回是否已收敛。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(inner) = &self.inner else {
            return true;
        };
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = inner.slot.lock();
        while matches!(&*slot, Slot::Pending { .. }) {
            if inner.condvar.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(&*slot, Slot::Pending { .. });
            }
        }
        true
    }
}

impl<T: Clone + Send + 'static> Future for Completion<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(inner) = &self.inner else {
            // void 句柄不可等待：立即以取消收敛，避免悬挂调用方。
            return Poll::Ready(Outcome::Cancelled);
        };
        let mut slot = inner.slot.lock();
        match &mut *slot {
            Slot::Resolved(outcome) => Poll::Ready(outcome.clone()),
            Slot::Pending { wakers, .. } => {
                let incoming = cx.waker();
                if !wakers.iter().any(|w| w.will_wake(incoming)) {
                    wakers.push(incoming.clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.inner {
            None => "Void",
            Some(inner) => match &*inner.slot.lock() {
                Slot::Pending { .. } => "Pending",
                Slot::Resolved(Outcome::Succeeded(_)) => "Succeeded",
                Slot::Resolved(Outcome::Failed(_)) => "Failed",
                Slot::Resolved(Outcome::Cancelled) => "Cancelled",
            },
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}


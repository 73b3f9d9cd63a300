use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

/// 负载主体：跨通道边界流动的语言级消息对象。
///
/// # 契约说明（What）
/// - `Bytes` 变体承载二进制内容（底层共享、克隆零拷贝）；
/// - `Text` 变体承载文本内容，便于协议栈测试直接断言。
#[derive(Clone, PartialEq, Eq)]
pub enum PayloadBody {
    /// 二进制内容。
    Bytes(Bytes),
    /// 文本内容。
    Text(Arc<str>),
}

impl PayloadBody {
    fn len(&self) -> usize {
        match self {
            PayloadBody::Bytes(bytes) => bytes.len(),
            PayloadBody::Text(text) => text.len(),
        }
    }
}

impl fmt::Debug for PayloadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadBody::Bytes(bytes) => write!(f, "Bytes({} 字节)", bytes.len()),
            PayloadBody::Text(text) => write!(f, "Text({text:?})"),
        }
    }
}

/// 引用账本：一份负载全部视图共享的显式计数与泄漏探针。
struct RefLedger {
    count: AtomicUsize,
    probe: Option<LeakProbe>,
}

struct LeakProbe {
    id: u64,
    created_at: &'static str,
    last_touch: Mutex<&'static str>,
}

impl Drop for RefLedger {
    fn drop(&mut self) {
        // 最后一个视图被丢弃时账本随之销毁；若计数尚未归零，说明持有方
        // 丢失了句柄却从未 release——这正是采样泄漏探测的观察点。
        let remaining = self.count.load(Ordering::Relaxed);
        if remaining == 0 {
            return;
        }
        if let Some(probe) = &self.probe {
            tracing::warn!(
                payload_id = probe.id,
                remaining,
                created_at = probe.created_at,
                last_touch = *probe.last_touch.lock(),
                "疑似负载泄漏：对象已不可达但引用计数未归零"
            );
        }
    }
}

fn sampling_interval() -> u64 {
    static INTERVAL: OnceLock<u64> = OnceLock::new();
    *INTERVAL.get_or_init(|| {
        std::env::var("FLINT_LEAK_SAMPLING")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(128)
    })
}

fn next_probe(created_at: &'static str) -> Option<LeakProbe> {
    static ALLOCATED: AtomicU64 = AtomicU64::new(0);
    let interval = sampling_interval();
    if interval == 0 {
        return None;
    }
    let serial = ALLOCATED.fetch_add(1, Ordering::Relaxed);
    if serial % interval != 0 {
        return None;
    }
    Some(LeakProbe {
        id: serial,
        created_at,
        last_touch: Mutex::new(created_at),
    })
}

/// `Payload` 是显式引用计数的通道消息。
///
/// # 设计背景（Why）
/// - 消息跨越通道边界后可能被对端缓冲、被分组广播复制给多个接收方；
///   显式的 retain/release 纪律让“谁在何时释放”可被测试精确断言。
/// - 在所有权语言中，计数本身不再承担内存回收职责（由共享所有权完成），
///   而是作为“仍被借用”的显式账本：归零表示逻辑释放完成，丢失句柄而
///   未归零则由采样探针给出泄漏诊断。
///
/// # 逻辑解析（How）
/// - `retain` 递增计数；`release` 递减，归零即逻辑释放（级联由各视图的
///   `Drop` 完成）；两者都用 CAS 循环拒绝“死而复生”与重复释放；
/// - `retained_duplicate` 生成共享同一账本的新视图，广播按接收方各持一份；
/// - 探针按采样率附着（默认 1/128，可经 `FLINT_LEAK_SAMPLING` 覆盖，0 关闭），
///   记录创建点与最近触碰点，仅产生诊断日志，绝不改变可观察行为。
///
/// # 契约说明（What）
/// - **前置条件**：`retain`/`release` 只能在计数大于零时调用，违反属调用方
///   程序错误，在调用点立即 panic；
/// - **后置条件**：每条到达终点队列的消息，在其生命周期结束时
///   release 次数恰好等于 retain 次数（含创建时的初始计数）。
pub struct Payload {
    body: PayloadBody,
    ledger: Arc<RefLedger>,
}

impl Payload {
    fn with_body(body: PayloadBody, created_at: &'static str) -> Self {
        Self {
            body,
            ledger: Arc::new(RefLedger {
                count: AtomicUsize::new(1),
                probe: next_probe(created_at),
            }),
        }
    }

    /// 以文本内容创建负载，初始计数为 1。
    pub fn text(text: impl AsRef<str>) -> Self {
        Self::with_body(PayloadBody::Text(Arc::from(text.as_ref())), "Payload::text")
    }

    /// 以二进制内容创建负载，初始计数为 1。
    pub fn bytes(bytes: Bytes) -> Self {
        Self::with_body(PayloadBody::Bytes(bytes), "Payload::bytes")
    }

    /// 拷贝切片创建二进制负载。
    pub fn copy_from_slice(slice: &[u8]) -> Self {
        Self::with_body(
            PayloadBody::Bytes(Bytes::copy_from_slice(slice)),
            "Payload::copy_from_slice",
        )
    }

    /// 负载主体。
    pub fn body(&self) -> &PayloadBody {
        &self.body
    }

    /// 文本视图；二进制负载返回 `None`。
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            PayloadBody::Text(text) => Some(text),
            PayloadBody::Bytes(_) => None,
        }
    }

    /// 内容长度（字节）。
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// 内容是否为空。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前引用计数。
    pub fn ref_count(&self) -> usize {
        self.ledger.count.load(Ordering::Acquire)
    }

    /// 递增引用计数。
    ///
    /// # Panics
    /// 计数已归零（逻辑上已释放）时 panic：复活已死对象属调用方错误。
    pub fn retain(&self) {
        let mut current = self.ledger.count.load(Ordering::Relaxed);
        loop {
            assert!(current != 0, "retain 不允许复活已释放的负载");
            match self.ledger.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// 递减引用计数；返回本次调用是否使计数归零（逻辑释放完成）。
    ///
    /// # Panics
    /// 计数已为零时 panic：重复释放属调用方错误。
    pub fn release(&self) -> bool {
        let mut current = self.ledger.count.load(Ordering::Relaxed);
        loop {
            assert!(current != 0, "release 不允许重复释放负载");
            match self.ledger.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current == 1,
                Err(observed) => current = observed,
            }
        }
    }

    /// 生成共享同一账本的新视图并 retain 一次；分组广播按接收方各持一份。
    pub fn retained_duplicate(&self) -> Payload {
        self.retain();
        Payload {
            body: self.body.clone(),
            ledger: Arc::clone(&self.ledger),
        }
    }

    /// 记录最近一次触碰位置，供泄漏诊断定位；未被采样时为空操作。
    pub fn touch(&self, hint: &'static str) {
        if let Some(probe) = &self.ledger.probe {
            *probe.last_touch.lock() = hint;
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("body", &self.body)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

//! # 通道抽象
//!
//! ## 契约声明
//! * **封闭的形态集合**：本仓只存在三种通道形态（本地连接端、本地监听端、
//!   确定性测试通道），以固定 trait [`Channel`] + 共享核 [`ChannelCore`]
//!   建模，而非开放式继承；
//! * **单一写者**：通道私有状态只由其所属事件循环变更；少量跨循环可见
//!   字段（生命周期状态、读写进行中标志）以原子语义发布；
//! * **异步失败面**：操作失败只经由该操作的完成句柄可见；同步前置条件
//!   违规在调用点立即失败。

pub mod outbound;

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::address::ChannelAddress;
use crate::completion::Completion;
use crate::configuration::ChannelOptions;
use crate::error::{CoreError, Result, codes};
use crate::payload::Payload;
use crate::pipeline::Pipeline;
use crate::runtime::EventExecutor;

use outbound::OutboundBuffer;

/// 进程内唯一的通道标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 分配新的通道标识。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始序号。
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// 通道生命周期状态。
///
/// # 契约说明（What）
/// - 迁移单调向前：`Open → Bound → Connected → Closed`（监听形态跳过
///   `Connected`）；`Closed` 吸收且幂等——关闭后不存在任何可观察迁移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelState {
    /// 已构造，尚未绑定/连接。
    Open = 0,
    /// 已绑定本地地址。
    Bound = 1,
    /// 已建立对端关联（连接形态的激活态）。
    Connected = 2,
    /// 终态。
    Closed = 3,
}

impl ChannelState {
    fn from_raw(raw: u8) -> ChannelState {
        match raw {
            0 => ChannelState::Open,
            1 => ChannelState::Bound,
            2 => ChannelState::Connected,
            _ => ChannelState::Closed,
        }
    }
}

/// `ChannelCore` 是三种通道形态共享的状态核。
///
/// # 逻辑解析（How）
/// - 生命周期状态驻留在 `AtomicU8`：对端循环需要读取（写入前判活），
///   而变更只发生在所属循环，CAS 保证迁移单调且关闭恰好一次；
/// - 执行器经 `OnceLock` 一次性绑定（注册即绑定，不可重绑）；
/// - 地址、出站缓冲等其余字段由所属循环独占变更，互斥锁仅为满足
///   `Sync` 形态要求，竞争在正确使用下不存在。
pub struct ChannelCore {
    id: ChannelId,
    state: AtomicU8,
    registered: AtomicBool,
    executor: OnceLock<Arc<dyn EventExecutor>>,
    local_address: Mutex<Option<ChannelAddress>>,
    remote_address: Mutex<Option<ChannelAddress>>,
    outbound: Mutex<OutboundBuffer>,
    pipeline: Arc<dyn Pipeline>,
    options: ChannelOptions,
    close_completion: Completion,
}

impl ChannelCore {
    /// 创建状态核。
    pub fn new(pipeline: Arc<dyn Pipeline>, options: ChannelOptions) -> Self {
        let outbound = OutboundBuffer::new(&options);
        Self {
            id: ChannelId::next(),
            state: AtomicU8::new(ChannelState::Open as u8),
            registered: AtomicBool::new(false),
            executor: OnceLock::new(),
            local_address: Mutex::new(None),
            remote_address: Mutex::new(None),
            outbound: Mutex::new(outbound),
            pipeline,
            options,
            close_completion: Completion::new(),
        }
    }

    /// 通道标识。
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> ChannelState {
        ChannelState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// 是否尚未进入终态。
    pub fn is_open(&self) -> bool {
        self.state() != ChannelState::Closed
    }

    /// 尝试单调向前迁移；违反单调性或已关闭时返回 `false`。
    pub fn transition(&self, to: ChannelState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= to as u8 || current == ChannelState::Closed as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// 进入终态；由“首个关闭者”返回关闭前的状态，其余调用者得到 `None`。
    pub fn close_transition(&self) -> Option<ChannelState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == ChannelState::Closed as u8 {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                ChannelState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Some(ChannelState::from_raw(previous)),
                Err(observed) => current = observed,
            }
        }
    }

    /// 一次性绑定执行器；重复注册违反同步前置条件。
    pub fn bind_executor(&self, executor: Arc<dyn EventExecutor>) -> Result<()> {
        self.executor.set(executor).map_err(|_| {
            CoreError::new(codes::APP_INVALID_ARGUMENT, "通道不允许重复注册事件循环")
        })
    }

    /// 所属执行器；注册前为 `None`。
    pub fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.executor.get().cloned()
    }

    /// 标记已注册。
    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    /// 标记已注销。
    pub fn mark_deregistered(&self) {
        self.registered.store(false, Ordering::Release);
    }

    /// 是否处于已注册状态。
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// 本地地址快照。
    pub fn local_address(&self) -> Option<ChannelAddress> {
        self.local_address.lock().clone()
    }

    /// 写入本地地址。
    pub fn set_local_address(&self, address: Option<ChannelAddress>) {
        *self.local_address.lock() = address;
    }

    /// 远端地址快照。
    pub fn remote_address(&self) -> Option<ChannelAddress> {
        self.remote_address.lock().clone()
    }

    /// 写入远端地址。
    pub fn set_remote_address(&self, address: Option<ChannelAddress>) {
        *self.remote_address.lock() = address;
    }

    /// 独占访问出站缓冲（仅所属循环线程调用）。
    pub fn outbound(&self) -> MutexGuard<'_, OutboundBuffer> {
        self.outbound.lock()
    }

    /// 处理器链句柄。
    pub fn pipeline(&self) -> Arc<dyn Pipeline> {
        Arc::clone(&self.pipeline)
    }

    /// 通道选项。
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// 关闭完成句柄（终态 future，所有关闭调用共享同一句柄）。
    pub fn close_completion(&self) -> Completion {
        self.close_completion.clone()
    }
}

/// `Channel` 是双向端点的统一契约。
///
/// # 设计背景（Why）
/// - 生命周期操作与 I/O 操作全部立即返回完成句柄，真实工作延后到所属
///   事件循环执行；同步等待由调用方对句柄显式 `wait`；
/// - `disconnect` 对没有独立断连语义的传输（本仓全部形态）等价于
///   `close`，契约允许两种实现择一。
///
/// # 契约说明（What）
/// - `register` 之前除 `close` 外的操作一律以
///   `transport.not_yet_connected` 失败；
/// - `close` 幂等：全部调用共享同一关闭完成句柄；关闭后
///   `is_open`/`is_active` 永远为 `false`；
/// - `write` 仅入队；`flush` 驱动排空；`write_and_flush` 合并两步；
/// - `write_and_flush_void` 为发后不理热路径，不构造可观察完成句柄。
pub trait Channel: Send + Sync + 'static {
    /// 通道标识。
    fn id(&self) -> ChannelId;

    /// 是否为监听形态。
    fn is_server(&self) -> bool;

    /// 生命周期状态快照。
    fn state(&self) -> ChannelState;

    /// 是否尚未关闭。
    fn is_open(&self) -> bool;

    /// 是否处于激活态（连接形态为 `Connected`，监听形态为 `Bound`）。
    fn is_active(&self) -> bool;

    /// 是否已注册到事件循环。
    fn is_registered(&self) -> bool;

    /// 本地地址。
    fn local_address(&self) -> Option<ChannelAddress>;

    /// 远端地址。
    fn remote_address(&self) -> Option<ChannelAddress>;

    /// 衍生本通道的父通道（监听端衍生的子通道持有）。
    fn parent(&self) -> Option<Arc<dyn Channel>>;

    /// 所属执行器。
    fn executor(&self) -> Option<Arc<dyn EventExecutor>>;

    /// 处理器链句柄。
    fn pipeline(&self) -> Arc<dyn Pipeline>;

    /// 注册到事件循环；执行器与传输不兼容或重复注册时失败。
    fn register(&self, executor: Arc<dyn EventExecutor>) -> Completion;

    /// 绑定本地地址。
    fn bind(&self, address: ChannelAddress) -> Completion;

    /// 连接远端地址。
    fn connect(&self, address: ChannelAddress) -> Completion;

    /// 断开连接；本仓传输无独立断连语义，等价于 `close`。
    fn disconnect(&self) -> Completion;

    /// 关闭通道（幂等，终态）。
    fn close(&self) -> Completion;

    /// 从事件循环注销。
    fn deregister(&self) -> Completion;

    /// 开始向处理器链投递缓冲的入站消息（受读取突发上限约束）。
    fn begin_read(&self);

    /// 入队一条出站消息。
    fn write(&self, msg: Payload) -> Completion;

    /// 驱动出站缓冲排空。
    fn flush(&self);

    /// 入队并立即冲刷。
    fn write_and_flush(&self, msg: Payload) -> Completion {
        let completion = self.write(msg);
        self.flush();
        completion
    }

    /// 发后不理的写入冲刷热路径。
    fn write_and_flush_void(&self, msg: Payload);

    /// 关闭完成句柄。
    fn close_completion(&self) -> Completion;
}

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use flint_core::address::ChannelAddress;
use flint_core::channel::{Channel, ChannelCore, ChannelId, ChannelState};
use flint_core::completion::Completion;
use flint_core::configuration::ChannelOptions;
use flint_core::error::{CoreError, closed_channel, codes};
use flint_core::payload::Payload;
use flint_core::pipeline::Pipeline;
use flint_core::runtime::{EventExecutor, EventExecutorExt};

use crate::error;
use crate::listener::LocalServerChannel;
use crate::registry::{self, RegistryEntry};

thread_local! {
    /// 同线程上连续“写-读-写”往返的递归深度计数。
    static READER_STACK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// 超过该深度的背靠背对等往返改投事件循环，阻断无界递归。
const MAX_READER_STACK_DEPTH: u32 = 8;

/// `LocalChannel` 是进程内传输的连接端：与对端纯内存配对，
/// 模拟一条可靠、有序、全双工的流。
///
/// # 设计背景（Why）
/// - 进程内组网与端到端协议栈测试需要“像套接字一样”的通道语义，
///   但不应付出真实套接字与系统调用的代价；
/// - 对端互指的环引用以弱引用建模并在关闭时显式清空，任何一端的
///   生命周期都不会吊住另一端。
///
/// # 逻辑解析（How）
/// - 连接建立：`connect` 在本循环解析注册表，要求目标为监听通道，由其
///   衍生一个以本通道为对端的子通道；子通道在其循环完成注册时双向推进
///   状态，并把“对端激活”通知投递到对端自己的循环；
/// - 读路径：入站消息驻留单生产者/单消费者队列；排空受每批次条数上限
///   约束，深层往返经递归深度护栏改投循环；
/// - 写路径：`flush` 逐项排空出站缓冲——仅当对端仍处于连接态才入其
///   入站队列，随后触发对端排空：同循环且对端不在写进行中则就地排空，
///   否则投递到对端循环（FIFO 保证不与先前的排空任务乱序，也必然排在
///   对端在途写之后）；
/// - 关闭：恰好一次地翻转终态、注销地址、裁决挂起连接、失败滞留写项、
///   严格异步地通知对端、恰好一次地释放全部缓冲入站消息。
///
/// # 并发语义
/// - 私有状态仅由所属循环变更；对端循环只读取生命周期状态与
///   写进行中/读挂起两个原子标志。
pub struct LocalChannel {
    core: ChannelCore,
    self_ref: Weak<LocalChannel>,
    parent: Option<Arc<LocalServerChannel>>,
    peer: Mutex<Option<Weak<LocalChannel>>>,
    inbound: Mutex<VecDeque<Payload>>,
    connect_completion: Mutex<Option<Completion>>,
    write_in_progress: AtomicBool,
    read_pending: AtomicBool,
    inbound_released: AtomicBool,
}

impl LocalChannel {
    /// 创建连接端通道。
    pub fn new(pipeline: Arc<dyn Pipeline>, options: ChannelOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            core: ChannelCore::new(pipeline, options),
            self_ref: weak.clone(),
            parent: None,
            peer: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
            connect_completion: Mutex::new(None),
            write_in_progress: AtomicBool::new(false),
            read_pending: AtomicBool::new(false),
            inbound_released: AtomicBool::new(false),
        })
    }

    /// 监听端衍生的子通道：父与对端在构造期即就位。
    pub(crate) fn spawned(
        parent: Arc<LocalServerChannel>,
        peer: &Arc<LocalChannel>,
        pipeline: Arc<dyn Pipeline>,
        options: ChannelOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            core: ChannelCore::new(pipeline, options),
            self_ref: weak.clone(),
            parent: Some(parent),
            peer: Mutex::new(Some(Arc::downgrade(peer))),
            inbound: Mutex::new(VecDeque::new()),
            connect_completion: Mutex::new(None),
            write_in_progress: AtomicBool::new(false),
            read_pending: AtomicBool::new(false),
            inbound_released: AtomicBool::new(false),
        })
    }

    fn this(&self) -> Arc<LocalChannel> {
        self.self_ref.upgrade().expect("通道自引用在方法调用期间必然有效")
    }

    /// 对端快照；未配对或对端已消亡时为 `None`。
    pub fn peer(&self) -> Option<Arc<LocalChannel>> {
        self.peer.lock().as_ref().and_then(Weak::upgrade)
    }

    /// 入站队列当前积压条数（诊断用）。
    pub fn inbound_backlog(&self) -> usize {
        self.inbound.lock().len()
    }

    /// 注册完成后子通道的建立流程：双向推进状态并通知对端。
    fn establish_as_spawned(&self) {
        let Some(parent) = &self.parent else { return };
        let Some(peer) = self.peer() else {
            // 配对完成前对端已消亡：子通道没有存在意义，直接终结。
            self.close();
            return;
        };
        let parent_address = parent.local_address();
        self.core.set_local_address(parent_address.clone());
        self.core.set_remote_address(peer.local_address());
        self.core.transition(ChannelState::Connected);
        self.core.pipeline().fire_channel_active();
        if self.core.options().auto_read {
            self.begin_read();
        }

        peer.core.set_remote_address(parent_address);
        peer.core.transition(ChannelState::Connected);
        if let Some(peer_executor) = peer.core.executor() {
            // 激活通知必须经对端自己的循环投递——同循环亦然；
            // 只有连接完成句柄仍未收敛时才触发（可能已被并发关闭裁决）。
            let peer = Arc::clone(&peer);
            peer_executor.execute(move || {
                let pending = peer.connect_completion.lock().clone();
                if let Some(pending) = pending
                    && pending.try_succeed(())
                {
                    peer.core.pipeline().fire_channel_active();
                    if peer.core.options().auto_read {
                        peer.begin_read();
                    }
                }
            });
        }
    }

    fn connect_on_loop(&self, address: ChannelAddress, done: Completion) {
        if !self.core.is_open() {
            done.try_fail(closed_channel(error::CONNECT));
            return;
        }
        if self.core.state() == ChannelState::Connected {
            done.try_fail(CoreError::new(codes::ALREADY_CONNECTED, "通道已处于连接状态"));
            return;
        }
        {
            let mut slot = self.connect_completion.lock();
            if slot.as_ref().is_some_and(|pending| !pending.is_done()) {
                drop(slot);
                done.try_fail(CoreError::new(
                    codes::CONNECTION_PENDING,
                    "已有尚未完成的连接尝试",
                ));
                return;
            }
            *slot = Some(done.clone());
        }
        if self.core.local_address().is_none() {
            self.core.set_local_address(Some(ChannelAddress::ephemeral()));
        }
        let Some(listener) = registry::lookup_listener(&address) else {
            self.fail_pending_connect(CoreError::new(
                codes::CONNECTION_REFUSED,
                format!("{address} 上没有处于监听状态的通道"),
            ));
            return;
        };
        match listener.serve(self.this()) {
            Ok(child) => {
                *self.peer.lock() = Some(Arc::downgrade(&child));
            }
            Err(err) => self.fail_pending_connect(err),
        }
    }

    fn fail_pending_connect(&self, err: CoreError) {
        let pending = self.connect_completion.lock().clone();
        if let Some(pending) = pending {
            pending.try_fail(err);
        }
    }

    /// 在本循环排空入站队列：受每批次条数上限约束，深层往返改投循环。
    fn read_inbound(&self) {
        let depth = READER_STACK_DEPTH.get();
        if depth >= MAX_READER_STACK_DEPTH {
            let this = self.this();
            if let Some(executor) = self.core.executor() {
                executor.execute(move || this.read_inbound());
            }
            return;
        }
        if self.core.state() != ChannelState::Connected {
            return;
        }
        if self.inbound.lock().is_empty() {
            self.read_pending.store(true, Ordering::Release);
            return;
        }
        self.read_pending.store(false, Ordering::Release);
        READER_STACK_DEPTH.set(depth + 1);
        let pipeline = self.core.pipeline();
        let burst = self.core.options().read_burst.max(1);
        let mut delivered = 0;
        while delivered < burst {
            let Some(msg) = self.inbound.lock().pop_front() else {
                break;
            };
            delivered += 1;
            msg.touch("LocalChannel::read_inbound");
            pipeline.fire_channel_read(msg);
        }
        pipeline.fire_channel_read_complete();
        READER_STACK_DEPTH.set(depth);
        // 批次截断后仍有积压：按自动读策略继续，经循环调度让出控制权。
        if self.core.options().auto_read && !self.inbound.lock().is_empty() {
            let this = self.this();
            if let Some(executor) = self.core.executor() {
                executor.execute(move || this.read_inbound());
            }
        }
    }

    fn flush_on_loop(&self) {
        {
            let outbound = self.core.outbound();
            if outbound.is_empty() {
                return;
            }
        }
        self.write_in_progress.store(true, Ordering::Release);
        let peer = self.peer();
        loop {
            let entry = { self.core.outbound().take_current() };
            let Some(entry) = entry else { break };
            match &peer {
                Some(peer) if peer.core.state() == ChannelState::Connected => {
                    let (msg, completion) = entry.into_parts();
                    msg.touch("LocalChannel::flush");
                    peer.inbound.lock().push_back(msg);
                    completion.try_succeed(());
                }
                _ => entry.fail(closed_channel(error::WRITE).into_shared()),
            }
        }
        self.write_in_progress.store(false, Ordering::Release);
        if let Some(peer) = peer {
            self.finish_peer_read(&peer);
        }
    }

    /// 触发对端排空：同循环且对端不在写进行中则就地执行，
    /// 否则投递到对端循环。
    fn finish_peer_read(&self, peer: &Arc<LocalChannel>) {
        let same_loop = match (self.core.executor(), peer.core.executor()) {
            (Some(ours), Some(theirs)) => Arc::ptr_eq(&ours, &theirs),
            _ => false,
        };
        if same_loop && !peer.write_in_progress.load(Ordering::Acquire) {
            Self::drain_for_peer(peer);
        } else if let Some(peer_executor) = peer.core.executor() {
            // 对端循环的 FIFO 语义保证：本任务不会越过先前排队的排空任务，
            // 也必然排在对端在途写操作之后——等价于真实套接字的读写次序。
            let peer = Arc::clone(peer);
            peer_executor.execute(move || Self::drain_for_peer(&peer));
        }
    }

    fn drain_for_peer(peer: &Arc<LocalChannel>) {
        if peer.read_pending.load(Ordering::Acquire) || peer.core.options().auto_read {
            peer.read_inbound();
        }
    }

    fn close_on_loop(&self) {
        let Some(previous) = self.core.close_transition() else {
            return;
        };
        let was_active = previous == ChannelState::Connected;
        if let Some(address) = self.core.local_address() {
            registry::unregister(&address, self.core.id());
        }
        // 裁决挂起的连接完成：先写者胜，绝不覆盖已收敛者。
        if let Some(pending) = self.connect_completion.lock().take() {
            pending.try_fail(closed_channel(error::CONNECT));
        }
        let err = closed_channel("close").into_shared();
        self.core.outbound().fail_all(&err);
        // 对端收尾严格异步：即便同循环也只排队，绝不重入对端状态。
        let peer = self.peer.lock().take().and_then(|weak| weak.upgrade());
        if let Some(peer) = peer {
            if peer.is_active() {
                peer.close();
            } else if let Some(peer_executor) = peer.core.executor() {
                let peer = Arc::clone(&peer);
                peer_executor.execute(move || peer.release_inbound());
            }
        }
        self.release_inbound();
        self.core.mark_deregistered();
        if was_active {
            self.core.pipeline().fire_channel_inactive();
        }
        self.core.close_completion().try_succeed(());
        tracing::debug!(channel = %self.core.id(), "本地通道已关闭");
    }

    /// 恰好一次地释放全部缓冲入站消息（并发关闭下由原子标志裁决）。
    fn release_inbound(&self) {
        if self.inbound_released.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<Payload> = self.inbound.lock().drain(..).collect();
        for msg in drained {
            msg.touch("LocalChannel::release_inbound");
            msg.release();
        }
    }
}

impl Channel for LocalChannel {
    fn id(&self) -> ChannelId {
        self.core.id()
    }

    fn is_server(&self) -> bool {
        false
    }

    fn state(&self) -> ChannelState {
        self.core.state()
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn is_active(&self) -> bool {
        self.core.state() == ChannelState::Connected
    }

    fn is_registered(&self) -> bool {
        self.core.is_registered()
    }

    fn local_address(&self) -> Option<ChannelAddress> {
        self.core.local_address()
    }

    fn remote_address(&self) -> Option<ChannelAddress> {
        self.core.remote_address()
    }

    fn parent(&self) -> Option<Arc<dyn Channel>> {
        self.parent
            .as_ref()
            .map(|parent| Arc::clone(parent) as Arc<dyn Channel>)
    }

    fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.core.executor()
    }

    fn pipeline(&self) -> Arc<dyn Pipeline> {
        self.core.pipeline()
    }

    fn register(&self, executor: Arc<dyn EventExecutor>) -> Completion {
        if let Err(err) = self.core.bind_executor(Arc::clone(&executor)) {
            return Completion::failed(err);
        }
        let completion = Completion::new();
        let this = self.this();
        let done = completion.clone();
        executor.execute(move || {
            if !this.core.is_open() {
                done.try_fail(closed_channel(error::REGISTER));
                return;
            }
            this.core.mark_registered();
            done.try_succeed(());
            if this.parent.is_some() {
                this.establish_as_spawned();
            }
        });
        completion
    }

    fn bind(&self, address: ChannelAddress) -> Completion {
        if matches!(address, ChannelAddress::Embedded) {
            return Completion::failed(error::unsupported_address(error::BIND));
        }
        let Some(executor) = self.core.executor() else {
            return Completion::failed(error::not_registered(error::BIND));
        };
        let completion = Completion::new();
        let this = self.this();
        let done = completion.clone();
        executor.execute(move || {
            if !this.core.is_open() {
                done.try_fail(closed_channel(error::BIND));
                return;
            }
            if this.core.local_address().is_some() {
                done.try_fail(CoreError::new(codes::ALREADY_BOUND, "通道已绑定本地地址"));
                return;
            }
            let entry = RegistryEntry::Connection(this.self_ref.clone());
            if let Err(err) = registry::register(address.clone(), entry) {
                done.try_fail(err);
                return;
            }
            this.core.set_local_address(Some(address));
            this.core.transition(ChannelState::Bound);
            done.try_succeed(());
        });
        completion
    }

    fn connect(&self, address: ChannelAddress) -> Completion {
        if matches!(address, ChannelAddress::Embedded) {
            return Completion::failed(error::unsupported_address(error::CONNECT));
        }
        let Some(executor) = self.core.executor() else {
            return Completion::failed(error::not_registered(error::CONNECT));
        };
        let completion = Completion::new();
        let this = self.this();
        let done = completion.clone();
        let target = address.clone();
        executor.execute(move || this.connect_on_loop(target, done));
        if let Some(timeout) = self.core.options().connect_timeout {
            let this = self.this();
            let watched = completion.clone();
            executor.schedule(timeout, move || {
                let timed_out = watched.try_fail(CoreError::new(
                    codes::CONNECT_TIMEOUT,
                    format!("连接 {address} 在 {timeout:?} 内未完成"),
                ));
                if timed_out {
                    this.close();
                }
            });
        }
        completion
    }

    fn disconnect(&self) -> Completion {
        // 本地传输没有独立的断连语义：退化为关闭。
        self.close()
    }

    fn close(&self) -> Completion {
        let completion = self.core.close_completion();
        match self.core.executor() {
            Some(executor) => {
                let this = self.this();
                executor.execute(move || this.close_on_loop());
            }
            // 注册前关闭：没有所属循环，就地终结。
            None => self.close_on_loop(),
        }
        completion
    }

    fn deregister(&self) -> Completion {
        let Some(executor) = self.core.executor() else {
            return Completion::succeeded(());
        };
        let completion = Completion::new();
        let this = self.this();
        let done = completion.clone();
        executor.execute(move || {
            this.core.mark_deregistered();
            done.try_succeed(());
        });
        completion
    }

    fn begin_read(&self) {
        let Some(executor) = self.core.executor() else {
            return;
        };
        let this = self.this();
        if executor.in_event_loop() {
            this.read_inbound();
        } else {
            executor.execute(move || this.read_inbound());
        }
    }

    fn write(&self, msg: Payload) -> Completion {
        let completion = Completion::new();
        let Some(executor) = self.core.executor() else {
            msg.release();
            completion.try_fail(error::not_registered(error::WRITE));
            return completion;
        };
        let this = self.this();
        let done = completion.clone();
        executor.execute(move || {
            if this.core.state() != ChannelState::Connected {
                let err = if this.core.is_open() {
                    CoreError::new(codes::NOT_YET_CONNECTED, "通道尚未建立连接")
                } else {
                    closed_channel(error::WRITE)
                };
                msg.release();
                done.try_fail(err);
                return;
            }
            msg.touch("LocalChannel::write");
            this.core.outbound().push(msg, done);
        });
        completion
    }

    fn flush(&self) {
        let Some(executor) = self.core.executor() else {
            return;
        };
        let this = self.this();
        executor.execute(move || this.flush_on_loop());
    }

    fn write_and_flush_void(&self, msg: Payload) {
        let Some(executor) = self.core.executor() else {
            msg.release();
            return;
        };
        let this = self.this();
        executor.execute(move || {
            if this.core.state() != ChannelState::Connected {
                msg.release();
                return;
            }
            msg.touch("LocalChannel::write_and_flush_void");
            this.core.outbound().push(msg, Completion::void());
            this.flush_on_loop();
        });
    }

    fn close_completion(&self) -> Completion {
        self.core.close_completion()
    }
}

impl std::fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChannel")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("local", &self.core.local_address())
            .field("remote", &self.core.remote_address())
            .finish()
    }
}

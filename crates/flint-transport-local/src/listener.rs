use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use flint_core::address::ChannelAddress;
use flint_core::channel::{Channel, ChannelCore, ChannelId, ChannelState};
use flint_core::completion::Completion;
use flint_core::configuration::ChannelOptions;
use flint_core::error::{CoreError, Result, closed_channel, codes};
use flint_core::payload::Payload;
use flint_core::pipeline::{NoopPipeline, Pipeline};
use flint_core::runtime::{EventExecutor, EventExecutorExt};

use crate::channel::LocalChannel;
use crate::error;
use crate::registry::{self, RegistryEntry};

type ChildPipelineFactory = Box<dyn Fn() -> Arc<dyn Pipeline> + Send + Sync>;

/// `LocalServerChannel` 是进程内传输的监听端。
///
/// # 设计背景（Why）
/// - 连接端经注册表找到监听端后，由监听端衍生一个子通道与之配对；
///   监听端自身只经历 `Open → Bound → Closed`，绑定即激活。
///
/// # 逻辑解析（How）
/// - `bind` 把 `地址 → 本通道` 发布进注册表（占用即失败），随后进入
///   激活态并通知处理器链；
/// - `serve` 为每个连接请求构造子通道：子通道持有父引用与对端弱引用，
///   进入交接队列供应用取用，并立即注册到子通道循环（缺省为监听端
///   自己的循环），注册完成即触发配对建立；
/// - 关闭时注销地址，并对交接队列中尚未被取走的子通道逐一下发关闭。
///
/// # 契约说明（What）
/// - 监听端不支持 `connect`/写路径，相关操作以
///   `app.invalid_argument` 失败；
/// - `try_accept` 可在任意线程调用（交接队列为共享状态，互斥保护）。
pub struct LocalServerChannel {
    core: ChannelCore,
    self_ref: Weak<LocalServerChannel>,
    child_pipeline: Mutex<Option<ChildPipelineFactory>>,
    child_executor: Mutex<Option<Arc<dyn EventExecutor>>>,
    child_options: ChannelOptions,
    accepted: Mutex<VecDeque<Arc<LocalChannel>>>,
}

impl LocalServerChannel {
    /// 创建监听端通道。
    pub fn new(pipeline: Arc<dyn Pipeline>, options: ChannelOptions) -> Arc<Self> {
        let child_options = options.clone();
        Arc::new_cyclic(|weak| Self {
            core: ChannelCore::new(pipeline, options),
            self_ref: weak.clone(),
            child_pipeline: Mutex::new(None),
            child_executor: Mutex::new(None),
            child_options,
            accepted: Mutex::new(VecDeque::new()),
        })
    }

    fn this(&self) -> Arc<LocalServerChannel> {
        self.self_ref.upgrade().expect("通道自引用在方法调用期间必然有效")
    }

    /// 设置子通道处理器链工厂；绑定前配置，未设置时子通道使用缺省链。
    pub fn set_child_pipeline_factory(
        &self,
        factory: impl Fn() -> Arc<dyn Pipeline> + Send + Sync + 'static,
    ) {
        *self.child_pipeline.lock() = Some(Box::new(factory));
    }

    /// 设置子通道事件循环；未设置时子通道注册到监听端自己的循环。
    pub fn set_child_executor(&self, executor: Arc<dyn EventExecutor>) {
        *self.child_executor.lock() = Some(executor);
    }

    /// 取走一个已衍生但尚未被应用接收的子通道。
    pub fn try_accept(&self) -> Option<Arc<LocalChannel>> {
        self.accepted.lock().pop_front()
    }

    fn child_pipeline(&self) -> Arc<dyn Pipeline> {
        match &*self.child_pipeline.lock() {
            Some(factory) => factory(),
            None => Arc::new(NoopPipeline),
        }
    }

    fn child_executor_or_own(&self) -> Option<Arc<dyn EventExecutor>> {
        self.child_executor
            .lock()
            .clone()
            .or_else(|| self.core.executor())
    }

    /// 为一个连接请求衍生子通道（可从连接端的循环调用）。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：监听端处于激活态，否则按连接拒绝处理；
    /// - **后置条件**：子通道已进入交接队列并被投递注册，注册完成后
    ///   双方进入连接态。
    pub(crate) fn serve(&self, peer: Arc<LocalChannel>) -> Result<Arc<LocalChannel>> {
        if !self.is_active() {
            return Err(CoreError::new(
                codes::CONNECTION_REFUSED,
                "监听通道未处于激活状态",
            ));
        }
        let Some(child_executor) = self.child_executor_or_own() else {
            return Err(CoreError::new(
                codes::CONNECTION_REFUSED,
                "监听通道缺少可用的子通道事件循环",
            ));
        };
        let child = LocalChannel::spawned(
            self.this(),
            &peer,
            self.child_pipeline(),
            self.child_options.clone(),
        );
        self.accepted.lock().push_back(Arc::clone(&child));
        let child_id = child.id();
        child.register(child_executor).on_complete(move |outcome| {
            if let Some(err) = outcome.cause() {
                tracing::warn!(child = %child_id, code = err.code(), "子通道注册失败");
            }
        });
        tracing::debug!(child = %child_id, "监听通道衍生子通道");
        Ok(child)
    }

    fn close_on_loop(&self) {
        let Some(previous) = self.core.close_transition() else {
            return;
        };
        let was_active = previous == ChannelState::Bound;
        if let Some(address) = self.core.local_address() {
            registry::unregister(&address, self.core.id());
        }
        // 尚未被应用取走的子通道随监听端一并终结。
        let orphans: Vec<Arc<LocalChannel>> = self.accepted.lock().drain(..).collect();
        for child in orphans {
            child.close();
        }
        self.core.mark_deregistered();
        if was_active {
            self.core.pipeline().fire_channel_inactive();
        }
        self.core.close_completion().try_succeed(());
        tracing::debug!(channel = %self.core.id(), "本地监听通道已关闭");
    }
}

impl Channel for LocalServerChannel {
    fn id(&self) -> ChannelId {
        self.core.id()
    }

    fn is_server(&self) -> bool {
        true
    }

    fn state(&self) -> ChannelState {
        self.core.state()
    }

    fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn is_active(&self) -> bool {
        // 监听形态跳过连接态：绑定即激活。
        self.core.state() == ChannelState::Bound
    }

    fn is_registered(&self) -> bool {
        self.core.is_registered()
    }

    fn local_address(&self) -> Option<ChannelAddress> {
        self.core.local_address()
    }

    fn remote_address(&self) -> Option<ChannelAddress> {
        None
    }

    fn parent(&self) -> Option<Arc<dyn Channel>> {
        None
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
                done.try_fail(CoreError::new(codes::ALREADY_BOUND, "监听通道已绑定地址"));
                return;
            }
            let entry = RegistryEntry::Listener(this.self_ref.clone());
            if let Err(err) = registry::register(address.clone(), entry) {
                done.try_fail(err);
                return;
            }
            this.core.set_local_address(Some(address.clone()));
            this.core.transition(ChannelState::Bound);
            this.core.pipeline().fire_channel_active();
            done.try_succeed(());
            tracing::debug!(channel = %this.core.id(), %address, "监听通道已绑定");
        });
        completion
    }

    fn connect(&self, _address: ChannelAddress) -> Completion {
        Completion::failed(error::server_unsupported(error::CONNECT))
    }

    fn disconnect(&self) -> Completion {
        self.close()
    }

    fn close(&self) -> Completion {
        let completion = self.core.close_completion();
        match self.core.executor() {
            Some(executor) => {
                let this = self.this();
                executor.execute(move || this.close_on_loop());
            }
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
        // 监听端的“入站”是子通道交接队列，由应用经 try_accept 消费。
    }

    fn write(&self, msg: Payload) -> Completion {
        msg.release();
        Completion::failed(error::server_unsupported(error::WRITE))
    }

    fn flush(&self) {}

    fn write_and_flush_void(&self, msg: Payload) {
        msg.release();
        tracing::debug!(channel = %self.core.id(), "监听通道丢弃 void 写入");
    }

    fn close_completion(&self) -> Completion {
        self.core.close_completion()
    }
}

impl std::fmt::Debug for LocalServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServerChannel")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("local", &self.core.local_address())
            .finish()
    }
}

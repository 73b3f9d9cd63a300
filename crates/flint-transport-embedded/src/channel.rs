use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use flint_core::address::ChannelAddress;
use flint_core::channel::{Channel, ChannelCore, ChannelId, ChannelState};
use flint_core::completion::Completion;
use flint_core::configuration::ChannelOptions;
use flint_core::error::{CoreError, ErrorRef, closed_channel, codes};
use flint_core::payload::Payload;
use flint_core::pipeline::Pipeline;
use flint_core::runtime::EventExecutor;

use crate::event_loop::ManualEventLoop;

type SinkQueue = Mutex<VecDeque<Payload>>;

/// 缺省处理器链：把全部入站消息原样落入通道的入站终点队列。
struct SinkPipeline {
    inbound: Arc<SinkQueue>,
}

impl Pipeline for SinkPipeline {
    fn fire_channel_read(&self, msg: Payload) {
        msg.touch("SinkPipeline::fire_channel_read");
        self.inbound.lock().push_back(msg);
    }

    fn fire_channel_read_complete(&self) {}

    fn fire_channel_active(&self) {}

    fn fire_channel_inactive(&self) {}

    fn fire_exception_caught(&self, err: ErrorRef) {
        tracing::debug!(code = err.code(), "嵌入式通道缺省链丢弃异常事件");
    }
}

/// `EmbeddedChannel` 是确定性的传输替身：没有对端、没有线程，
/// 消息注入与调度推进全部由测试代码手工驱动。
///
/// # 设计背景（Why）
/// - 协议栈测试需要把“收到了什么、发出了什么”变成可直接断言的队列，
///   并且每一拍调度都可复现；真实传输的线程与时序在这里都是噪声。
///
/// # 逻辑解析（How）
/// - 通道在构造时即注册到专属的 [`ManualEventLoop`] 并进入连接态；
/// - `write_inbound` 把消息按“已接收”注入处理器链并泵送；未被链消费的
///   消息落入入站终点队列（缺省链直接全量落入）；
/// - `write_outbound` 走正规写路径：出站缓冲按 FIFO 排空进出站终点队列；
/// - 泵送期间的首个异常被循环暂存，`check_exception` 在下一次调用时
///   取走重新浮出，绝不在泵送中途抛出。
///
/// # 契约说明（What）
/// - `read_inbound`/`read_outbound` 对空队列返回 `None`，不是错误；
/// - `finish` 关闭通道并报告终点队列是否仍有滞留消息；
///   `finish_and_release_all` 额外逐条释放，杜绝测试泄漏。
pub struct EmbeddedChannel {
    core: ChannelCore,
    event_loop: Arc<ManualEventLoop>,
    inbound_sink: Arc<SinkQueue>,
    outbound_sink: SinkQueue,
}

impl EmbeddedChannel {
    /// 以缺省处理器链与缺省选项创建通道。
    pub fn new() -> Arc<Self> {
        Self::with_options(ChannelOptions::default())
    }

    /// 以缺省处理器链与给定选项创建通道。
    pub fn with_options(options: ChannelOptions) -> Arc<Self> {
        let inbound = Arc::new(SinkQueue::default());
        let pipeline = Arc::new(SinkPipeline {
            inbound: Arc::clone(&inbound),
        });
        Self::build(pipeline, options, inbound)
    }

    /// 以自定义处理器链创建通道。
    ///
    /// # 契约说明（What）
    /// - 入站消息的消费完全由自定义链负责；通道的入站终点队列保持为空，
    ///   `read_inbound` 将始终返回 `None`。
    pub fn with_pipeline(pipeline: Arc<dyn Pipeline>, options: ChannelOptions) -> Arc<Self> {
        Self::build(pipeline, options, Arc::new(SinkQueue::default()))
    }

    fn build(
        pipeline: Arc<dyn Pipeline>,
        options: ChannelOptions,
        inbound_sink: Arc<SinkQueue>,
    ) -> Arc<Self> {
        let event_loop = ManualEventLoop::new();
        let channel = Arc::new(Self {
            core: ChannelCore::new(pipeline, options),
            event_loop: Arc::clone(&event_loop),
            inbound_sink,
            outbound_sink: SinkQueue::default(),
        });
        channel
            .core
            .bind_executor(event_loop as Arc<dyn EventExecutor>)
            .expect("新建通道绑定执行器必然成功");
        channel.core.mark_registered();
        channel.core.set_local_address(Some(ChannelAddress::Embedded));
        channel.core.set_remote_address(Some(ChannelAddress::Embedded));
        channel.core.transition(ChannelState::Connected);
        channel.core.pipeline().fire_channel_active();
        channel
    }

    /// 专属的手动泵送循环。
    pub fn event_loop(&self) -> Arc<ManualEventLoop> {
        Arc::clone(&self.event_loop)
    }

    /// 把一批消息按“已接收”注入处理器链并泵送；
    /// 返回入站终点队列是否非空。
    pub fn write_inbound(&self, msgs: impl IntoIterator<Item = Payload>) -> bool {
        if !self.core.is_open() {
            for msg in msgs {
                msg.release();
            }
            self.event_loop
                .capture(closed_channel("write_inbound").into_shared());
            return !self.inbound_sink.lock().is_empty();
        }
        let pipeline = self.core.pipeline();
        for msg in msgs {
            msg.touch("EmbeddedChannel::write_inbound");
            pipeline.fire_channel_read(msg);
        }
        pipeline.fire_channel_read_complete();
        self.run_pending_tasks();
        !self.inbound_sink.lock().is_empty()
    }

    /// 把一批消息按“待发送”写入并冲刷；返回出站终点队列是否非空。
    pub fn write_outbound(&self, msgs: impl IntoIterator<Item = Payload>) -> bool {
        let mut completions = Vec::new();
        for msg in msgs {
            completions.push(self.write(msg));
        }
        self.flush();
        self.run_pending_tasks();
        for completion in completions {
            if let Some(err) = completion.cause() {
                // 写入失败按“泵送异常”暂存，由 check_exception 重新浮出。
                self.event_loop.capture(err);
            }
        }
        !self.outbound_sink.lock().is_empty()
    }

    /// 取走一条先前到达入站终点队列的消息；队列为空返回 `None`。
    pub fn read_inbound(&self) -> Option<Payload> {
        self.inbound_sink.lock().pop_front()
    }

    /// 取走一条先前产出的出站消息；队列为空返回 `None`。
    pub fn read_outbound(&self) -> Option<Payload> {
        self.outbound_sink.lock().pop_front()
    }

    /// 显式宣告一个读取批次结束并泵送。
    pub fn flush_inbound(&self) {
        self.core.pipeline().fire_channel_read_complete();
        self.run_pending_tasks();
    }

    /// 显式冲刷出站缓冲并泵送。
    pub fn flush_outbound(&self) {
        self.flush();
        self.run_pending_tasks();
    }

    /// 泵送全部已入队的立即任务，等价一次调度拍。
    pub fn run_pending_tasks(&self) -> usize {
        self.event_loop.run_pending_tasks()
    }

    /// 泵送全部到期的定时任务，返回距下一个截止时间的剩余时长。
    pub fn run_scheduled_pending_tasks(&self) -> Option<Duration> {
        self.event_loop.run_scheduled_tasks()
    }

    /// 推进虚拟时间。
    pub fn advance_time(&self, delta: Duration) {
        self.event_loop.advance_time(delta);
    }

    /// 取走泵送期间暂存的首个异常。
    pub fn check_exception(&self) -> Result<(), ErrorRef> {
        match self.event_loop.take_captured() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 关闭通道并泵送；报告两个终点队列是否仍有滞留消息。
    pub fn finish(&self) -> bool {
        self.close();
        self.run_pending_tasks();
        let inbound_left = !self.inbound_sink.lock().is_empty();
        let outbound_left = !self.outbound_sink.lock().is_empty();
        inbound_left || outbound_left
    }

    /// `finish` 之余逐条释放滞留消息，杜绝测试泄漏。
    pub fn finish_and_release_all(&self) -> bool {
        let leftovers = self.finish();
        let drained: Vec<Payload> = {
            let mut inbound = self.inbound_sink.lock();
            let mut outbound = self.outbound_sink.lock();
            inbound.drain(..).chain(outbound.drain(..)).collect()
        };
        for msg in drained {
            msg.touch("EmbeddedChannel::finish_and_release_all");
            msg.release();
        }
        leftovers
    }
}

impl Channel for EmbeddedChannel {
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
        None
    }

    fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        self.core.executor()
    }

    fn pipeline(&self) -> Arc<dyn Pipeline> {
        self.core.pipeline()
    }

    fn register(&self, _executor: Arc<dyn EventExecutor>) -> Completion {
        // 构造期已注册到专属循环，重复注册违反同步前置条件。
        Completion::failed(CoreError::new(
            codes::APP_INVALID_ARGUMENT,
            "嵌入式通道在构造期即已注册",
        ))
    }

    fn bind(&self, address: ChannelAddress) -> Completion {
        if !self.core.is_open() {
            return Completion::failed(closed_channel("bind"));
        }
        self.core.set_local_address(Some(address));
        Completion::succeeded(())
    }

    fn connect(&self, address: ChannelAddress) -> Completion {
        if !self.core.is_open() {
            return Completion::failed(closed_channel("connect"));
        }
        self.core.set_remote_address(Some(address));
        Completion::succeeded(())
    }

    fn disconnect(&self) -> Completion {
        self.close()
    }

    fn close(&self) -> Completion {
        let completion = self.core.close_completion();
        let Some(previous) = self.core.close_transition() else {
            return completion;
        };
        let err = closed_channel("close").into_shared();
        self.core.outbound().fail_all(&err);
        if previous == ChannelState::Connected {
            self.core.pipeline().fire_channel_inactive();
        }
        self.core.mark_deregistered();
        completion.try_succeed(());
        completion
    }

    fn deregister(&self) -> Completion {
        self.core.mark_deregistered();
        Completion::succeeded(())
    }

    fn begin_read(&self) {
        // 入站消息由 write_inbound 直接注入处理器链，无预读缓冲可排空。
    }

    fn write(&self, msg: Payload) -> Completion {
        // 泵送线程即循环线程：写入就地入队。
        if self.core.state() != ChannelState::Connected {
            msg.release();
            return Completion::failed(closed_channel("write"));
        }
        let completion = Completion::new();
        msg.touch("EmbeddedChannel::write");
        self.core.outbound().push(msg, completion.clone());
        completion
    }

    fn flush(&self) {
        loop {
            let entry = { self.core.outbound().take_current() };
            let Some(entry) = entry else { break };
            let (msg, completion) = entry.into_parts();
            msg.touch("EmbeddedChannel::flush");
            self.outbound_sink.lock().push_back(msg);
            completion.try_succeed(());
        }
    }

    fn write_and_flush_void(&self, msg: Payload) {
        if self.core.state() != ChannelState::Connected {
            msg.release();
            return;
        }
        msg.touch("EmbeddedChannel::write_and_flush_void");
        self.core.outbound().push(msg, Completion::void());
        self.flush();
    }

    fn close_completion(&self) -> Completion {
        self.core.close_completion()
    }
}

impl std::fmt::Debug for EmbeddedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedChannel")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("inbound_backlog", &self.inbound_sink.lock().len())
            .field("outbound_backlog", &self.outbound_sink.lock().len())
            .finish()
    }
}

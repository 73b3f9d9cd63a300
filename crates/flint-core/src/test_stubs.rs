//! 测试桩命名空间：框架官方维护的 `Recording`/`Stub` 实现，供集成测试与
//! 下游传输实现复用。
//!
//! # 设计背景（Why）
//! - 统一维护常见桩对象，避免在各处重复定义观察用结构体；
//! - 核心契约演进时，单点更新即可让所有测试同步适配。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::address::ChannelAddress;
use crate::channel::{Channel, ChannelId, ChannelState};
use crate::completion::Completion;
use crate::error::ErrorRef;
use crate::payload::Payload;
use crate::pipeline::{NoopPipeline, Pipeline};
use crate::runtime::EventExecutor;

/// 处理器链观察到的事件（消息另行按序存放）。
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// 通道激活。
    Active,
    /// 通道失活。
    Inactive,
    /// 读取批次结束。
    ReadComplete,
    /// 未被消费的异常。
    Exception(ErrorRef),
}

/// `RecordingPipeline`：捕获全部处理器链事件的探针实现。
///
/// # 行为描述（How）
/// - 入站消息按到达顺序存入消息队列，所有权随之转移（测试侧负责 release）；
/// - 其余事件以枚举形式顺序记录，`take_events` 在断言前清空，保证用例独立。
#[derive(Default)]
pub struct RecordingPipeline {
    events: Mutex<Vec<PipelineEvent>>,
    messages: Mutex<VecDeque<Payload>>,
}

impl RecordingPipeline {
    /// 创建探针并返回共享句柄。
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 取走并清空事件记录。
    pub fn take_events(&self) -> Vec<PipelineEvent> {
        self.events.lock().drain(..).collect()
    }

    /// 是否记录过激活事件。
    pub fn saw_active(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| matches!(event, PipelineEvent::Active))
    }

    /// 已捕获的消息条数。
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// 取走一条最早到达的消息。
    pub fn take_message(&self) -> Option<Payload> {
        self.messages.lock().pop_front()
    }

    /// 取走全部消息。
    pub fn take_messages(&self) -> Vec<Payload> {
        self.messages.lock().drain(..).collect()
    }
}

impl Pipeline for RecordingPipeline {
    fn fire_channel_read(&self, msg: Payload) {
        msg.touch("RecordingPipeline::fire_channel_read");
        self.messages.lock().push_back(msg);
    }

    fn fire_channel_read_complete(&self) {
        self.events.lock().push(PipelineEvent::ReadComplete);
    }

    fn fire_channel_active(&self) {
        self.events.lock().push(PipelineEvent::Active);
    }

    fn fire_channel_inactive(&self) {
        self.events.lock().push(PipelineEvent::Inactive);
    }

    fn fire_exception_caught(&self, err: ErrorRef) {
        self.events.lock().push(PipelineEvent::Exception(err));
    }
}

/// `StubChannel`：结果可编排的通道桩，面向分组聚合语义的测试。
///
/// # 行为描述（How）
/// - `plan_write_failure` 预排写入失败；未预排的写入一律成功并把消息
///   留存在桩内（测试侧断言后 release）；
/// - `close` 幂等并收敛共享的关闭完成句柄，供分组自动退组逻辑挂接。
pub struct StubChannel {
    id: ChannelId,
    server: bool,
    closed: AtomicBool,
    close_completion: Completion,
    planned_failures: Mutex<VecDeque<ErrorRef>>,
    written: Mutex<Vec<Payload>>,
    pipeline: Arc<dyn Pipeline>,
}

impl StubChannel {
    /// 创建连接形态的桩。
    pub fn connection() -> Arc<Self> {
        Self::build(false)
    }

    /// 创建监听形态的桩。
    pub fn server() -> Arc<Self> {
        Self::build(true)
    }

    fn build(server: bool) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            server,
            closed: AtomicBool::new(false),
            close_completion: Completion::new(),
            planned_failures: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            pipeline: Arc::new(NoopPipeline),
        })
    }

    /// 预排下一次写入的失败根因。
    pub fn plan_write_failure(&self, err: ErrorRef) {
        self.planned_failures.lock().push_back(err);
    }

    /// 桩内留存的成功写入。
    pub fn take_written(&self) -> Vec<Payload> {
        self.written.lock().drain(..).collect()
    }
}

impl Channel for StubChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_server(&self) -> bool {
        self.server
    }

    fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::Acquire) {
            ChannelState::Closed
        } else {
            ChannelState::Connected
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn is_active(&self) -> bool {
        self.is_open()
    }

    fn is_registered(&self) -> bool {
        true
    }

    fn local_address(&self) -> Option<ChannelAddress> {
        None
    }

    fn remote_address(&self) -> Option<ChannelAddress> {
        None
    }

    fn parent(&self) -> Option<Arc<dyn Channel>> {
        None
    }

    fn executor(&self) -> Option<Arc<dyn EventExecutor>> {
        None
    }

    fn pipeline(&self) -> Arc<dyn Pipeline> {
        Arc::clone(&self.pipeline)
    }

    fn register(&self, _executor: Arc<dyn EventExecutor>) -> Completion {
        Completion::succeeded(())
    }

    fn bind(&self, _address: ChannelAddress) -> Completion {
        Completion::succeeded(())
    }

    fn connect(&self, _address: ChannelAddress) -> Completion {
        Completion::succeeded(())
    }

    fn disconnect(&self) -> Completion {
        self.close()
    }

    fn close(&self) -> Completion {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.close_completion.try_succeed(());
        }
        self.close_completion.clone()
    }

    fn deregister(&self) -> Completion {
        Completion::succeeded(())
    }

    fn begin_read(&self) {}

    fn write(&self, msg: Payload) -> Completion {
        if let Some(err) = self.planned_failures.lock().pop_front() {
            msg.release();
            return Completion::failed(err);
        }
        self.written.lock().push(msg);
        Completion::succeeded(())
    }

    fn flush(&self) {}

    fn write_and_flush_void(&self, msg: Payload) {
        if let Some(err) = self.planned_failures.lock().pop_front() {
            tracing::debug!(code = err.code(), "void 写入失败被丢弃");
            msg.release();
            return;
        }
        self.written.lock().push(msg);
    }

    fn close_completion(&self) -> Completion {
        self.close_completion.clone()
    }
}

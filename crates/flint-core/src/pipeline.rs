use crate::error::ErrorRef;
use crate::payload::Payload;

/// `Pipeline` 是上游协作方（处理器链）的黑盒契约。
///
/// # 设计背景（Why）
/// - 传输内核只负责在正确的时机、以正确的顺序向处理器链投递事件；
///   链内如何分发、由哪些处理器消费，对内核完全不可见。
///
/// # 契约说明（What）
/// - `fire_channel_read`：按到达顺序逐条投递入站消息，消息所有权随调用转移，
///   未被任何处理器消费的消息由实现负责释放或落入终点队列；
/// - `fire_channel_read_complete`：一个读取批次结束；
/// - `fire_channel_active` / `fire_channel_inactive`：通道激活 / 失活；
/// - `fire_exception_caught`：未被消费的异常事件。
///
/// # 并发语义
/// - 所有方法只会在通道所属事件循环的线程上被调用，同一通道的回调绝不
///   与自身并发。
pub trait Pipeline: Send + Sync + 'static {
    /// 投递一条入站消息。
    fn fire_channel_read(&self, msg: Payload);

    /// 宣告一个读取批次结束。
    fn fire_channel_read_complete(&self);

    /// 通道进入激活状态。
    fn fire_channel_active(&self);

    /// 通道离开激活状态。
    fn fire_channel_inactive(&self);

    /// 投递未被消费的异常。
    fn fire_exception_caught(&self, err: ErrorRef);
}

/// `NoopPipeline`：官方缺省实现，记录并释放一切入站事件。
///
/// # 契约说明（What）
/// - 入站消息视为“无人消费”，立即 release 并以 trace 级别记录；
/// - 异常以 debug 级别记录后丢弃，不影响通道生命周期。
#[derive(Debug, Default)]
pub struct NoopPipeline;

impl Pipeline for NoopPipeline {
    fn fire_channel_read(&self, msg: Payload) {
        msg.touch("NoopPipeline::fire_channel_read");
        msg.release();
        tracing::trace!("未被消费的入站消息已释放");
    }

    fn fire_channel_read_complete(&self) {}

    fn fire_channel_active(&self) {}

    fn fire_channel_inactive(&self) {}

    fn fire_exception_caught(&self, err: ErrorRef) {
        tracing::debug!(code = err.code(), message = err.message(), "未被消费的异常事件");
    }
}

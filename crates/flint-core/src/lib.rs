#![deny(unsafe_code)]
#![doc = "flint-core: 进程内通道/事件循环传输内核的核心契约与共享实现。"]
#![doc = ""]
#![doc = "== 定位 =="]
#![doc = "本 crate 承载传输内核的抽象面与跨传输共享的实现：完成句柄、事件循环"]
#![doc = "执行器契约与生产形态的单线程循环、通道状态机与出站缓冲、处理器链"]
#![doc = "黑盒契约、显式引用计数的负载模型（含采样泄漏探针）、通道组与聚合"]
#![doc = "完成。具体传输形态（本地配对、确定性测试通道）在各自的传输 crate"]
#![doc = "中落地。"]
#![doc = ""]
#![doc = "== 并发模型 =="]
#![doc = "协作式单线程事件循环：每个循环串行化其名下通道的全部私有状态变更；"]
#![doc = "跨循环协调一律通过向目标自己的循环投递任务完成，绝不跨循环加锁。"]

pub mod address;
pub mod channel;
pub mod completion;
pub mod configuration;
pub mod error;
pub mod group;
pub mod payload;
pub mod pipeline;
pub mod runtime;
/// 测试桩命名空间，集中暴露框架官方维护的 `Recording`/`Stub` 实现，
/// 供集成测试与下游传输实现复用。
pub mod test_stubs;

pub use address::ChannelAddress;
pub use channel::{
    Channel, ChannelCore, ChannelId, ChannelState,
    outbound::{OutboundBuffer, OutboundEntry},
};
pub use completion::{Completion, CompletionState, Outcome};
pub use configuration::ChannelOptions;
pub use error::{CoreError, ErrorRef, Result, codes};
pub use group::{ChannelGroup, ChannelMatcher, GroupCompletion, GroupFailure};
pub use payload::{Payload, PayloadBody};
pub use pipeline::{NoopPipeline, Pipeline};
pub use runtime::{EventExecutor, EventExecutorExt, SingleThreadEventLoop, TaskQueue};

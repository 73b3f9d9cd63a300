#![deny(unsafe_code)]
#![doc = "flint 确定性测试通道：手动泵送的事件循环与嵌入式传输替身。"]
#![doc = ""]
#![doc = "== 定位 =="]
#![doc = "面向协议栈测试：消息注入（write_inbound/write_outbound）、队列断言"]
#![doc = "（read_inbound/read_outbound）、调度推进（run_pending_tasks/虚拟时间）"]
#![doc = "全部由测试代码手工驱动，每一拍都可复现。"]
#![doc = ""]
#![doc = "== 异常面 =="]
#![doc = "泵送期间的首个异常被暂存，由 check_exception 在下一次调用时取走"]
#![doc = "重新浮出——绝不在泵送中途抛出。"]

mod channel;
mod event_loop;

pub use channel::EmbeddedChannel;
pub use event_loop::ManualEventLoop;

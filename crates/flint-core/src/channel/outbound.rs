use std::collections::VecDeque;

use crate::completion::Completion;
use crate::configuration::ChannelOptions;
use crate::error::ErrorRef;
use crate::payload::Payload;

/// 出站缓冲中的一项：消息与其完成句柄的配对。
pub struct OutboundEntry {
    message: Payload,
    completion: Completion,
}

impl OutboundEntry {
    /// 只读访问待投递消息。
    pub fn message(&self) -> &Payload {
        &self.message
    }

    /// 拆解为 `(消息, 完成句柄)`，投递成功路径使用。
    pub fn into_parts(self) -> (Payload, Completion) {
        (self.message, self.completion)
    }

    /// 投递失败：释放消息并以给定根因失败完成句柄。
    pub fn fail(self, err: ErrorRef) {
        self.message.touch("OutboundEntry::fail");
        self.message.release();
        self.completion.try_fail(err);
    }
}

/// `OutboundBuffer` 是单条通道的待写 FIFO。
///
/// # 设计背景（Why）
/// - 写入与冲刷解耦：`write` 仅入队，真实投递发生在 `flush` 驱动的排空中；
/// - 完成顺序即提交顺序是传输的基础承诺，缓冲必须严格按队首游标推进，
///   绝不跳项。
///
/// # 契约说明（What）
/// - 仅所属事件循环线程访问（通道私有状态）；
/// - `take_current` 按 FIFO 弹出队首项；排空方对每一项先尝试投递、再
///   决定成功或失败，然后才能推进到下一项；
/// - `fail_all` 在关闭路径一次性失败全部滞留项并逐条释放消息；
/// - 字节簿记对照写缓冲水位维护可写性标志；进程内传输不会因容量拒绝
///   写入，水位只作背压信号形态。
pub struct OutboundBuffer {
    entries: VecDeque<OutboundEntry>,
    pending_bytes: usize,
    high_watermark: usize,
    low_watermark: usize,
    writable: bool,
}

impl OutboundBuffer {
    /// 依据通道选项创建缓冲。
    pub fn new(options: &ChannelOptions) -> Self {
        Self {
            entries: VecDeque::new(),
            pending_bytes: 0,
            high_watermark: options.write_buffer_high_watermark,
            low_watermark: options.write_buffer_low_watermark,
            writable: true,
        }
    }

    /// 追加一项待写消息。
    pub fn push(&mut self, message: Payload, completion: Completion) {
        self.pending_bytes += message.len();
        if self.pending_bytes > self.high_watermark {
            self.writable = false;
        }
        self.entries.push_back(OutboundEntry {
            message,
            completion,
        });
    }

    /// 只读访问队首消息。
    pub fn current(&self) -> Option<&Payload> {
        self.entries.front().map(OutboundEntry::message)
    }

    /// 按 FIFO 弹出队首项。
    pub fn take_current(&mut self) -> Option<OutboundEntry> {
        let entry = self.entries.pop_front()?;
        self.pending_bytes = self.pending_bytes.saturating_sub(entry.message.len());
        if self.pending_bytes <= self.low_watermark {
            self.writable = true;
        }
        Some(entry)
    }

    /// 关闭路径：以同一根因失败全部滞留项，消息逐条释放。
    pub fn fail_all(&mut self, err: &ErrorRef) {
        while let Some(entry) = self.take_current() {
            entry.fail(ErrorRef::clone(err));
        }
    }

    /// 缓冲是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 滞留项数量。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 滞留字节数。
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// 依据水位簿记得出的可写性。
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

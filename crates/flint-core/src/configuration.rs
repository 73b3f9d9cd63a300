use std::time::Duration;

/// 通道选项：读取突发、自动读、连接时限与写缓冲水位。
///
/// # 设计背景（Why）
/// - 读取路径需要一个“每批次上限”防止单条通道长期霸占事件循环；
/// - 连接建立失败必须可被限时裁决，否则挂起的连接完成句柄无法收敛；
/// - 写缓冲水位用于出站簿记：进程内传输不会耗尽容量，但水位使
///   背压信号的形态与真实传输保持一致。
///
/// # 契约说明（What）
/// - `auto_read`（默认 `true`）：激活后自动开始投递入站消息；
/// - `read_burst`（默认 16）：单个读取批次最多投递的消息条数；
/// - `connect_timeout`（默认 `None`）：连接建立时限，超时以
///   `transport.connect_timeout` 失败其完成句柄；
/// - `write_buffer_high_watermark` / `write_buffer_low_watermark`
///   （默认 64 KiB / 32 KiB）：出站缓冲的可写性阈值。
#[derive(Clone, Debug)]
pub struct ChannelOptions {
    /// 激活后是否自动开始读取。
    pub auto_read: bool,
    /// 单个读取批次的消息条数上限。
    pub read_burst: usize,
    /// 连接建立时限。
    pub connect_timeout: Option<Duration>,
    /// 出站缓冲高水位（字节）。
    pub write_buffer_high_watermark: usize,
    /// 出站缓冲低水位（字节）。
    pub write_buffer_low_watermark: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            auto_read: true,
            read_burst: 16,
            connect_timeout: None,
            write_buffer_high_watermark: 64 * 1024,
            write_buffer_low_watermark: 32 * 1024,
        }
    }
}

impl ChannelOptions {
    /// 覆盖自动读开关。
    pub fn with_auto_read(mut self, auto_read: bool) -> Self {
        self.auto_read = auto_read;
        self
    }

    /// 覆盖读取突发上限；0 视为 1。
    pub fn with_read_burst(mut self, read_burst: usize) -> Self {
        self.read_burst = read_burst.max(1);
        self
    }

    /// 覆盖连接时限。
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// 覆盖写缓冲水位；低水位超过高水位属调用方错误。
    pub fn with_write_buffer_watermarks(mut self, low: usize, high: usize) -> Self {
        assert!(low <= high, "写缓冲低水位不得高于高水位");
        self.write_buffer_low_watermark = low;
        self.write_buffer_high_watermark = high;
        self
    }
}

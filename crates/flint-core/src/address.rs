use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// `ChannelAddress` 是进程内传输使用的统一地址形态。
///
/// # 设计背景（Why）
/// - 本仓的传输全部运行在进程内，不存在套接字地址；地址唯一的职责是
///   作为注册表键与日志标识，文本形态仅供展示与相等性判断，绝不解析。
///
/// # 契约说明（What）
/// - `Named`：调用方显式命名的地址（绑定监听时使用）；
/// - `Ephemeral`：连接端自动生成的进程内唯一地址，文本形态 `local:E<hex>`；
/// - `Embedded`：确定性测试通道的占位地址，本地传输拒绝接受该变体。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelAddress {
    /// 显式命名的地址，文本形态 `local: <id>`。
    Named(Arc<str>),
    /// 自动生成的临时地址。
    Ephemeral(u64),
    /// 测试工具通道占位地址。
    Embedded,
}

impl ChannelAddress {
    /// 以名字构造地址。
    pub fn named(id: impl AsRef<str>) -> Self {
        ChannelAddress::Named(Arc::from(id.as_ref()))
    }

    /// 生成进程内唯一的临时地址。
    pub fn ephemeral() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelAddress::Ephemeral(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 地址名；临时与占位地址返回 `None`。
    pub fn name(&self) -> Option<&str> {
        match self {
            ChannelAddress::Named(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddress::Named(id) => write!(f, "local: {id}"),
            ChannelAddress::Ephemeral(serial) => write!(f, "local:E{serial:08x}"),
            ChannelAddress::Embedded => write!(f, "embedded"),
        }
    }
}

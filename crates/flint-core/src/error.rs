use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// `CoreError` 是 `flint` 全仓共享的稳定错误域，承载错误码、描述与可选根因。
///
/// # 设计背景（Why）
/// - 通道生命周期、事件循环与分组广播产生的故障需要合流为统一的错误码，
///   以便日志与断言能按稳定语义分类，而不是解析自由文本。
/// - 异步边界上的失败只通过完成句柄传播，错误值需要 `Send + Sync + 'static`
///   并支持跨监听器共享，因此失败原因统一以 [`ErrorRef`]（`Arc<CoreError>`）流转。
///
/// # 契约说明（What）
/// - `code`：`'static` 字符串，遵循 `<域>.<语义>` 约定，取值见 [`codes`]；
/// - `message`：面向排障人员的自然语言描述；
/// - `cause`：可选底层原因，经 [`source`](StdError::source) 暴露完整链路。
///
/// # 风险提示（Trade-offs）
/// - 结构体仅负责承载信息，不执行任何日志或指标上报；调用方自行处理。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

/// 跨监听器/聚合器共享的错误引用形态。
pub type ErrorRef = Arc<CoreError>;

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`code` 已在 [`codes`] 或调用方文档中备案；
    /// - **后置条件**：返回值不含底层原因，可通过 [`with_cause`](Self::with_cause) 补充。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// 包装为可共享的 [`ErrorRef`]，供完成句柄与聚合器复用同一份根因。
    pub fn into_shared(self) -> ErrorRef {
        Arc::new(self)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// 统一结果别名，默认错误为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 稳定错误码清单。
///
/// # 设计背景（Why）
/// - 传输层失败只通过完成句柄可见，调用方依赖错误码（而非消息文本）决定补偿策略；
/// - 码值按 `<域>.<语义>` 命名，新增时必须同步更新相关测试与文档。
pub mod codes {
    /// 通道已经绑定过本地地址，重复 `bind` 被拒绝。
    pub const ALREADY_BOUND: &str = "transport.already_bound";
    /// 目标地址已被其他通道占用。
    pub const ADDRESS_IN_USE: &str = "transport.address_in_use";
    /// 地址变体与传输实现不匹配（例如向本地传输传入 Embedded 占位地址）。
    pub const UNSUPPORTED_ADDRESS: &str = "transport.unsupported_address";
    /// 目标地址上不存在处于监听状态的通道。
    pub const CONNECTION_REFUSED: &str = "transport.connection_refused";
    /// 通道已处于连接状态，重复 `connect` 被拒绝。
    pub const ALREADY_CONNECTED: &str = "transport.already_connected";
    /// 已有尚未完成的连接尝试。
    pub const CONNECTION_PENDING: &str = "transport.connection_pending";
    /// 操作要求通道处于连接状态，但尚未建立连接。
    pub const NOT_YET_CONNECTED: &str = "transport.not_yet_connected";
    /// 连接建立在配置的时限内未完成。
    pub const CONNECT_TIMEOUT: &str = "transport.connect_timeout";
    /// 通道已关闭，后续读写与生命周期操作均失败。
    pub const CLOSED_CHANNEL: &str = "transport.closed_channel";
    /// 操作被取消（含事件循环停机时批量取消的定时任务）。
    pub const CANCELLED: &str = "task.cancelled";
    /// 任务在事件循环内 panic，被隔离捕获。
    pub const TASK_PANIC: &str = "task.panic";
    /// 分组广播存在失败成员，根因为复合错误。
    pub const GROUP_PARTIAL_FAILURE: &str = "group.partial_failure";
    /// 调用方违反同步前置条件（非法参数、非法状态迁移等）。
    pub const APP_INVALID_ARGUMENT: &str = "app.invalid_argument";
}

/// 构造“通道已关闭”错误的便捷入口，关闭路径上多处复用。
pub fn closed_channel(op: &'static str) -> CoreError {
    CoreError::new(codes::CLOSED_CHANNEL, format!("{op}: 通道已关闭"))
}

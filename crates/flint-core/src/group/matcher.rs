use std::sync::Arc;

use crate::channel::{Channel, ChannelId};

/// `ChannelMatcher` 是广播操作的成员筛选谓词。
///
/// # 契约说明（What）
/// - 谓词必须无副作用且可跨线程共享；广播在成员快照上逐一求值；
/// - 组合子按需叠加，常用形态以关联函数直接提供。
#[derive(Clone)]
pub struct ChannelMatcher {
    predicate: Arc<dyn Fn(&Arc<dyn Channel>) -> bool + Send + Sync>,
}

impl ChannelMatcher {
    /// 自定义谓词。
    pub fn custom(
        predicate: impl Fn(&Arc<dyn Channel>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// 匹配全部成员。
    pub fn all() -> Self {
        Self::custom(|_| true)
    }

    /// 仅匹配监听形态成员。
    pub fn servers() -> Self {
        Self::custom(|channel| channel.is_server())
    }

    /// 仅匹配连接形态成员。
    pub fn non_servers() -> Self {
        Self::custom(|channel| !channel.is_server())
    }

    /// 仅匹配指定标识的成员。
    pub fn single(id: ChannelId) -> Self {
        Self::custom(move |channel| channel.id() == id)
    }

    /// 取反组合子。
    pub fn invert(inner: ChannelMatcher) -> Self {
        Self::custom(move |channel| !inner.matches(channel))
    }

    /// 对成员求值。
    pub fn matches(&self, channel: &Arc<dyn Channel>) -> bool {
        (self.predicate)(channel)
    }
}

impl std::fmt::Debug for ChannelMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelMatcher")
    }
}

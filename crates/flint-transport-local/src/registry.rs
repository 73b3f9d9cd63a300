use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use flint_core::address::ChannelAddress;
use flint_core::channel::{Channel, ChannelId};
use flint_core::error::{CoreError, Result, codes};

use crate::channel::LocalChannel;
use crate::listener::LocalServerChannel;

/// 注册表登记项：地址当前归属的通道。
///
/// # 契约说明（What）
/// - 登记以弱引用持有通道——注册表绝不延长通道生命周期；
/// - 弱引用失效的登记视为“地址已腾空”，允许被覆盖。
pub(crate) enum RegistryEntry {
    /// 监听形态通道。
    Listener(Weak<LocalServerChannel>),
    /// 连接形态通道（显式 bind 的客户端）。
    Connection(Weak<LocalChannel>),
}

impl RegistryEntry {
    fn id(&self) -> Option<ChannelId> {
        match self {
            RegistryEntry::Listener(weak) => weak.upgrade().map(|ch| ch.id()),
            RegistryEntry::Connection(weak) => weak.upgrade().map(|ch| ch.id()),
        }
    }

    fn is_live(&self) -> bool {
        self.id().is_some()
    }
}

/// 进程级地址表：本地传输唯一被多个事件循环共同触碰的状态之一，
/// 使用分片并发映射的 add/remove-if-absent 原子操作，无全局锁。
fn table() -> &'static DashMap<ChannelAddress, RegistryEntry> {
    static TABLE: LazyLock<DashMap<ChannelAddress, RegistryEntry>> = LazyLock::new(DashMap::new);
    &TABLE
}

/// 发布 `地址 → 通道` 映射；地址被存活通道占用时失败。
pub(crate) fn register(address: ChannelAddress, entry: RegistryEntry) -> Result<()> {
    match table().entry(address) {
        Entry::Occupied(mut occupied) => {
            if occupied.get().is_live() {
                return Err(CoreError::new(
                    codes::ADDRESS_IN_USE,
                    format!("{} 已被其他通道占用", occupied.key()),
                ));
            }
            occupied.insert(entry);
            Ok(())
        }
        Entry::Vacant(vacant) => {
            vacant.insert(entry);
            Ok(())
        }
    }
}

/// 查找地址上的监听通道；不存在或非监听形态时返回 `None`。
pub(crate) fn lookup_listener(address: &ChannelAddress) -> Option<Arc<LocalServerChannel>> {
    let guard = table().get(address)?;
    match guard.value() {
        RegistryEntry::Listener(weak) => weak.upgrade(),
        RegistryEntry::Connection(_) => None,
    }
}

/// 注销地址；仅当登记确属该通道（或登记已失效）时移除。
pub(crate) fn unregister(address: &ChannelAddress, id: ChannelId) {
    table().remove_if(address, |_, entry| {
        entry.id().map(|owner| owner == id).unwrap_or(true)
    });
}

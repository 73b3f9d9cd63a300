//! # 通道组与聚合完成
//!
//! ## 契约声明
//! * **成员分区**：监听形态与连接形态分开登记，键为通道标识；
//! * **自动退组**：成员关闭即从组中移除（挂接在其关闭完成句柄上）；
//! * **广播语义**：消息按接收方 retain-duplicate 各持一份，调用方原始
//!   引用在派发完成后恰好释放一次；聚合“等全体完成、报告彼时已失败者”，
//!   绝非 fail-fast。

pub mod aggregator;
pub mod matcher;

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::channel::{Channel, ChannelId};
use crate::completion::Completion;
use crate::payload::Payload;

pub use aggregator::{GroupCompletion, GroupFailure};
pub use matcher::ChannelMatcher;

struct GroupInner {
    name: Arc<str>,
    servers: DashMap<ChannelId, Arc<dyn Channel>>,
    connections: DashMap<ChannelId, Arc<dyn Channel>>,
    closed: AtomicBool,
    stay_closed: bool,
}

impl GroupInner {
    fn remove(&self, id: ChannelId) -> bool {
        self.servers.remove(&id).is_some() | self.connections.remove(&id).is_some()
    }
}

/// `ChannelGroup` 是可广播的通道集合。
///
/// # 设计背景（Why）
/// - 面向“对一批连接同时写入/关闭”的服务端场景：成员动态进出，广播
///   操作需要一个聚合完成视图；
/// - 成员表是少数被多个事件循环可见触碰的共享状态之一，使用分片并发
///   映射的 add/remove-if-absent 原子操作，不引入全局锁。
///
/// # 契约说明（What）
/// - `add` 幂等（同一标识重复加入返回 `false`）；加入时挂接关闭继续体，
///   成员关闭自动退组；
/// - “关闭即封存”（stay-closed）的组在组关闭后，对后续加入的通道立即
///   下发关闭；
/// - 广播操作接受匹配谓词，消息按接收方 retain-duplicate，原始引用派发
///   后恰好释放一次。
#[derive(Clone)]
pub struct ChannelGroup {
    inner: Arc<GroupInner>,
}

impl ChannelGroup {
    /// 创建通道组。
    pub fn new(name: impl AsRef<str>) -> Self {
        Self::build(name, false)
    }

    /// 创建“关闭即封存”的通道组。
    pub fn new_stay_closed(name: impl AsRef<str>) -> Self {
        Self::build(name, true)
    }

    fn build(name: impl AsRef<str>, stay_closed: bool) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: Arc::from(name.as_ref()),
                servers: DashMap::new(),
                connections: DashMap::new(),
                closed: AtomicBool::new(false),
                stay_closed,
            }),
        }
    }

    /// 组名。
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 加入成员；已存在时返回 `false`。
    pub fn add(&self, channel: Arc<dyn Channel>) -> bool {
        if self.inner.stay_closed && self.inner.closed.load(Ordering::Acquire) {
            // 组已封存：后来者直接关闭，不进入成员表。
            channel.close();
            return false;
        }
        let id = channel.id();
        let partition = if channel.is_server() {
            &self.inner.servers
        } else {
            &self.inner.connections
        };
        let inserted = match partition.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&channel));
                true
            }
        };
        if inserted {
            let group = Arc::downgrade(&self.inner);
            channel.close_completion().on_complete(move |_| {
                if let Some(group) = Weak::upgrade(&group) {
                    group.remove(id);
                }
            });
        }
        inserted
    }

    /// 移除成员。
    pub fn remove(&self, id: ChannelId) -> bool {
        self.inner.remove(id)
    }

    /// 是否包含指定成员。
    pub fn contains(&self, id: ChannelId) -> bool {
        self.inner.servers.contains_key(&id) || self.inner.connections.contains_key(&id)
    }

    /// 成员总数。
    pub fn len(&self) -> usize {
        self.inner.servers.len() + self.inner.connections.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, matcher: &ChannelMatcher, connections_only: bool) -> Vec<Arc<dyn Channel>> {
        let mut matched = Vec::new();
        for entry in self.inner.connections.iter() {
            if matcher.matches(entry.value()) {
                matched.push(Arc::clone(entry.value()));
            }
        }
        if !connections_only {
            for entry in self.inner.servers.iter() {
                if matcher.matches(entry.value()) {
                    matched.push(Arc::clone(entry.value()));
                }
            }
        }
        matched
    }

    fn aggregate(
        members: Vec<Arc<dyn Channel>>,
        op: impl Fn(&Arc<dyn Channel>) -> Completion,
    ) -> GroupCompletion {
        let group_completion = GroupCompletion::new(members.len());
        for channel in members {
            let id = channel.id();
            let aggregator = group_completion.clone();
            op(&channel).on_complete(move |outcome| aggregator.record(id, outcome));
        }
        group_completion
    }

    /// 广播写入（不冲刷）；消息按接收方 retain-duplicate。
    ///
    /// # 契约说明（What）
    /// - 写入只面向连接形态成员（监听端不具备写路径）；
    /// - 调用方传入的原始引用在派发完成后恰好释放一次；
    /// - 聚合在全体成员完成后收敛，失败成员在复合根因中逐一列出。
    pub fn write(&self, msg: Payload, matcher: ChannelMatcher) -> GroupCompletion {
        let members = self.snapshot(&matcher, true);
        let result = Self::aggregate(members, |channel| {
            channel.write(msg.retained_duplicate())
        });
        msg.touch("ChannelGroup::write");
        msg.release();
        result
    }

    /// 广播写入并冲刷。
    pub fn write_and_flush(&self, msg: Payload, matcher: ChannelMatcher) -> GroupCompletion {
        let members = self.snapshot(&matcher, true);
        let result = Self::aggregate(members, |channel| {
            channel.write_and_flush(msg.retained_duplicate())
        });
        msg.touch("ChannelGroup::write_and_flush");
        msg.release();
        result
    }

    /// 发后不理的广播写入冲刷：完全跳过聚合器构造。
    pub fn write_and_flush_void(&self, msg: Payload, matcher: ChannelMatcher) {
        let members = self.snapshot(&matcher, true);
        for channel in members {
            channel.write_and_flush_void(msg.retained_duplicate());
        }
        msg.touch("ChannelGroup::write_and_flush_void");
        msg.release();
    }

    /// 广播断连。
    pub fn disconnect(&self, matcher: ChannelMatcher) -> GroupCompletion {
        Self::aggregate(self.snapshot(&matcher, false), |channel| channel.disconnect())
    }

    /// 广播关闭。
    pub fn close(&self, matcher: ChannelMatcher) -> GroupCompletion {
        Self::aggregate(self.snapshot(&matcher, false), |channel| channel.close())
    }

    /// 广播注销。
    pub fn deregister(&self, matcher: ChannelMatcher) -> GroupCompletion {
        Self::aggregate(self.snapshot(&matcher, false), |channel| channel.deregister())
    }

    /// 关闭整组：广播关闭全部成员；“关闭即封存”的组此后拒绝新成员。
    pub fn close_group(&self) -> GroupCompletion {
        self.inner.closed.store(true, Ordering::Release);
        self.close(ChannelMatcher::all())
    }
}

impl std::fmt::Debug for ChannelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGroup")
            .field("name", &self.inner.name)
            .field("servers", &self.inner.servers.len())
            .field("connections", &self.inner.connections.len())
            .finish()
    }
}

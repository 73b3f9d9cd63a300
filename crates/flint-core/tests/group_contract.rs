//! `group_contract` 集成测试：聚焦通道组的成员管理与聚合收敛语义。
//!
//! # 测试总览（Why）
//! - 分区登记、关闭自动退组与“关闭即封存”是组的成员管理契约；
//! - 聚合器“等全体完成、报告彼时已失败者”的语义是刻意保留的原始行为，
//!   绝不允许退化为 fail-fast，这里以手工记录逐步验证；
//! - 广播消息按接收方 retain-duplicate、原始引用恰好释放一次。

use std::sync::Arc;

use flint_core::channel::{Channel, ChannelId};
use flint_core::completion::Outcome;
use flint_core::error::{CoreError, codes};
use flint_core::group::{ChannelGroup, ChannelMatcher, GroupCompletion, GroupFailure};
use flint_core::payload::Payload;
use flint_core::test_stubs::StubChannel;

/// 成员按形态分区登记，关闭后自动退组。
#[test]
fn members_partition_and_auto_remove_on_close() {
    let group = ChannelGroup::new("partition");
    let listener = StubChannel::server();
    let connection = StubChannel::connection();
    assert!(group.add(listener.clone()));
    assert!(group.add(connection.clone()));
    assert!(!group.add(connection.clone()), "重复加入应返回 false");
    assert_eq!(group.len(), 2);
    assert!(group.contains(connection.id()));

    connection.close().wait();
    assert_eq!(group.len(), 1, "成员关闭应自动退组");
    assert!(!group.contains(connection.id()));
    assert!(group.contains(listener.id()));
}

/// “关闭即封存”的组对后来者立即下发关闭。
#[test]
fn stay_closed_group_closes_late_arrivals() {
    let group = ChannelGroup::new_stay_closed("sealed");
    let member = StubChannel::connection();
    group.add(member.clone());
    group.close_group().completion().wait();
    assert!(!member.is_open(), "封存应关闭既有成员");

    let latecomer = StubChannel::connection();
    assert!(!group.add(latecomer.clone()), "封存后的加入应被拒绝");
    assert!(!latecomer.is_open(), "后来者应被立即关闭");
    assert!(group.is_empty());
}

/// K<N 失败的广播：恰好收敛一次、报告部分失败、复合根因列出恰好 K 对。
#[test]
fn broadcast_with_partial_failures_reports_each_failed_member() {
    let group = ChannelGroup::new("broadcast");
    let healthy_a = StubChannel::connection();
    let healthy_b = StubChannel::connection();
    let faulty = StubChannel::connection();
    faulty.plan_write_failure(
        CoreError::new(codes::CLOSED_CHANNEL, "模拟成员故障").into_shared(),
    );
    for member in [&healthy_a, &healthy_b, &faulty] {
        group.add(member.clone());
    }

    let msg = Payload::text("广播样本");
    let observer = msg.retained_duplicate();
    let aggregate = group.write_and_flush(msg, ChannelMatcher::all());
    aggregate.completion().wait();

    assert!(aggregate.is_done());
    assert_eq!(aggregate.success_count(), 2);
    assert_eq!(aggregate.failure_count(), 1);
    assert!(aggregate.is_partial_failure());
    assert!(aggregate.is_partial_success());

    let cause = aggregate.cause().expect("存在失败成员时聚合应以失败收敛");
    assert_eq!(cause.code(), codes::GROUP_PARTIAL_FAILURE);
    let composite = cause
        .cause()
        .and_then(|source| source.downcast_ref::<GroupFailure>())
        .expect("复合根因应为 GroupFailure");
    assert_eq!(composite.failures().len(), 1, "复合根因应恰好列出 K 对");
    assert_eq!(composite.failures()[0].0, faulty.id());

    // 成功接收方各持一份复制，原始引用已释放：观察者应是最后一份。
    for member in [&healthy_a, &healthy_b] {
        for delivered in member.take_written() {
            delivered.release();
        }
    }
    assert_eq!(observer.ref_count(), 1, "原始引用应在派发后恰好释放一次");
    observer.release();
}

/// 聚合器等全体完成才收敛——先到的失败绝不触发 fail-fast。
#[test]
fn aggregator_waits_for_all_members_never_fail_fast() {
    let aggregate = GroupCompletion::new(3);
    let first = ChannelId::next();
    let second = ChannelId::next();
    let third = ChannelId::next();

    aggregate.record(
        first,
        &Outcome::Failed(CoreError::new(codes::CLOSED_CHANNEL, "先到的失败").into_shared()),
    );
    assert!(!aggregate.is_done(), "存在未完成成员时不得提前收敛");
    aggregate.record(second, &Outcome::Succeeded(()));
    assert!(!aggregate.is_done());
    aggregate.record(third, &Outcome::Cancelled);
    assert!(aggregate.is_done(), "全体完成后聚合必须收敛");

    let cause = aggregate.cause().expect("存在失败成员应以失败收敛");
    let composite = cause
        .cause()
        .and_then(|source| source.downcast_ref::<GroupFailure>())
        .expect("复合根因应为 GroupFailure");
    assert_eq!(composite.failures().len(), 2, "取消计入失败");
    assert_eq!(aggregate.success_count(), 1);
    assert_eq!(aggregate.failure_count(), 2);
}

/// 空匹配的广播立即成功收敛。
#[test]
fn empty_match_resolves_immediately() {
    let group = ChannelGroup::new("empty");
    let aggregate = group.close(ChannelMatcher::servers());
    assert!(aggregate.is_done(), "空广播应立即收敛");
    assert!(aggregate.cause().is_none());
    assert_eq!(aggregate.expected(), 0);
}

/// void 广播：完全跳过聚合器构造，消息仍按接收方各持一份。
#[test]
fn void_broadcast_skips_aggregation_and_still_duplicates() {
    let group = ChannelGroup::new("void");
    let member = StubChannel::connection();
    group.add(member.clone());

    let msg = Payload::text("void 样本");
    let observer = msg.retained_duplicate();
    group.write_and_flush_void(msg, ChannelMatcher::all());

    let delivered = member.take_written();
    assert_eq!(delivered.len(), 1, "成员应收到一份复制");
    for item in delivered {
        item.release();
    }
    assert_eq!(observer.ref_count(), 1, "原始引用应恰好释放一次");
    observer.release();
}

/// 匹配谓词按形态筛选广播对象。
#[test]
fn matchers_select_members_by_flavor() {
    let group = ChannelGroup::new("matcher");
    let listener = StubChannel::server();
    let connection = StubChannel::connection();
    group.add(listener.clone());
    group.add(connection.clone());

    let aggregate = group.close(ChannelMatcher::non_servers());
    aggregate.completion().wait();
    assert!(!connection.is_open(), "连接形态成员应被关闭");
    assert!(listener.is_open(), "监听形态成员不应被波及");
    listener.close().wait();
}

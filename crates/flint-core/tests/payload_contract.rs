//! `payload_contract` 集成测试：聚焦负载的显式引用计数纪律。
//!
//! # 测试总览（Why）
//! - retain/release/retained_duplicate 构成跨通道消息的生命周期契约；
//! - 重复释放与复活已死对象都属调用方错误，必须在调用点立即失败；
//! - 计数账本由全部视图共享，广播复制（按接收方各持一份）依赖这一点。

use bytes::Bytes;
use flint_core::payload::Payload;

/// 创建即计数 1；retain 与 release 对称推进计数。
#[test]
fn retain_release_moves_count_symmetrically() {
    let payload = Payload::text("计数样本");
    assert_eq!(payload.ref_count(), 1);
    payload.retain();
    payload.retain();
    assert_eq!(payload.ref_count(), 3);
    assert!(!payload.release(), "计数未归零时 release 返回 false");
    assert!(!payload.release());
    assert!(payload.release(), "最后一次 release 应报告归零");
    assert_eq!(payload.ref_count(), 0);
}

/// `retained_duplicate` 共享同一账本：任一视图的操作对所有视图可见。
#[test]
fn retained_duplicate_shares_the_ledger() {
    let original = Payload::bytes(Bytes::from_static(b"shared"));
    let duplicate = original.retained_duplicate();
    assert_eq!(original.ref_count(), 2);
    assert_eq!(duplicate.ref_count(), 2, "视图应观察到同一计数");
    assert_eq!(original, duplicate, "复制视图内容应相等");
    duplicate.release();
    assert_eq!(original.ref_count(), 1);
    original.release();
    assert_eq!(duplicate.ref_count(), 0);
}

/// 文本与二进制主体的访问器形态。
#[test]
fn body_accessors_expose_content() {
    let text = Payload::text("ping");
    assert_eq!(text.as_text(), Some("ping"));
    assert_eq!(text.len(), 4);
    assert!(!text.is_empty());
    text.release();

    let binary = Payload::copy_from_slice(&[1, 2, 3]);
    assert!(binary.as_text().is_none());
    assert_eq!(binary.len(), 3);
    binary.release();
}

/// 归零后的 release 属重复释放，应在调用点立即失败。
#[test]
#[should_panic(expected = "release 不允许重复释放负载")]
fn double_release_panics_at_call_site() {
    let payload = Payload::text("双重释放");
    payload.release();
    payload.release();
}

/// 归零后的 retain 属复活已死对象，应在调用点立即失败。
#[test]
#[should_panic(expected = "retain 不允许复活已释放的负载")]
fn retain_after_zero_panics_at_call_site() {
    let payload = Payload::text("复活");
    payload.release();
    payload.retain();
}

/// `touch` 仅影响诊断信息，不改变任何可观察行为。
#[test]
fn touch_never_alters_observable_state() {
    let payload = Payload::text("触碰样本");
    payload.touch("payload_contract::touch_never_alters_observable_state");
    assert_eq!(payload.ref_count(), 1);
    assert_eq!(payload.as_text(), Some("触碰样本"));
    payload.release();
}

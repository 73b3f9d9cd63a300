//! `outbound_contract` 集成测试：聚焦出站缓冲的 FIFO 完成次序与关闭排空。
//!
//! # 测试总览（Why）
//! - “N 次写入按提交顺序完成”是传输的基础承诺，这里在缓冲层单独锁定；
//! - 关闭路径的 `fail_all` 必须逐条失败完成句柄并恰好释放一次消息；
//! - 水位簿记驱动可写性标志，形态与真实传输的背压信号一致。

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use flint_core::channel::outbound::OutboundBuffer;
use flint_core::completion::Completion;
use flint_core::configuration::ChannelOptions;
use flint_core::error::{closed_channel, codes};
use flint_core::payload::Payload;

fn buffer_with_defaults() -> OutboundBuffer {
    OutboundBuffer::new(&ChannelOptions::default())
}

/// 排空顺序与完成顺序都必须等于提交顺序。
#[test]
fn completions_resolve_in_submission_order() {
    let mut buffer = buffer_with_defaults();
    let order = Arc::new(Mutex::new(Vec::new()));
    for index in 0..5usize {
        let completion: Completion = Completion::new();
        let order = Arc::clone(&order);
        completion.on_complete(move |_| order.lock().push(index));
        buffer.push(Payload::text(format!("消息-{index}")), completion);
    }
    assert_eq!(buffer.len(), 5);
    while let Some(entry) = buffer.take_current() {
        let (msg, completion) = entry.into_parts();
        msg.release();
        completion.try_succeed(());
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4], "完成顺序应等于提交顺序");
    assert!(buffer.is_empty());
}

/// 队首游标只读暴露当前待投递消息。
#[test]
fn current_exposes_head_without_advancing() {
    let mut buffer = buffer_with_defaults();
    buffer.push(Payload::text("head"), Completion::new());
    buffer.push(Payload::text("tail"), Completion::new());
    assert_eq!(
        buffer.current().and_then(Payload::as_text),
        Some("head"),
        "游标应指向队首"
    );
    assert_eq!(buffer.len(), 2, "只读访问不得推进游标");
    while let Some(entry) = buffer.take_current() {
        let (msg, completion) = entry.into_parts();
        msg.release();
        completion.try_succeed(());
    }
}

/// `fail_all` 应逐条失败完成句柄，消息恰好释放一次。
#[test]
fn fail_all_fails_completions_and_releases_each_message_once() {
    let mut buffer = buffer_with_defaults();
    let mut observers = Vec::new();
    let mut completions = Vec::new();
    for index in 0..3usize {
        let msg = Payload::text(format!("滞留-{index}"));
        let observer = msg.retained_duplicate();
        let completion: Completion = Completion::new();
        completions.push(completion.clone());
        buffer.push(msg, completion);
        observers.push(observer);
    }
    let err = closed_channel("close").into_shared();
    buffer.fail_all(&err);
    assert!(buffer.is_empty());
    for completion in &completions {
        let cause = completion.cause().expect("滞留项应以失败收敛");
        assert_eq!(cause.code(), codes::CLOSED_CHANNEL);
    }
    for observer in observers {
        assert_eq!(
            observer.ref_count(),
            1,
            "缓冲持有的那份引用应恰好被释放一次"
        );
        observer.release();
    }
}

/// 水位簿记：越过高水位转为不可写，降回低水位恢复可写。
#[test]
fn watermark_bookkeeping_drives_writability() {
    let options = ChannelOptions::default().with_write_buffer_watermarks(8, 16);
    let mut buffer = OutboundBuffer::new(&options);
    assert!(buffer.is_writable());
    buffer.push(Payload::copy_from_slice(&[0u8; 32]), Completion::new());
    assert!(!buffer.is_writable(), "越过高水位应转为不可写");
    let entry = buffer.take_current().expect("应能取出队首项");
    let (msg, completion) = entry.into_parts();
    msg.release();
    completion.try_succeed(());
    assert!(buffer.is_writable(), "降回低水位应恢复可写");
    assert_eq!(buffer.pending_bytes(), 0);
}

proptest! {
    /// 性质：任意一批消息，完成顺序恒等于提交顺序。
    #[test]
    fn completion_order_matches_submission_for_any_batch(
        lengths in proptest::collection::vec(0usize..64, 1..24)
    ) {
        let mut buffer = buffer_with_defaults();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (index, len) in lengths.iter().enumerate() {
            let completion: Completion = Completion::new();
            let order = Arc::clone(&order);
            completion.on_complete(move |_| order.lock().push(index));
            buffer.push(Payload::copy_from_slice(&vec![0u8; *len]), completion);
        }
        while let Some(entry) = buffer.take_current() {
            let (msg, completion) = entry.into_parts();
            msg.release();
            completion.try_succeed(());
        }
        let observed = order.lock().clone();
        let expected: Vec<usize> = (0..lengths.len()).collect();
        prop_assert_eq!(observed, expected);
    }
}

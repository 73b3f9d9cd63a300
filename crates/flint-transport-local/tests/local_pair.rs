//! `local_pair` 集成测试：本地传输配对的端到端行为。
//!
//! # 测试总览（Why）
//! - 完整走一遍“绑定 → 连接 → 衍生子通道 → 双向往返”的建立路径；
//! - 锁定两条次序承诺：单通道写入按提交顺序完成、对端按发送顺序观察消息；
//! - 两条通道分属不同事件循环，验证跨循环投递不破坏上述承诺。

use std::sync::Arc;
use std::time::{Duration, Instant};

use flint_core::address::ChannelAddress;
use flint_core::channel::Channel;
use flint_core::configuration::ChannelOptions;
use flint_core::payload::Payload;
use flint_core::pipeline::NoopPipeline;
use flint_core::runtime::SingleThreadEventLoop;
use flint_core::test_stubs::RecordingPipeline;
use flint_transport_local::{LocalChannel, LocalServerChannel};
use parking_lot::Mutex;

const WAIT_BUDGET: Duration = Duration::from_secs(2);

/// 轮询等待条件成立；超出预算返回 `false`。
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_BUDGET;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

struct Pair {
    listener: Arc<LocalServerChannel>,
    client: Arc<LocalChannel>,
    child: Arc<LocalChannel>,
    client_recorder: Arc<RecordingPipeline>,
    child_recorder: Arc<RecordingPipeline>,
}

/// 建立一对已连接的本地通道（监听端与连接端分属不同循环）。
fn establish_pair(address: &str) -> Pair {
    let server_loop = SingleThreadEventLoop::new(format!("{address}-server"));
    let client_loop = SingleThreadEventLoop::new(format!("{address}-client"));

    let listener = LocalServerChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    let child_recorder = RecordingPipeline::shared();
    {
        let recorder = Arc::clone(&child_recorder);
        listener.set_child_pipeline_factory(move || recorder.clone() as _);
    }
    listener.register(server_loop).wait();
    let bound = listener.bind(ChannelAddress::named(address));
    bound.wait();
    assert!(bound.is_succeeded(), "监听端绑定应成功");

    let client_recorder = RecordingPipeline::shared();
    let client = LocalChannel::new(
        Arc::clone(&client_recorder) as _,
        ChannelOptions::default(),
    );
    client.register(client_loop).wait();
    let connected = client.connect(ChannelAddress::named(address));
    connected.wait();
    assert!(connected.is_succeeded(), "连接建立应成功");

    let child = {
        let mut accepted = None;
        assert!(
            wait_until(|| {
                if accepted.is_none() {
                    accepted = listener.try_accept();
                }
                accepted.is_some()
            }),
            "监听端应衍生出子通道"
        );
        accepted.expect("上方已断言衍生成功")
    };
    assert!(wait_until(|| child.is_active()), "子通道应进入激活态");
    assert!(wait_until(|| client.is_active()), "连接端应进入激活态");

    Pair {
        listener,
        client,
        child,
        client_recorder,
        child_recorder,
    }
}

/// 规定场景：绑定 test-1，连接、衍生、ping/pong 双向往返。
#[test]
fn bind_connect_then_ping_pong_roundtrip() {
    let pair = establish_pair("test-1");

    assert_eq!(
        pair.client.remote_address(),
        Some(ChannelAddress::named("test-1")),
        "连接端远端地址应为监听地址"
    );
    assert!(pair.child_recorder.saw_active(), "子通道链应观察到激活事件");
    assert!(
        pair.client_recorder.saw_active(),
        "连接端链应观察到激活事件"
    );
    assert_eq!(
        pair.child.parent().map(|parent| parent.id()),
        Some(pair.listener.id()),
        "子通道应持有父引用"
    );

    let ping = pair.client.write_and_flush(Payload::text("ping"));
    ping.wait();
    assert!(ping.is_succeeded(), "ping 写入应成功");
    assert!(
        wait_until(|| pair.child_recorder.message_count() > 0),
        "子通道应收到 ping"
    );
    let received = pair.child_recorder.take_message().expect("应有 ping 消息");
    assert_eq!(received.as_text(), Some("ping"));
    received.release();

    let pong = pair.child.write_and_flush(Payload::text("pong"));
    pong.wait();
    assert!(pong.is_succeeded(), "pong 写入应成功");
    assert!(
        wait_until(|| pair.client_recorder.message_count() > 0),
        "连接端应收到 pong"
    );
    let received = pair.client_recorder.take_message().expect("应有 pong 消息");
    assert_eq!(received.as_text(), Some("pong"));
    received.release();

    pair.client.close().wait();
    assert!(wait_until(|| !pair.child.is_open()), "对端应随之关闭");
    pair.listener.close().wait();
}

/// 次序承诺：一次冲刷前的三次写入按提交顺序完成，且对端按发送顺序观察。
#[test]
fn writes_complete_and_arrive_in_submission_order() {
    let pair = establish_pair("test-order");

    let completion_order = Arc::new(Mutex::new(Vec::new()));
    let mut completions = Vec::new();
    for (index, body) in ["m1", "m2", "m3"].into_iter().enumerate() {
        let completion = pair.client.write(Payload::text(body));
        let order = Arc::clone(&completion_order);
        completion.on_complete(move |_| order.lock().push(index));
        completions.push(completion);
    }
    pair.client.flush();
    for completion in &completions {
        completion.wait();
        assert!(completion.is_succeeded(), "冲刷后写入应逐项成功");
    }
    assert_eq!(
        *completion_order.lock(),
        vec![0, 1, 2],
        "完成顺序必须等于提交顺序"
    );

    assert!(
        wait_until(|| pair.child_recorder.message_count() >= 3),
        "对端应收到全部三条消息"
    );
    let arrived: Vec<_> = pair.child_recorder.take_messages();
    let texts: Vec<_> = arrived
        .iter()
        .map(|msg| msg.as_text().expect("消息应为文本").to_string())
        .collect();
    assert_eq!(texts, vec!["m1", "m2", "m3"], "到达顺序必须等于发送顺序");
    for msg in arrived {
        msg.release();
    }

    pair.client.close().wait();
    pair.listener.close().wait();
}

/// 往返不受批次上限阻塞：超过单批条数的消息也会全部送达。
#[test]
fn bursty_traffic_drains_across_read_batches() {
    let pair = establish_pair("test-burst");
    let total = 40usize;
    for index in 0..total {
        let completion = pair.client.write(Payload::text(format!("burst-{index}")));
        drop(completion);
    }
    pair.client.flush();
    assert!(
        wait_until(|| pair.child_recorder.message_count() >= total),
        "超过单批上限的消息应分批全部送达"
    );
    let arrived = pair.child_recorder.take_messages();
    assert_eq!(arrived.len(), total);
    for (index, msg) in arrived.iter().enumerate() {
        assert_eq!(
            msg.as_text(),
            Some(format!("burst-{index}").as_str()),
            "分批排空不得乱序"
        );
    }
    for msg in arrived {
        msg.release();
    }
    pair.client.close().wait();
    pair.listener.close().wait();
}

/// 同一循环上的配对同样成立（监听端缺省把子通道注册到自己的循环）。
#[test]
fn same_loop_pair_roundtrip() {
    let shared_loop = SingleThreadEventLoop::new("test-same-loop");
    let listener = LocalServerChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    let child_recorder = RecordingPipeline::shared();
    {
        let recorder = Arc::clone(&child_recorder);
        listener.set_child_pipeline_factory(move || recorder.clone() as _);
    }
    listener.register(Arc::clone(&shared_loop) as _).wait();
    listener.bind(ChannelAddress::named("test-same-loop")).wait();

    let client = LocalChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    client.register(shared_loop).wait();
    let connected = client.connect(ChannelAddress::named("test-same-loop"));
    connected.wait();
    assert!(connected.is_succeeded(), "同循环连接应成功");

    let ping = client.write_and_flush(Payload::text("same-loop"));
    ping.wait();
    assert!(ping.is_succeeded());
    assert!(
        wait_until(|| child_recorder.message_count() > 0),
        "同循环配对也应完成往返"
    );
    for msg in child_recorder.take_messages() {
        msg.release();
    }
    client.close().wait();
    listener.close().wait();
}

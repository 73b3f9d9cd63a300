//! `lifecycle` 集成测试：本地通道状态机与错误面的契约。
//!
//! # 测试总览（Why）
//! - 错误只经完成句柄可见，且必须携带稳定错误码——逐一锁定拒绝路径；
//! - 关闭是吸收态且幂等：关闭后不存在任何可观察迁移；
//! - 地址注册表的占用/腾空语义决定绑定与连接的成败。

use std::sync::Arc;
use std::time::{Duration, Instant};

use flint_core::address::ChannelAddress;
use flint_core::channel::{Channel, ChannelState};
use flint_core::configuration::ChannelOptions;
use flint_core::error::codes;
use flint_core::payload::Payload;
use flint_core::pipeline::NoopPipeline;
use flint_core::runtime::SingleThreadEventLoop;
use flint_transport_local::{LocalChannel, LocalServerChannel};

const WAIT_BUDGET: Duration = Duration::from_secs(2);

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

fn new_client(event_loop: &Arc<SingleThreadEventLoop>) -> Arc<LocalChannel> {
    let channel = LocalChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    channel.register(Arc::clone(event_loop) as _).wait();
    channel
}

fn new_listener(
    event_loop: &Arc<SingleThreadEventLoop>,
    address: &str,
) -> Arc<LocalServerChannel> {
    let listener = LocalServerChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    listener.register(Arc::clone(event_loop) as _).wait();
    let bound = listener.bind(ChannelAddress::named(address));
    bound.wait();
    assert!(bound.is_succeeded(), "监听端绑定应成功");
    listener
}

/// 目标地址上没有监听通道：连接拒绝。
#[test]
fn connect_to_unbound_address_is_refused() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-refused");
    let client = new_client(&event_loop);
    let connected = client.connect(ChannelAddress::named("lifecycle-nobody"));
    connected.wait();
    let cause = connected.cause().expect("连接应失败");
    assert_eq!(cause.code(), codes::CONNECTION_REFUSED);
    client.close().wait();
}

/// 同名地址的二次绑定：地址占用。
#[test]
fn second_bind_on_same_address_fails_with_address_in_use() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-addr");
    let first = new_listener(&event_loop, "lifecycle-occupied");
    let second = LocalServerChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    second.register(Arc::clone(&event_loop) as _).wait();
    let bound = second.bind(ChannelAddress::named("lifecycle-occupied"));
    bound.wait();
    let cause = bound.cause().expect("占用地址的绑定应失败");
    assert_eq!(cause.code(), codes::ADDRESS_IN_USE);

    // 首个监听端关闭后地址腾空，重绑应成功。
    first.close().wait();
    let rebound = second.bind(ChannelAddress::named("lifecycle-occupied"));
    rebound.wait();
    assert!(rebound.is_succeeded(), "地址腾空后的重绑应成功");
    second.close().wait();
}

/// 已绑定通道的重复绑定：already_bound。
#[test]
fn rebinding_a_bound_channel_fails() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-rebind");
    let listener = new_listener(&event_loop, "lifecycle-rebind");
    let again = listener.bind(ChannelAddress::named("lifecycle-rebind-2"));
    again.wait();
    let cause = again.cause().expect("重复绑定应失败");
    assert_eq!(cause.code(), codes::ALREADY_BOUND);
    listener.close().wait();
}

/// 已连接通道的再次连接：already_connected。
#[test]
fn second_connect_after_establishment_fails() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-reconnect");
    let listener = new_listener(&event_loop, "lifecycle-reconnect");
    let client = new_client(&event_loop);
    let connected = client.connect(ChannelAddress::named("lifecycle-reconnect"));
    connected.wait();
    assert!(connected.is_succeeded());
    assert!(wait_until(|| client.is_active()));

    let again = client.connect(ChannelAddress::named("lifecycle-reconnect"));
    again.wait();
    let cause = again.cause().expect("重复连接应失败");
    assert_eq!(cause.code(), codes::ALREADY_CONNECTED);

    client.close().wait();
    listener.close().wait();
}

/// 注册前的操作被同步拒绝；本地传输拒绝 Embedded 占位地址。
#[test]
fn preconditions_fail_synchronously() {
    let channel = LocalChannel::new(Arc::new(NoopPipeline), ChannelOptions::default());
    let bound = channel.bind(ChannelAddress::named("lifecycle-early"));
    assert_eq!(
        bound.cause().expect("未注册的绑定应失败").code(),
        codes::NOT_YET_CONNECTED
    );
    let written = channel.write(Payload::text("过早写入"));
    assert_eq!(
        written.cause().expect("未注册的写入应失败").code(),
        codes::NOT_YET_CONNECTED
    );

    let event_loop = SingleThreadEventLoop::new("lifecycle-embedded-addr");
    let registered = new_client(&event_loop);
    let connected = registered.connect(ChannelAddress::Embedded);
    assert_eq!(
        connected.cause().expect("占位地址应被拒绝").code(),
        codes::UNSUPPORTED_ADDRESS
    );
    registered.close().wait();
    channel.close().wait();
}

/// 关闭吸收且幂等：关闭后状态永久为 Closed，写入以 closed_channel 失败。
#[test]
fn close_is_terminal_and_idempotent() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-close");
    let listener = new_listener(&event_loop, "lifecycle-close");
    let client = new_client(&event_loop);
    client.connect(ChannelAddress::named("lifecycle-close")).wait();
    assert!(wait_until(|| client.is_active()));

    let first_close = client.close();
    first_close.wait();
    assert!(first_close.is_succeeded());
    assert!(!client.is_open());
    assert!(!client.is_active());
    assert_eq!(client.state(), ChannelState::Closed);

    // 幂等：重复关闭共享同一完成句柄，立即可见已收敛。
    let second_close = client.close();
    assert!(second_close.is_done(), "重复关闭应立即观察到已收敛");

    let written = client.write_and_flush(Payload::text("死后写入"));
    written.wait();
    assert_eq!(
        written.cause().expect("关闭后的写入应失败").code(),
        codes::CLOSED_CHANNEL
    );
    assert_eq!(client.state(), ChannelState::Closed, "关闭后不存在任何迁移");

    listener.close().wait();
}

/// 一端关闭后，对端异步观察到关闭并释放缓冲。
#[test]
fn closing_one_side_tears_down_the_peer() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-peer");
    let listener = new_listener(&event_loop, "lifecycle-peer");
    let client = new_client(&event_loop);
    client.connect(ChannelAddress::named("lifecycle-peer")).wait();
    let child = {
        let mut accepted = None;
        assert!(wait_until(|| {
            if accepted.is_none() {
                accepted = listener.try_accept();
            }
            accepted.is_some()
        }));
        accepted.expect("上方已断言衍生成功")
    };
    assert!(wait_until(|| child.is_active()));

    child.close().wait();
    assert!(
        wait_until(|| !client.is_open()),
        "对端应异步观察到关闭"
    );
    let written = client.write_and_flush(Payload::text("向已关闭对端写入"));
    written.wait();
    assert_eq!(
        written.cause().expect("写入应失败").code(),
        codes::CLOSED_CHANNEL
    );
    listener.close().wait();
}

/// 连接端地址形态：未显式绑定时自动生成临时地址，远端为监听地址。
#[test]
fn ephemeral_local_address_is_generated_on_connect() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-ephemeral");
    let listener = new_listener(&event_loop, "lifecycle-ephemeral");
    let client = new_client(&event_loop);
    client
        .connect(ChannelAddress::named("lifecycle-ephemeral"))
        .wait();
    assert!(wait_until(|| client.is_active()));

    let local = client.local_address().expect("连接后应有本地地址");
    assert!(
        local.to_string().starts_with("local:E"),
        "未显式绑定的连接端应持有自动生成地址，实际为 {local}"
    );
    assert_eq!(
        client.remote_address(),
        Some(ChannelAddress::named("lifecycle-ephemeral"))
    );

    client.close().wait();
    listener.close().wait();
}

/// 连接时限与建立的竞争由“先写者胜”裁决：建立成功后时限任务退化为无操作。
#[test]
fn connect_timeout_is_noop_after_successful_establishment() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-timeout");
    let listener = new_listener(&event_loop, "lifecycle-timeout");
    let options = ChannelOptions::default().with_connect_timeout(Duration::from_millis(20));
    let client = LocalChannel::new(Arc::new(NoopPipeline), options);
    client.register(Arc::clone(&event_loop) as _).wait();
    let connected = client.connect(ChannelAddress::named("lifecycle-timeout"));
    connected.wait();
    assert!(connected.is_succeeded(), "本地建立应在时限内完成");
    assert!(wait_until(|| client.is_active()));

    // 让时限任务到期触发：已收敛的完成句柄不接受后到的失败写入。
    std::thread::sleep(Duration::from_millis(50));
    assert!(client.is_open(), "到期的时限任务不得影响已建立的连接");
    assert!(client.is_active());

    client.close().wait();
    listener.close().wait();
}

/// 注销把通道标记为脱离循环，完成句柄正常收敛。
#[test]
fn deregister_detaches_from_the_loop() {
    let event_loop = SingleThreadEventLoop::new("lifecycle-deregister");
    let client = new_client(&event_loop);
    assert!(wait_until(|| client.is_registered()));
    let deregistered = client.deregister();
    deregistered.wait();
    assert!(deregistered.is_succeeded());
    assert!(wait_until(|| !client.is_registered()));
    client.close().wait();
}

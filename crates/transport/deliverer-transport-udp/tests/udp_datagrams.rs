//! UDP 端到端测试：发送端与接收端经回环地址交换报文。
//!
//! # 教案式说明
//! - **Why**：UDP 的报文边界即帧边界，配合 `NoDivisionRule` 时 Manager 应一报文一事件；
//! - **How**：独立多线程运行时承载 I/O，测试线程用事件记录器阻塞等待；
//! - **What**：断言帧内容、来源身份、生命周期事件与错误分类。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use deliverer_core::error::codes;
use deliverer_core::testing::EventRecorder;
use deliverer_core::{
    DelivererError, Manager, ManagerBuilder, ManagerConfig, NoDivisionRule, Protocol,
    ProtocolEvent, ProtocolState, Utf8StringBox,
};
use deliverer_transport_udp::{
    UdpReceiverConfig, UdpReceiverProtocol, UdpSenderConfig, UdpSenderProtocol,
};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

const WAIT: Duration = Duration::from_secs(5);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime")
}

fn loopback_any() -> SocketAddr {
    "127.0.0.1:0".parse().expect("addr")
}

fn text_manager() -> Manager<String> {
    ManagerBuilder::new()
        .config(ManagerConfig::direct())
        .build_with_box(Arc::new(Utf8StringBox))
        .expect("build")
}

/// 每个报文成为一条 `ReceiveData`，来源为接收端自身身份。
#[test]
fn datagrams_arrive_as_individual_frames() {
    let rt = runtime();
    let receiver_manager = text_manager();
    let events = EventRecorder::new();
    events.attach(&receiver_manager);
    let receiver = Arc::new(UdpReceiverProtocol::with_runtime(
        UdpReceiverConfig::new(loopback_any()),
        rt.handle().clone(),
    ));
    receiver_manager
        .start(receiver.clone(), Box::new(NoDivisionRule::new()), None)
        .expect("receiver start");
    assert_eq!(receiver.state(), ProtocolState::Listening);
    let target = receiver.local_addr().expect("bound");

    let sender_manager = text_manager();
    let sender_events = EventRecorder::new();
    sender_events.attach(&sender_manager);
    let sender = Arc::new(UdpSenderProtocol::with_runtime(
        UdpSenderConfig::new(target),
        rt.handle().clone(),
    ));
    sender_manager
        .start(sender.clone(), Box::new(NoDivisionRule::new()), None)
        .expect("sender start");
    assert_eq!(sender_events.connected(), vec![sender.id()]);

    sender_manager.send(&"first".to_owned()).expect("send");
    sender_manager.send(&"second".to_owned()).expect("send");

    assert!(events.wait_for(2, WAIT), "接收端未收到两个报文");
    assert_eq!(
        events.received(),
        vec![
            (receiver.id(), "first".to_owned()),
            (receiver.id(), "second".to_owned()),
        ]
    );
    assert!(events.connected().is_empty(), "接收端不上报 Connected");
}

/// 接收端不能发送；发送端超长报文同步失败。
#[test]
fn send_errors_are_classified() {
    let rt = runtime();
    let receiver_manager = text_manager();
    let receiver = Arc::new(UdpReceiverProtocol::with_runtime(
        UdpReceiverConfig::new(loopback_any()),
        rt.handle().clone(),
    ));
    receiver_manager
        .start(receiver.clone(), Box::new(NoDivisionRule::new()), None)
        .expect("start");
    assert_eq!(
        receiver_manager.send(&"reply".to_owned()),
        Err(DelivererError::NotConnected {
            protocol: receiver.id().get()
        })
    );

    let sender = UdpSenderProtocol::with_runtime(
        UdpSenderConfig::new(receiver.local_addr().expect("bound")).with_max_datagram_size(4),
        rt.handle().clone(),
    );
    sender.start().expect("start");
    let err = sender.send(b"too long").expect_err("oversized");
    assert_eq!(err.code(), codes::TRANSPORT_SEND_FAILED);
    assert!(err.to_string().contains("deliverer.transport.udp.oversized"));
    assert!(sender.send(b"ok").is_ok());
}

/// 直接订阅发送端：关闭恰好产生一次 `Disconnected`，之后发送返回 `NotConnected`。
#[test]
fn sender_close_reports_disconnect_once() {
    let rt = runtime();
    let sender = UdpSenderProtocol::with_runtime(
        UdpSenderConfig::new("127.0.0.1:9".parse().expect("addr")),
        rt.handle().clone(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    sender.subscribe(Arc::new(move |event: ProtocolEvent| sink.lock().push(event)));

    sender.start().expect("start");
    assert!(sender.local_addr().is_some());
    sender.close();
    sender.close();

    assert_eq!(
        *seen.lock(),
        vec![
            ProtocolEvent::Connected(sender.id()),
            ProtocolEvent::Disconnected(sender.id()),
        ]
    );
    assert!(matches!(
        sender.send(b"late"),
        Err(DelivererError::NotConnected { .. })
    ));
    assert!(sender.start().is_err(), "关闭后的 Protocol 不可重启");
}

/// 端口冲突在 `start` 中同步返回。
#[test]
fn receiver_bind_conflict_fails_start() {
    let rt = runtime();
    let first = UdpReceiverProtocol::with_runtime(
        UdpReceiverConfig::new(loopback_any()),
        rt.handle().clone(),
    );
    first.start().expect("start");
    let taken = first.local_addr().expect("bound");

    let second =
        UdpReceiverProtocol::with_runtime(UdpReceiverConfig::new(taken), rt.handle().clone());
    let err = second.start().expect_err("address in use");
    assert_eq!(err.code(), codes::PROTOCOL_START_FAILED);
    assert!(err.to_string().contains("deliverer.transport.udp.bind_failed"));
    assert_eq!(second.state(), ProtocolState::Unstarted, "绑定失败后可以重试");
}

/// 并发 `start` 只有一个成功，其余返回启动失败。
#[test]
fn concurrent_start_claims_receiver_once() {
    let rt = runtime();
    let receiver = Arc::new(UdpReceiverProtocol::with_runtime(
        UdpReceiverConfig::new(loopback_any()),
        rt.handle().clone(),
    ));
    let outcomes: Vec<bool> = (0..4)
        .map(|_| {
            let receiver = Arc::clone(&receiver);
            std::thread::spawn(move || receiver.start().is_ok())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(receiver.state(), ProtocolState::Listening);
    receiver.close();
}

/// 在运行时内通过 `new` 构造并启动。
#[tokio::test(flavor = "multi_thread")]
async fn construction_inside_runtime_uses_current_handle() {
    let receiver = UdpReceiverProtocol::new(UdpReceiverConfig::new(loopback_any())).expect("runtime");
    receiver.start().expect("start");
    assert!(receiver.local_addr().is_some());
    receiver.close();
    assert_eq!(receiver.state(), ProtocolState::Closed);
}

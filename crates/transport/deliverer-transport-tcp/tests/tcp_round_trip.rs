//! TCP 端到端测试：Manager + TCP Protocol 在回环地址上的完整收发。
//!
//! # 教案式说明
//! - **Why**：验证真实套接字下的建连事件、分帧、对端身份与断开通知，而不仅是回环桩；
//! - **How**：测试线程之外单独构建多线程 Tokio 运行时，Protocol 通过 `with_runtime` 绑定；
//!   测试线程可阻塞等待事件记录器；原始对端用标准库阻塞套接字模拟；
//! - **What**：断言事件序列、对端隔离与错误码。

use std::io::Write;
use std::net::{SocketAddr, TcpListener as StdListener, TcpStream as StdStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use deliverer_core::error::codes;
use deliverer_core::testing::EventRecorder;
use deliverer_core::{
    DelivererError, Manager, ManagerBuilder, ManagerConfig, ManagerEvent, Protocol, ProtocolId,
    ProtocolState, SizeBodyRule,
};
use deliverer_transport_tcp::{
    TcpClientConfig, TcpClientProtocol, TcpServerConfig, TcpServerProtocol, TcpSocketConfig,
};
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

fn manager() -> Manager {
    ManagerBuilder::new()
        .config(ManagerConfig::direct())
        .build()
        .expect("build")
}

fn start_server(rt: &Runtime, manager: &Manager) -> Arc<TcpServerProtocol> {
    let server = Arc::new(TcpServerProtocol::with_runtime(
        TcpServerConfig::new(loopback_any()),
        rt.handle().clone(),
    ));
    manager
        .start(server.clone(), Box::new(SizeBodyRule::new()), None)
        .expect("server start");
    server
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// 客户端与服务端经长度前缀分帧互发一条消息，客户端关闭后服务端观察到该对端断开。
#[test]
fn client_and_server_exchange_framed_messages() {
    let rt = runtime();
    let server_manager = manager();
    let server_events = EventRecorder::new();
    server_events.attach(&server_manager);
    let server = start_server(&rt, &server_manager);
    assert_eq!(server.state(), ProtocolState::Listening);
    let addr = server.local_addr().expect("bound");

    let client_manager = manager();
    let client_events = EventRecorder::new();
    client_events.attach(&client_manager);
    let client = Arc::new(TcpClientProtocol::with_runtime(
        TcpClientConfig::new(addr)
            .with_socket_config(TcpSocketConfig::new().with_linger(Some(Duration::from_secs(1)))),
        rt.handle().clone(),
    ));
    client_manager
        .start(client.clone(), Box::new(SizeBodyRule::new()), None)
        .expect("client start");

    assert!(client_events.wait_for(1, WAIT), "客户端未建连");
    assert_eq!(client_events.connected(), vec![client.id()]);
    assert!(server_events.wait_for(1, WAIT), "服务端未接入对端");
    let peer = server_events.connected()[0];
    assert_ne!(peer, server.id());
    assert_eq!(server.peers(), vec![peer]);

    client_manager
        .send_packet(&Bytes::from_static(b"hello"))
        .expect("client send");
    assert!(server_events.wait_for(2, WAIT));
    assert_eq!(
        server_events.received(),
        vec![(peer, Bytes::from_static(b"hello"))]
    );

    server_manager
        .send_packet_to(&Bytes::from_static(b"welcome"), peer)
        .expect("server reply");
    assert!(client_events.wait_for(2, WAIT));
    assert_eq!(
        client_events.received(),
        vec![(client.id(), Bytes::from_static(b"welcome"))]
    );

    client_manager.close();
    assert_eq!(client.state(), ProtocolState::Closed);
    assert!(server_events.wait_for(3, WAIT), "服务端未观察到对端断开");
    assert_eq!(server_events.disconnected(), vec![peer]);
    assert!(wait_until(|| server.peers().is_empty()));
    assert_eq!(
        client_events.disconnected(),
        Vec::<ProtocolId>::new(),
        "显式关闭不产生 Disconnected"
    );
}

/// 两个对端交错发送半帧，服务端按对端身份分别拼帧，不会串流。
#[test]
fn interleaved_peers_keep_separate_residues() {
    let rt = runtime();
    let server_manager = manager();
    let events = EventRecorder::new();
    events.attach(&server_manager);
    let server = start_server(&rt, &server_manager);
    let addr = server.local_addr().expect("bound");

    let mut first = StdStream::connect(addr).expect("connect first");
    assert!(events.wait_for(1, WAIT));
    let mut second = StdStream::connect(addr).expect("connect second");
    assert!(events.wait_for(2, WAIT));

    let first_addr = first.local_addr().expect("addr");
    let peers = server.peers();
    assert_eq!(peers.len(), 2);
    let first_peer = peers
        .iter()
        .copied()
        .find(|peer| server.peer_addr(*peer) == Some(first_addr))
        .expect("first peer registered");
    let second_peer = peers
        .iter()
        .copied()
        .find(|peer| *peer != first_peer)
        .expect("second peer registered");

    first.write_all(&[0, 0, 0, 2, b'a']).expect("write");
    second.write_all(&[0, 0, 0, 2, b'x']).expect("write");
    thread::sleep(Duration::from_millis(50));
    first.write_all(b"b").expect("write");
    second.write_all(b"y").expect("write");

    assert!(events.wait_for(4, WAIT), "未收齐两帧");
    let mut received = events.received();
    received.sort_by_key(|(peer, _)| *peer);
    let mut expected = vec![
        (first_peer, Bytes::from_static(b"ab")),
        (second_peer, Bytes::from_static(b"xy")),
    ];
    expected.sort_by_key(|(peer, _)| *peer);
    assert_eq!(received, expected);

    drop(first);
    assert!(events.wait_for(5, WAIT));
    assert_eq!(events.disconnected(), vec![first_peer]);
    assert!(server_manager.send(&Bytes::from_static(b"\0\0\0\0")).is_ok(), "仍可广播给剩余对端");
}

/// 一个对端发送超限帧导致服务端关闭时，每个已接入的对端都收到一次 `Disconnected`。
#[test]
fn oversized_frame_from_one_peer_disconnects_every_peer() {
    let rt = runtime();
    let server_manager = manager();
    let events = EventRecorder::new();
    events.attach(&server_manager);
    let server = Arc::new(TcpServerProtocol::with_runtime(
        TcpServerConfig::new(loopback_any()),
        rt.handle().clone(),
    ));
    server_manager
        .start(
            server.clone(),
            Box::new(SizeBodyRule::new().with_max_frame_size(8)),
            None,
        )
        .expect("server start");
    let addr = server.local_addr().expect("bound");

    let _quiet = StdStream::connect(addr).expect("connect first");
    assert!(events.wait_for(1, WAIT));
    let mut noisy = StdStream::connect(addr).expect("connect second");
    assert!(events.wait_for(2, WAIT));
    let mut connected = events.connected();
    assert_eq!(connected.len(), 2);

    noisy
        .write_all(&[0, 0, 0, 100, 1, 2, 3, 4, 5])
        .expect("write");

    assert!(events.wait_for(4, WAIT), "未对全部对端补发断开");
    thread::sleep(Duration::from_millis(50));
    let mut disconnected = events.disconnected();
    connected.sort();
    disconnected.sort();
    assert_eq!(disconnected, connected);
    assert_eq!(server.state(), ProtocolState::Closed);
    assert!(!server_manager.is_started());
}

/// 服务端无对端时发送返回 `NotConnected`，未知对端返回 `UnknownTarget`。
#[test]
fn server_send_without_peers_is_rejected() {
    let rt = runtime();
    let server_manager = manager();
    let server = start_server(&rt, &server_manager);

    let err = server_manager
        .send(&Bytes::from_static(b"x"))
        .expect_err("no peers");
    assert_eq!(
        err,
        DelivererError::NotConnected {
            protocol: server.id().get()
        }
    );

    let stranger = ProtocolId::next();
    let err = server_manager
        .send_to(&Bytes::from_static(b"x"), stranger)
        .expect_err("unknown peer");
    assert_eq!(
        err,
        DelivererError::UnknownTarget {
            target: stranger.get()
        }
    );
}

/// 端口已被监听时 `start` 同步失败，Manager 回到未启动状态。
#[test]
fn bind_conflict_fails_start() {
    let rt = runtime();
    let holder = manager();
    let first = start_server(&rt, &holder);
    let taken = first.local_addr().expect("bound");

    let contender = manager();
    let second = Arc::new(TcpServerProtocol::with_runtime(
        TcpServerConfig::new(taken),
        rt.handle().clone(),
    ));
    let err = contender
        .start(second.clone(), Box::new(SizeBodyRule::new()), None)
        .expect_err("address in use");
    assert_eq!(err.code(), codes::PROTOCOL_START_FAILED);
    assert!(err.to_string().contains("deliverer.transport.tcp.bind_failed"));
    assert!(!contender.is_started());
    assert_eq!(second.state(), ProtocolState::Closed);
}

/// 未开启自动重连时建连失败进入 `Closed`，且不产生任何事件。
#[test]
fn refused_connection_closes_client_without_events() {
    let rt = runtime();
    let unused = {
        let scratch = StdListener::bind(loopback_any()).expect("scratch listener");
        scratch.local_addr().expect("addr")
    };

    let client_manager = manager();
    let events = EventRecorder::new();
    events.attach(&client_manager);
    let client = Arc::new(TcpClientProtocol::with_runtime(
        TcpClientConfig::new(unused),
        rt.handle().clone(),
    ));
    client_manager
        .start(client.clone(), Box::new(SizeBodyRule::new()), None)
        .expect("start is asynchronous");

    assert!(wait_until(|| client.state() == ProtocolState::Closed));
    assert!(events.is_empty());
    assert!(matches!(
        client_manager.send(&Bytes::from_static(b"x")),
        Err(DelivererError::NotConnected { .. })
    ));
}

/// 开启自动重连后，服务端断开连接会表现为 `Disconnected → Connected`。
#[test]
fn client_reconnects_after_link_loss() {
    let rt = runtime();
    let listener = StdListener::bind(loopback_any()).expect("bind");
    let addr = listener.local_addr().expect("addr");

    let client_manager = manager();
    let events = EventRecorder::new();
    events.attach(&client_manager);
    let client = Arc::new(TcpClientProtocol::with_runtime(
        TcpClientConfig::new(addr).with_auto_reconnect(Duration::from_millis(20)),
        rt.handle().clone(),
    ));
    client_manager
        .start(client.clone(), Box::new(SizeBodyRule::new()), None)
        .expect("start");

    let (first, _) = listener.accept().expect("first accept");
    assert!(events.wait_for(1, WAIT));
    drop(first);
    let (_second, _) = listener.accept().expect("second accept");
    assert!(events.wait_for(3, WAIT), "未重新建连");

    let id = client.id();
    assert_eq!(
        events.events(),
        vec![
            ManagerEvent::Connected(id),
            ManagerEvent::Disconnected(id),
            ManagerEvent::Connected(id),
        ]
    );
    assert_eq!(client.state(), ProtocolState::Connected);
    client_manager.close();
    assert_eq!(client.state(), ProtocolState::Closed);
}

/// 运行时外构造 Protocol 返回启动错误。
#[test]
fn construction_outside_runtime_is_rejected() {
    let err = match TcpClientProtocol::new(TcpClientConfig::new(loopback_any())) {
        Ok(_) => panic!("no runtime on this thread"),
        Err(err) => err,
    };
    assert_eq!(err.code(), codes::PROTOCOL_START_FAILED);
    assert!(err.to_string().contains("runtime"));
}

/// 在运行时内构造的客户端未连上之前发送返回 `NotConnected`。
#[tokio::test(flavor = "multi_thread")]
async fn client_send_before_connect_is_not_connected() {
    let client = TcpClientProtocol::new(TcpClientConfig::new(loopback_any())).expect("runtime");
    assert_eq!(client.state(), ProtocolState::Unstarted);
    assert_eq!(
        client.send(b"early"),
        Err(DelivererError::NotConnected {
            protocol: client.id().get()
        })
    );
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use deliverer_core::{
    DelivererError, EventSink, Protocol, ProtocolEvent, ProtocolId, ProtocolState, Result,
    SinkSlot, StateCell,
};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::TcpServerConfig;
use crate::error::{self, ACCEPT, BIND, CONFIGURE, map_io_error};
use crate::link::{self, Link};

/// accept 失败后的退避时长，避免文件描述符耗尽时空转。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// 监听端口、接受多个对端的 TCP Protocol。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端需要同时服务多个客户端，每个接入的对端分配独立的 [`ProtocolId`]，
///   Manager 据此为每个对端维护独立的残留缓冲，使用方据此定向回复；
/// - 绑定在 `start` 中同步完成，端口占用等错误直接返回给调用方。
///
/// ## 契约（What）
/// - `start` 成功后进入 `Listening`，[`TcpServerProtocol::local_addr`] 返回实际监听地址；
/// - 每接入一个对端上报 `Connected(peer)`，其数据以 `DataReceived(peer, ..)` 上报，断开时上报 `Disconnected(peer)`；
/// - `send` 广播给全部在线对端，无对端时返回 `NotConnected`；
/// - `send_to(peer)` 只发给该对端，`send_to(self.id())` 等价于广播，未知身份返回 `UnknownTarget`；
/// - `close` 停止监听并断开全部对端，为每个对端上报一次 `Disconnected(peer)`。
///
/// ## 注意事项（Trade-offs）
/// - 对端的读任务在 `Connected(peer)` 上报之后才开始上报数据，事件顺序对每个对端成立；
/// - 不同对端之间的事件没有全序。
pub struct TcpServerProtocol {
    shared: Arc<Shared>,
}

struct Peer {
    addr: SocketAddr,
    link: Link,
    reader: AbortHandle,
}

struct Shared {
    id: ProtocolId,
    state: StateCell,
    sink: SinkSlot,
    config: TcpServerConfig,
    handle: Handle,
    local_addr: Mutex<Option<SocketAddr>>,
    acceptor: Mutex<Option<AbortHandle>>,
    peers: Mutex<HashMap<ProtocolId, Peer>>,
}

impl TcpServerProtocol {
    /// 使用当前线程所在的 Tokio 运行时构造。
    pub fn new(config: TcpServerConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(error::runtime_unavailable)?;
        Ok(Self::with_runtime(config, handle))
    }

    /// 显式指定运行时句柄构造。
    pub fn with_runtime(config: TcpServerConfig, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ProtocolId::next(),
                state: StateCell::new(),
                sink: SinkSlot::new(),
                config,
                handle,
                local_addr: Mutex::new(None),
                acceptor: Mutex::new(None),
                peers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &TcpServerConfig {
        &self.shared.config
    }

    /// 实际监听地址；`start` 之前为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// 当前在线对端，按接入顺序排列。
    pub fn peers(&self) -> Vec<ProtocolId> {
        let mut peers: Vec<_> = self.shared.peers.lock().keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    /// 对端的远端地址。
    pub fn peer_addr(&self, peer: ProtocolId) -> Option<SocketAddr> {
        self.shared.peers.lock().get(&peer).map(|entry| entry.addr)
    }

    fn bind(&self) -> Result<TcpListener> {
        let listener = std::net::TcpListener::bind(self.shared.config.bind)
            .map_err(|err| map_io_error(BIND, err))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| map_io_error(BIND, err))?;
        let _runtime = self.shared.handle.enter();
        TcpListener::from_std(listener).map_err(|err| map_io_error(BIND, err))
    }
}

impl Shared {
    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(err) = self.config.socket.apply(&stream) {
            let err = map_io_error(CONFIGURE, err);
            warn!(protocol = %self.id, peer_addr = %addr, error = %err, "rejecting tcp peer");
            return;
        }
        let peer = ProtocolId::next();
        let (link, read_half) = Link::spawn(&self.handle, peer, stream);
        let (ready, gate) = oneshot::channel::<()>();
        let shared = Arc::clone(self);
        let reader = self
            .handle
            .spawn(async move {
                if gate.await.is_err() {
                    return;
                }
                let outcome = link::read_until_closed(
                    peer,
                    read_half,
                    shared.config.read_buffer_size,
                    &shared.sink,
                )
                .await;
                link::log_read_end(peer, &outcome);
                shared.release(peer);
            })
            .abort_handle();

        self.peers.lock().insert(peer, Peer { addr, link, reader });
        if self.state.get() == ProtocolState::Closed {
            if let Some(entry) = self.peers.lock().remove(&peer) {
                entry.abort();
            }
            return;
        }
        info!(protocol = %self.id, peer = %peer, peer_addr = %addr, "tcp peer connected");
        self.sink.emit(ProtocolEvent::Connected(peer));
        let _ = ready.send(());
    }

    fn release(&self, peer: ProtocolId) {
        let removed = self.peers.lock().remove(&peer);
        if let Some(entry) = removed {
            entry.link.abort();
            info!(protocol = %self.id, peer = %peer, peer_addr = %entry.addr, "tcp peer disconnected");
            self.sink.emit(ProtocolEvent::Disconnected(peer));
        }
    }

    fn close(&self) {
        let previous = self.state.close();
        if previous == ProtocolState::Closed {
            return;
        }
        if let Some(acceptor) = self.acceptor.lock().take() {
            acceptor.abort();
        }
        let drained: Vec<(ProtocolId, Peer)> = self.peers.lock().drain().collect();
        info!(protocol = %self.id, peers = drained.len(), "tcp server closed");
        for (peer, entry) in drained {
            entry.abort();
            self.sink.emit(ProtocolEvent::Disconnected(peer));
        }
    }
}

impl Peer {
    fn abort(&self) {
        self.reader.abort();
        self.link.abort();
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => shared.admit(stream, addr),
            Err(err) => {
                if shared.state.get() == ProtocolState::Closed {
                    return;
                }
                warn!(protocol = %shared.id, code = ACCEPT.code, error = %err, "tcp accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

impl Protocol for TcpServerProtocol {
    fn id(&self) -> ProtocolId {
        self.shared.id
    }

    fn state(&self) -> ProtocolState {
        self.shared.state.get()
    }

    fn subscribe(&self, sink: EventSink) {
        self.shared.sink.install(sink);
    }

    fn unsubscribe(&self) {
        self.shared.sink.clear();
    }

    fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if !shared
            .state
            .transition_from(ProtocolState::Unstarted, ProtocolState::Connecting)
        {
            return Err(DelivererError::start_failed(format!(
                "[{}] {}: server already started",
                BIND.code, BIND.message
            )));
        }
        let bound = self.bind().and_then(|listener| {
            let local = listener
                .local_addr()
                .map_err(|err| map_io_error(BIND, err))?;
            Ok((listener, local))
        });
        let (listener, local) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                shared
                    .state
                    .transition_from(ProtocolState::Connecting, ProtocolState::Unstarted);
                return Err(err);
            }
        };
        *shared.local_addr.lock() = Some(local);
        if !shared.state.transition_unless_closed(ProtocolState::Listening) {
            return Ok(());
        }
        let acceptor = shared.handle.spawn(accept_loop(Arc::clone(shared), listener));
        *shared.acceptor.lock() = Some(acceptor.abort_handle());
        if shared.state.get() == ProtocolState::Closed {
            acceptor.abort();
        }
        info!(protocol = %shared.id, local_addr = %local, "tcp server listening");
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        let peers = self.shared.peers.lock();
        if peers.is_empty() {
            return Err(DelivererError::NotConnected {
                protocol: self.shared.id.get(),
            });
        }
        let mut delivered = 0usize;
        for (peer, entry) in peers.iter() {
            match entry.link.send(buf) {
                Ok(()) => delivered += 1,
                Err(err) => debug!(peer = %peer, error = %err, "skipping departing peer"),
            }
        }
        if delivered == 0 {
            return Err(error::writer_closed());
        }
        Ok(())
    }

    fn send_to(&self, buf: &[u8], target: ProtocolId) -> Result<()> {
        if target == self.shared.id {
            return self.send(buf);
        }
        match self.shared.peers.lock().get(&target) {
            Some(entry) => entry.link.send(buf),
            None => Err(DelivererError::UnknownTarget {
                target: target.get(),
            }),
        }
    }

    fn accepts_target(&self, target: ProtocolId) -> bool {
        target == self.shared.id || self.shared.peers.lock().contains_key(&target)
    }

    fn close(&self) {
        self.shared.close();
    }
}

impl Drop for TcpServerProtocol {
    fn drop(&mut self) {
        self.shared.close();
    }
}

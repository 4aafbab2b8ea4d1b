use std::sync::Arc;

use deliverer_core::{
    DelivererError, EventSink, Protocol, ProtocolEvent, ProtocolId, ProtocolState, Result,
    SinkSlot, StateCell,
};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::config::TcpClientConfig;
use crate::error::{self, CONFIGURE, CONNECT, map_io_error};
use crate::link::{self, Link};

/// 主动连接服务端的 TCP Protocol。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 面向“一个进程连一个服务端”的常见场景：`start` 立即返回，建连在运行时上异步完成，
///   成功后上报 `Connected(id)`；
/// - 可选的自动重连让链路抖动对使用方表现为一组 `Disconnected → Connected` 事件，而不是终止。
///
/// ## 契约（What）
/// - `start` 只能调用一次；再次调用返回 `TransportStart`；
/// - 建连失败且未开启自动重连时进入 `Closed`，不会上报 `Disconnected`（从未连上）；
/// - 连接断开：未开启重连时进入 `Closed`，开启时回到 `Connecting` 并按间隔重试；两种情况都上报 `Disconnected(id)`；
/// - `close` 幂等，取消挂起的建连与读写；若关闭前处于 `Connected`，上报一次 `Disconnected(id)`。
///
/// ## 注意事项（Trade-offs）
/// - 构造时捕获 Tokio 运行时句柄，后续 `start` 可在任意线程调用；
/// - 重连期间的发送直接返回 `NotConnected`，不做缓存。
pub struct TcpClientProtocol {
    shared: Arc<Shared>,
}

struct Shared {
    id: ProtocolId,
    state: StateCell,
    sink: SinkSlot,
    config: TcpClientConfig,
    handle: Handle,
    link: Mutex<Option<Link>>,
    driver: Mutex<Option<AbortHandle>>,
}

impl TcpClientProtocol {
    /// 使用当前线程所在的 Tokio 运行时构造。
    pub fn new(config: TcpClientConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(error::runtime_unavailable)?;
        Ok(Self::with_runtime(config, handle))
    }

    /// 显式指定运行时句柄构造。
    pub fn with_runtime(config: TcpClientConfig, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ProtocolId::next(),
                state: StateCell::new(),
                sink: SinkSlot::new(),
                config,
                handle,
                link: Mutex::new(None),
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.shared.config
    }
}

impl Shared {
    async fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(self.config.server)
            .await
            .map_err(|err| map_io_error(CONNECT, err))?;
        self.config
            .socket
            .apply(&stream)
            .map_err(|err| map_io_error(CONFIGURE, err))?;
        Ok(stream)
    }

    fn drop_link(&self) {
        if let Some(link) = self.link.lock().take() {
            link.abort();
        }
    }

    fn close(&self) {
        let previous = self.state.close();
        if previous == ProtocolState::Closed {
            return;
        }
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        self.drop_link();
        info!(protocol = %self.id, server = %self.config.server, "tcp client closed");
        if previous == ProtocolState::Connected {
            self.sink.emit(ProtocolEvent::Disconnected(self.id));
        }
    }
}

/// 建连、读泵与重连循环。
async fn drive(shared: Arc<Shared>) {
    let id = shared.id;
    loop {
        match shared.connect().await {
            Ok(stream) => {
                if !shared.state.transition_unless_closed(ProtocolState::Connected) {
                    return;
                }
                let (link, read_half) = Link::spawn(&shared.handle, id, stream);
                *shared.link.lock() = Some(link);
                if shared.state.get() == ProtocolState::Closed {
                    shared.drop_link();
                    return;
                }
                info!(protocol = %id, server = %shared.config.server, "tcp client connected");
                shared.sink.emit(ProtocolEvent::Connected(id));

                let outcome =
                    link::read_until_closed(id, read_half, shared.config.read_buffer_size, &shared.sink)
                        .await;
                link::log_read_end(id, &outcome);
                shared.drop_link();

                let next = match shared.config.reconnect_interval() {
                    Some(_) => ProtocolState::Connecting,
                    None => ProtocolState::Closed,
                };
                if !shared.state.transition_unless_closed(next) {
                    return;
                }
                shared.sink.emit(ProtocolEvent::Disconnected(id));
            }
            Err(err) => {
                warn!(protocol = %id, code = err.code(), error = %err, "tcp client connect failed");
                if shared.config.reconnect_interval().is_none() {
                    shared.state.close();
                    return;
                }
            }
        }

        match shared.config.reconnect_interval() {
            Some(interval) => tokio::time::sleep(interval).await,
            None => return,
        }
        if shared.state.get() == ProtocolState::Closed {
            return;
        }
    }
}

impl Protocol for TcpClientProtocol {
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
                "[{}] {}: client already started",
                CONNECT.code, CONNECT.message
            )));
        }
        let driver = shared.handle.spawn(drive(Arc::clone(shared)));
        *shared.driver.lock() = Some(driver.abort_handle());
        if shared.state.get() == ProtocolState::Closed {
            driver.abort();
        }
        info!(protocol = %shared.id, server = %shared.config.server, "tcp client connecting");
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        let not_connected = || DelivererError::NotConnected {
            protocol: self.shared.id.get(),
        };
        if !self.shared.state.get().is_usable() {
            return Err(not_connected());
        }
        match self.shared.link.lock().as_ref() {
            Some(link) => link.send(buf),
            None => Err(not_connected()),
        }
    }

    fn close(&self) {
        self.shared.close();
    }
}

impl Drop for TcpClientProtocol {
    fn drop(&mut self) {
        self.shared.close();
    }
}

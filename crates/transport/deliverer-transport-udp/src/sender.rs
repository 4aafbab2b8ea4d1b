use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use deliverer_core::{
    DelivererError, EventSink, Protocol, ProtocolEvent, ProtocolId, ProtocolState, Result,
    SinkSlot, StateCell,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::AbortHandle;
use tracing::info;

use crate::config::UdpSenderConfig;
use crate::error::UdpError;
use crate::socket;

/// 向固定目的地址发送报文的 UDP Protocol。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - UDP 无连接，但 Manager 以“连接”建模生命周期：绑定本地端口并关联目的地址即视为 `Connected`；
/// - 关联后的套接字只接收来自目的地址的回包，回包同样以 `DataReceived(id, ..)` 上报。
///
/// ## 契约（What）
/// - `start` 同步绑定并关联目的地址，成功后立即上报 `Connected(id)`；
/// - 每次 `send` 对应一个报文，超过 `max_datagram_size` 同步返回 `TransportSend`；
/// - `close` 幂等，若处于 `Connected` 上报一次 `Disconnected(id)`。
///
/// ## 注意事项（Trade-offs）
/// - 报文经无界队列交给写任务，`send` 成功只代表入队；网络层失败只记录日志。
pub struct UdpSenderProtocol {
    shared: Arc<Shared>,
}

struct Shared {
    id: ProtocolId,
    state: StateCell,
    sink: SinkSlot,
    config: UdpSenderConfig,
    handle: Handle,
    local_addr: Mutex<Option<SocketAddr>>,
    outbound: Mutex<Option<UnboundedSender<Bytes>>>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl UdpSenderProtocol {
    /// 使用当前线程所在的 Tokio 运行时构造。
    pub fn new(config: UdpSenderConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(UdpError::Runtime)?;
        Ok(Self::with_runtime(config, handle))
    }

    /// 显式指定运行时句柄构造。
    pub fn with_runtime(config: UdpSenderConfig, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ProtocolId::next(),
                state: StateCell::new(),
                sink: SinkSlot::new(),
                config,
                handle,
                local_addr: Mutex::new(None),
                outbound: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &UdpSenderConfig {
        &self.shared.config
    }

    /// 实际绑定的本地地址；`start` 之前为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }
}

impl Shared {
    fn release(&self) {
        self.outbound.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn close(&self) {
        let previous = self.state.close();
        if previous == ProtocolState::Closed {
            return;
        }
        self.release();
        info!(protocol = %self.id, destination = %self.config.destination, "udp sender closed");
        if previous == ProtocolState::Connected {
            self.sink.emit(ProtocolEvent::Disconnected(self.id));
        }
    }
}

impl Protocol for UdpSenderProtocol {
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
            return Err(DelivererError::start_failed("udp sender already started"));
        }
        let bound = socket::bind(
            &shared.handle,
            shared.config.local_bind(),
            Some(shared.config.destination),
        )
        .and_then(|socket| {
            let local = socket.local_addr().map_err(UdpError::LocalAddr)?;
            Ok((socket, local))
        });
        let (socket, local) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                shared
                    .state
                    .transition_from(ProtocolState::Connecting, ProtocolState::Unstarted);
                return Err(err.into());
            }
        };
        *shared.local_addr.lock() = Some(local);

        let socket = Arc::new(socket);
        let (outbound, queue) = mpsc::unbounded_channel();
        let writer = shared
            .handle
            .spawn(socket::send_loop(shared.id, Arc::clone(&socket), queue));
        let reader_shared = Arc::clone(shared);
        let reader = shared.handle.spawn(async move {
            let max = reader_shared.config.max_datagram_size;
            socket::receive_loop(reader_shared.id, socket, max, &reader_shared.sink).await;
        });
        shared
            .tasks
            .lock()
            .extend([writer.abort_handle(), reader.abort_handle()]);
        *shared.outbound.lock() = Some(outbound);

        if !shared.state.transition_unless_closed(ProtocolState::Connected) {
            shared.release();
            return Ok(());
        }
        info!(
            protocol = %shared.id,
            local_addr = %local,
            destination = %shared.config.destination,
            "udp sender ready"
        );
        shared.sink.emit(ProtocolEvent::Connected(shared.id));
        Ok(())
    }

    fn send(&self, buf: &[u8]) -> Result<()> {
        let shared = &self.shared;
        if !shared.state.get().is_usable() {
            return Err(DelivererError::NotConnected {
                protocol: shared.id.get(),
            });
        }
        let max = shared.config.max_datagram_size;
        if buf.len() > max {
            return Err(UdpError::Oversized {
                len: buf.len(),
                max,
            }
            .into());
        }
        match shared.outbound.lock().as_ref() {
            Some(outbound) => outbound
                .send(Bytes::copy_from_slice(buf))
                .map_err(|_| DelivererError::send_failed("udp sender queue is closed")),
            None => Err(DelivererError::NotConnected {
                protocol: shared.id.get(),
            }),
        }
    }

    fn close(&self) {
        self.shared.close();
    }
}

impl Drop for UdpSenderProtocol {
    fn drop(&mut self) {
        self.shared.close();
    }
}

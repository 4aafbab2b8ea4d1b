use std::net::SocketAddr;
use std::sync::Arc;

use deliverer_core::{
    DelivererError, EventSink, Protocol, ProtocolId, ProtocolState, Result, SinkSlot, StateCell,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::info;

use crate::config::UdpReceiverConfig;
use crate::error::UdpError;
use crate::socket;

/// 在本地端口上接收报文的 UDP Protocol。
///
/// 绑定成功后处于 `Listening`，不上报 `Connected`；每个报文以 `DataReceived(id, ..)` 上报，
/// 搭配 `NoDivisionRule` 即“一个报文一帧”。接收端不能发送，`send` 返回 `NotConnected`。
pub struct UdpReceiverProtocol {
    shared: Arc<Shared>,
}

struct Shared {
    id: ProtocolId,
    state: StateCell,
    sink: SinkSlot,
    config: UdpReceiverConfig,
    handle: Handle,
    local_addr: Mutex<Option<SocketAddr>>,
    pump: Mutex<Option<AbortHandle>>,
}

impl UdpReceiverProtocol {
    /// 使用当前线程所在的 Tokio 运行时构造。
    pub fn new(config: UdpReceiverConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(UdpError::Runtime)?;
        Ok(Self::with_runtime(config, handle))
    }

    /// 显式指定运行时句柄构造。
    pub fn with_runtime(config: UdpReceiverConfig, handle: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: ProtocolId::next(),
                state: StateCell::new(),
                sink: SinkSlot::new(),
                config,
                handle,
                local_addr: Mutex::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &UdpReceiverConfig {
        &self.shared.config
    }

    /// 实际绑定的本地地址；`start` 之前为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }
}

impl Shared {
    fn close(&self) {
        if self.state.close() == ProtocolState::Closed {
            return;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        info!(protocol = %self.id, bind = %self.config.bind, "udp receiver closed");
    }
}

impl Protocol for UdpReceiverProtocol {
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
            return Err(DelivererError::start_failed("udp receiver already started"));
        }
        let bound = socket::bind(&shared.handle, shared.config.bind, None).and_then(|socket| {
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
        if !shared.state.transition_unless_closed(ProtocolState::Listening) {
            return Ok(());
        }

        let socket = Arc::new(socket);
        let pump_shared = Arc::clone(shared);
        let pump = shared.handle.spawn(async move {
            let max = pump_shared.config.max_datagram_size;
            socket::receive_loop(pump_shared.id, socket, max, &pump_shared.sink).await;
        });
        *shared.pump.lock() = Some(pump.abort_handle());
        if shared.state.get() == ProtocolState::Closed {
            pump.abort();
        }
        info!(protocol = %shared.id, local_addr = %local, "udp receiver listening");
        Ok(())
    }

    fn send(&self, _buf: &[u8]) -> Result<()> {
        Err(DelivererError::NotConnected {
            protocol: self.shared.id.get(),
        })
    }

    fn close(&self) {
        self.shared.close();
    }
}

impl Drop for UdpReceiverProtocol {
    fn drop(&mut self) {
        self.shared.close();
    }
}

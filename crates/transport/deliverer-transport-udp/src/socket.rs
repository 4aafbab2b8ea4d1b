//! 套接字绑定与接收泵，发送端与接收端共用。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use deliverer_core::{ProtocolEvent, ProtocolId, SinkSlot};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace, warn};

use crate::error::UdpError;

/// 持续性接收错误之间的退避间隔。
const RECEIVE_BACKOFF: Duration = Duration::from_millis(50);

/// 同步绑定（可选关联目的地址），再注册到给定运行时。
///
/// 绑定在调用线程上完成，端口占用等错误由 `start` 直接返回。
pub(crate) fn bind(
    handle: &Handle,
    addr: SocketAddr,
    destination: Option<SocketAddr>,
) -> Result<UdpSocket, UdpError> {
    let socket = std::net::UdpSocket::bind(addr).map_err(|source| UdpError::Bind { addr, source })?;
    if let Some(destination) = destination {
        socket
            .connect(destination)
            .map_err(|source| UdpError::Connect {
                addr: destination,
                source,
            })?;
    }
    socket
        .set_nonblocking(true)
        .map_err(|source| UdpError::Bind { addr, source })?;
    let _runtime = handle.enter();
    UdpSocket::from_std(socket).map_err(|source| UdpError::Bind { addr, source })
}

/// 逐个接收报文并以 `DataReceived` 上报；单次接收错误只记录日志。
pub(crate) async fn receive_loop(
    id: ProtocolId,
    socket: Arc<UdpSocket>,
    max_datagram_size: usize,
    sink: &SinkSlot,
) {
    let mut buf = vec![0u8; max_datagram_size];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                trace!(protocol = %id, from = %from, len, "udp datagram received");
                sink.emit(ProtocolEvent::DataReceived(
                    id,
                    Bytes::copy_from_slice(&buf[..len]),
                ));
            }
            Err(err) => match receive_backoff(&err) {
                None => debug!(protocol = %id, "udp destination unreachable"),
                Some(pause) => {
                    warn!(
                        protocol = %id,
                        code = "deliverer.transport.udp.receive_failed",
                        error = %err,
                        "udp receive failed"
                    );
                    tokio::time::sleep(pause).await;
                }
            },
        }
    }
}

/// 接收错误后的等待时长；目的端不可达（ICMP 回执）不需要退避。
fn receive_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => None,
        _ => Some(RECEIVE_BACKOFF),
    }
}

/// 串行写出发送队列中的报文。
pub(crate) async fn send_loop(
    id: ProtocolId,
    socket: Arc<UdpSocket>,
    mut queue: UnboundedReceiver<Bytes>,
) {
    while let Some(datagram) = queue.recv().await {
        if let Err(err) = socket.send(&datagram).await {
            let err = UdpError::Send(err);
            warn!(protocol = %id, code = err.code(), error = %err, "udp send failed");
        }
    }
}

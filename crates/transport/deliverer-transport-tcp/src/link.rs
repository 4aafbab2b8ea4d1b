//! 单条已建立 TCP 连接的读写泵。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 客户端与服务端的每条连接都需要“读泵 + 写任务”这一对后台任务，抽取到一处避免两份实现漂移；
//! - 发送路径必须非阻塞：调用方只把字节放进无界通道，由写任务在运行时上串行写出。
//!
//! ## 契约（What）
//! - [`Link::spawn`] 拆分流并启动写任务，返回的 [`Link`] 持有写通道与任务句柄；
//! - [`read_until_closed`] 持续读取并以 `DataReceived` 上报，正常 EOF 返回 `Ok(())`；
//! - `Link` 被丢弃或 [`Link::abort`] 后写任务结束，未写出的字节被丢弃。
//!
//! ## 注意事项（Trade-offs）
//! - 写通道无界：发送速度长期超过网络速度时内存会增长，使用方需自行限速。

use std::io;

use bytes::{Bytes, BytesMut};
use deliverer_core::{DelivererError, ProtocolEvent, ProtocolId, SinkSlot};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{self, WRITE};

/// 已建立连接的发送端。
#[derive(Debug)]
pub(crate) struct Link {
    writer: UnboundedSender<Bytes>,
    writer_task: AbortHandle,
}

impl Link {
    /// 拆分流、启动写任务，返回发送端与读半部。
    pub(crate) fn spawn(
        handle: &Handle,
        id: ProtocolId,
        stream: TcpStream,
    ) -> (Self, OwnedReadHalf) {
        let (read_half, write_half) = stream.into_split();
        let (writer, queue) = mpsc::unbounded_channel();
        let writer_task = handle.spawn(write_loop(id, write_half, queue)).abort_handle();
        (
            Self {
                writer,
                writer_task,
            },
            read_half,
        )
    }

    /// 把字节交给写任务。
    pub(crate) fn send(&self, buf: &[u8]) -> Result<(), DelivererError> {
        self.writer
            .send(Bytes::copy_from_slice(buf))
            .map_err(|_| error::writer_closed())
    }

    pub(crate) fn abort(&self) {
        self.writer_task.abort();
    }
}

async fn write_loop(id: ProtocolId, mut half: OwnedWriteHalf, mut queue: UnboundedReceiver<Bytes>) {
    while let Some(buf) = queue.recv().await {
        if let Err(err) = half.write_all(&buf).await {
            if error::is_peer_gone(&err) {
                debug!(protocol = %id, "peer closed while writing");
            } else {
                warn!(protocol = %id, code = WRITE.code, error = %err, "tcp write failed");
            }
            return;
        }
    }
    let _ = half.shutdown().await;
}

/// 持续读取并上报数据块，直到 EOF 或读错误。
pub(crate) async fn read_until_closed(
    id: ProtocolId,
    mut half: OwnedReadHalf,
    buffer_size: usize,
    sink: &SinkSlot,
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.reserve(buffer_size);
        let read = half.read_buf(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        let chunk = buf.split().freeze();
        sink.emit(ProtocolEvent::DataReceived(id, chunk));
    }
}

/// 把读泵的结束原因写入日志；对端正常断开只记 debug。
pub(crate) fn log_read_end(id: ProtocolId, outcome: &io::Result<()>) {
    match outcome {
        Ok(()) => debug!(protocol = %id, "peer closed the connection"),
        Err(err) if error::is_peer_gone(err) => {
            debug!(protocol = %id, error = %err, "connection reset by peer")
        }
        Err(err) => warn!(
            protocol = %id,
            code = error::READ.code,
            error = %err,
            "tcp read failed"
        ),
    }
}

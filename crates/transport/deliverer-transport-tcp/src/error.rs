use std::io;

use deliverer_core::DelivererError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const RUNTIME: OperationKind = OperationKind {
    code: "deliverer.transport.tcp.runtime_unavailable",
    message: "tcp runtime",
};

/// 将 IO 错误映射为 [`DelivererError`]。
///
/// 建连、监听与配置阶段的失败归入 `TransportStart`，读写阶段归入 `TransportSend`，
/// 文案携带操作错误码，便于日志检索。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> DelivererError {
    let detail = format!("[{}] {}: {}", kind.code, kind.message, error);
    match kind.code {
        code if code == WRITE.code || code == READ.code => DelivererError::send_failed(detail),
        _ => DelivererError::start_failed(detail),
    }
}

/// 当前线程不在 Tokio 运行时内。
pub(crate) fn runtime_unavailable(detail: impl std::fmt::Display) -> DelivererError {
    DelivererError::start_failed(format!(
        "[{}] {}: {}",
        RUNTIME.code, RUNTIME.message, detail
    ))
}

/// 写通道已关闭（连接已断开或 Protocol 已关闭）。
pub(crate) fn writer_closed() -> DelivererError {
    DelivererError::send_failed(format!(
        "[{}] {}: connection writer is gone",
        WRITE.code, WRITE.message
    ))
}

/// 判断读错误是否只是对端正常断开的不同表现。
pub(crate) fn is_peer_gone(error: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}

use bytes::{Buf, Bytes, BytesMut};

use super::{DEFAULT_MAX_FRAME_SIZE, PacketRule};
use crate::error::{DelivererError, Result};

/// 分隔符分帧：以终止符序列切分，默认 `\n`。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 返回的帧不含终止符；`make_send_packet` 负责在出站载荷末尾追加终止符；
///   - `max_frame_size` 约束整帧（内容 + 终止符）；尚未遇到终止符的残留若已达到上限，
///     就不可能再构成合法帧，立即返回 `FrameTooLarge`；
///   - 终止符可以是多字节序列（如 `\r\n`），跨数据块断开的终止符也能正确识别。
/// - **执行 (How)**：每次扫描只从上一次未匹配的位置回退 `终止符长度 - 1` 字节开始，
///   避免对同一残留重复全量扫描。
/// - **风险 (Trade-offs)**：不提供转义；载荷本身含终止符时会被切成多帧，需要二进制安全时请改用 [`super::SizeBodyRule`]。
#[derive(Clone, Debug)]
pub struct TerminateRule {
    terminator: Vec<u8>,
    max_frame_size: usize,
}

impl TerminateRule {
    /// 使用给定终止符；空终止符退化为 `\n`。
    pub fn new(terminator: impl Into<Vec<u8>>) -> Self {
        let mut terminator = terminator.into();
        if terminator.is_empty() {
            terminator.push(b'\n');
        }
        Self {
            terminator,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// 以换行符为终止符。
    pub fn newline() -> Self {
        Self::new(b"\n".to_vec())
    }

    /// 设置整帧上限；小于终止符长度时按终止符长度处理。
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.max(self.terminator.len());
        self
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    fn find_terminator(&self, haystack: &[u8], from: usize) -> Option<usize> {
        let needle = self.terminator.as_slice();
        if haystack.len() < needle.len() {
            return None;
        }
        (from..=haystack.len() - needle.len())
            .find(|&at| &haystack[at..at + needle.len()] == needle)
    }
}

impl Default for TerminateRule {
    fn default() -> Self {
        Self::newline()
    }
}

impl PacketRule for TerminateRule {
    fn name(&self) -> &'static str {
        "terminate"
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn extract_frames(&self, residue: &mut BytesMut, incoming: &[u8]) -> Result<Vec<Bytes>> {
        let rescan = (residue.len() + 1).saturating_sub(self.terminator.len());
        residue.extend_from_slice(incoming);

        let mut frames = Vec::new();
        let mut from = rescan;
        while let Some(at) = self.find_terminator(residue, from) {
            let frame_len = at + self.terminator.len();
            if frame_len > self.max_frame_size {
                return Err(DelivererError::FrameTooLarge {
                    len: frame_len,
                    max: self.max_frame_size,
                });
            }
            let frame = residue.split_to(at).freeze();
            residue.advance(self.terminator.len());
            frames.push(frame);
            from = 0;
        }

        // 残留中没有完整终止符，至少还差一个字节才能成帧。
        if residue.len() >= self.max_frame_size {
            return Err(DelivererError::FrameTooLarge {
                len: residue.len(),
                max: self.max_frame_size,
            });
        }
        Ok(frames)
    }

    fn make_send_packet(&self, payload: &[u8]) -> Result<Bytes> {
        let frame_len = payload.len() + self.terminator.len();
        if frame_len > self.max_frame_size {
            return Err(DelivererError::FrameTooLarge {
                len: frame_len,
                max: self.max_frame_size,
            });
        }
        let mut out = BytesMut::with_capacity(payload.len() + self.terminator.len());
        out.extend_from_slice(payload);
        out.extend_from_slice(&self.terminator);
        Ok(out.freeze())
    }

    fn box_clone(&self) -> Box<dyn PacketRule> {
        Box::new(self.clone())
    }
}

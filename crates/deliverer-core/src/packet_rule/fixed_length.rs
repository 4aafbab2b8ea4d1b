use bytes::{Bytes, BytesMut};

use super::{PacketRule, ensure_residue_within};
use crate::error::{DelivererError, Result};

/// 定长分帧：每帧恰好 `frame_size` 字节。
///
/// 出站载荷不足时以 `0x00` 补齐，超出时返回 `FrameTooLarge`；帧长即上限，
/// 残留始终小于一帧。
#[derive(Clone, Debug)]
pub struct FixedLengthRule {
    frame_size: usize,
}

impl FixedLengthRule {
    /// `frame_size` 为 0 时按 1 处理。
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl PacketRule for FixedLengthRule {
    fn name(&self) -> &'static str {
        "fixed_length"
    }

    fn max_frame_size(&self) -> usize {
        self.frame_size
    }

    fn extract_frames(&self, residue: &mut BytesMut, incoming: &[u8]) -> Result<Vec<Bytes>> {
        residue.extend_from_slice(incoming);
        let mut frames = Vec::with_capacity(residue.len() / self.frame_size);
        while residue.len() >= self.frame_size {
            frames.push(residue.split_to(self.frame_size).freeze());
        }
        ensure_residue_within(residue, self.frame_size)?;
        Ok(frames)
    }

    fn make_send_packet(&self, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > self.frame_size {
            return Err(DelivererError::FrameTooLarge {
                len: payload.len(),
                max: self.frame_size,
            });
        }
        let mut out = BytesMut::zeroed(self.frame_size);
        out[..payload.len()].copy_from_slice(payload);
        Ok(out.freeze())
    }

    fn box_clone(&self) -> Box<dyn PacketRule> {
        Box::new(self.clone())
    }
}

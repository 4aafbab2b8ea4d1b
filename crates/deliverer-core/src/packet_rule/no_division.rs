use bytes::{Bytes, BytesMut};

use super::{DEFAULT_MAX_FRAME_SIZE, PacketRule};
use crate::error::{DelivererError, Result};

/// 不分帧：每个非空数据块就是一帧。
///
/// 面向 UDP 等自带消息边界的传输；残留缓冲始终为空。
#[derive(Clone, Debug)]
pub struct NoDivisionRule {
    max_frame_size: usize,
}

impl NoDivisionRule {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Default for NoDivisionRule {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRule for NoDivisionRule {
    fn name(&self) -> &'static str {
        "no_division"
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn extract_frames(&self, residue: &mut BytesMut, incoming: &[u8]) -> Result<Vec<Bytes>> {
        residue.extend_from_slice(incoming);
        if residue.len() > self.max_frame_size {
            return Err(DelivererError::FrameTooLarge {
                len: residue.len(),
                max: self.max_frame_size,
            });
        }
        if residue.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![residue.split().freeze()])
    }

    fn make_send_packet(&self, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > self.max_frame_size {
            return Err(DelivererError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_size,
            });
        }
        Ok(Bytes::copy_from_slice(payload))
    }

    fn box_clone(&self) -> Box<dyn PacketRule> {
        Box::new(self.clone())
    }
}

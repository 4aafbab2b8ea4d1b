use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{DEFAULT_MAX_FRAME_SIZE, PacketRule, ensure_residue_within};
use crate::error::{DelivererError, Result};

/// 长度前缀的字节宽度。
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderWidth {
    One,
    Two,
    Four,
}

impl HeaderWidth {
    pub const fn bytes(self) -> usize {
        match self {
            HeaderWidth::One => 1,
            HeaderWidth::Two => 2,
            HeaderWidth::Four => 4,
        }
    }

    /// 该宽度可表达的最大帧体长度。
    const fn max_body(self) -> u64 {
        match self {
            HeaderWidth::One => u8::MAX as u64,
            HeaderWidth::Two => u16::MAX as u64,
            HeaderWidth::Four => u32::MAX as u64,
        }
    }
}

/// 长度前缀的字节序。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// 长度前缀分帧：`[body_len][body]`。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 帧头宽度 1/2/4 字节，大端或小端，默认 4 字节大端；
///   - 帧头只描述帧体长度，不含自身；
///   - `max_frame_size` 约束整帧（帧头 + 帧体），一旦解析出的整帧长度超限立即返回
///     `FrameTooLarge`，不会等待帧体到齐；
///   - 返回的帧只包含帧体。
/// - **执行 (How)**：循环“窥视帧头 → 校验长度 → 字节足够则 `split_to` 切出”，直到残留不足一帧。
#[derive(Clone, Debug)]
pub struct SizeBodyRule {
    width: HeaderWidth,
    endian: Endian,
    max_frame_size: usize,
}

impl SizeBodyRule {
    /// 4 字节大端帧头，上限 [`DEFAULT_MAX_FRAME_SIZE`]。
    pub fn new() -> Self {
        Self {
            width: HeaderWidth::Four,
            endian: Endian::Big,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_header_width(mut self, width: HeaderWidth) -> Self {
        self.width = width;
        self.max_frame_size = self.max_frame_size.max(width.bytes());
        self
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// 设置整帧上限；小于帧头宽度时按帧头宽度处理。
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.max(self.width.bytes());
        self
    }

    pub fn header_width(&self) -> HeaderWidth {
        self.width
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    fn peek_body_len(&self, header: &[u8]) -> u64 {
        let mut cursor = header;
        match (self.width, self.endian) {
            (HeaderWidth::One, _) => u64::from(cursor.get_u8()),
            (HeaderWidth::Two, Endian::Big) => u64::from(cursor.get_u16()),
            (HeaderWidth::Two, Endian::Little) => u64::from(cursor.get_u16_le()),
            (HeaderWidth::Four, Endian::Big) => u64::from(cursor.get_u32()),
            (HeaderWidth::Four, Endian::Little) => u64::from(cursor.get_u32_le()),
        }
    }

    fn put_body_len(&self, out: &mut BytesMut, len: usize) {
        match (self.width, self.endian) {
            (HeaderWidth::One, _) => out.put_u8(len as u8),
            (HeaderWidth::Two, Endian::Big) => out.put_u16(len as u16),
            (HeaderWidth::Two, Endian::Little) => out.put_u16_le(len as u16),
            (HeaderWidth::Four, Endian::Big) => out.put_u32(len as u32),
            (HeaderWidth::Four, Endian::Little) => out.put_u32_le(len as u32),
        }
    }
}

impl Default for SizeBodyRule {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRule for SizeBodyRule {
    fn name(&self) -> &'static str {
        "size_body"
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn extract_frames(&self, residue: &mut BytesMut, incoming: &[u8]) -> Result<Vec<Bytes>> {
        residue.extend_from_slice(incoming);
        let header_len = self.width.bytes();
        let mut frames = Vec::new();

        while residue.len() >= header_len {
            let body_len = self.peek_body_len(&residue[..header_len]);
            let frame_len = body_len.saturating_add(header_len as u64);
            if frame_len > self.max_frame_size as u64 {
                return Err(DelivererError::FrameTooLarge {
                    len: usize::try_from(frame_len).unwrap_or(usize::MAX),
                    max: self.max_frame_size,
                });
            }
            let frame_len = frame_len as usize;
            if residue.len() < frame_len {
                break;
            }
            residue.advance(header_len);
            frames.push(residue.split_to(frame_len - header_len).freeze());
        }

        ensure_residue_within(residue, self.max_frame_size)?;
        Ok(frames)
    }

    fn make_send_packet(&self, payload: &[u8]) -> Result<Bytes> {
        let header_len = self.width.bytes();
        let frame_len = payload.len() + header_len;
        if payload.len() as u64 > self.width.max_body() || frame_len > self.max_frame_size {
            return Err(DelivererError::FrameTooLarge {
                len: frame_len,
                max: self.max_frame_size,
            });
        }
        let mut out = BytesMut::with_capacity(frame_len);
        self.put_body_len(&mut out, payload.len());
        out.extend_from_slice(payload);
        Ok(out.freeze())
    }

    fn box_clone(&self) -> Box<dyn PacketRule> {
        Box::new(self.clone())
    }
}

//! PacketRule 契约：从连续字节流中恢复离散帧。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 传输层交付的数据块边界没有任何分帧语义，PacketRule 是唯一负责恢复逻辑消息的组件；
//! - 规则对象本身只携带配置，未成帧的“残留缓冲”由调用方（Manager）持有并传入，
//!   因此同一个规则实例可以同时服务多个对端。
//!
//! ## 契约（What）
//! - `extract_frames(residue, incoming)`：把 `incoming` 追加到 `residue` 末尾，尽可能多地切出完整帧，
//!   返回的帧按字节到达顺序排列，剩余字节留在 `residue` 中；
//! - **不变量**：返回后 `residue.len() <= max_frame_size()`；字节既不丢弃也不重排；
//!   任意切块方式喂入同一段字节，得到的帧序列相同（分块无关性）；
//! - 超出上限时返回 [`DelivererError::FrameTooLarge`]，此时 `residue` 的内容不再有意义，
//!   调用方应关闭连接而不是继续累积。
//!
//! ## 注意事项（Trade-offs）
//! - 帧以 [`Bytes`] 返回，通过 `split_to(..).freeze()` 与残留缓冲共享底层分配；
//! - [`NoDivisionRule`] 以数据块为帧，天然不满足分块无关性，仅用于数据报类传输。

use bytes::{Bytes, BytesMut};

use crate::error::{DelivererError, Result};

mod fixed_length;
mod no_division;
mod size_body;
mod terminate;

pub use fixed_length::FixedLengthRule;
pub use no_division::NoDivisionRule;
pub use size_body::{Endian, HeaderWidth, SizeBodyRule};
pub use terminate::TerminateRule;

/// 默认帧长上限：1 MiB。
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// 分帧策略契约。
pub trait PacketRule: Send + Sync + 'static {
    /// 规则名称，用于日志。
    fn name(&self) -> &'static str;

    /// 单帧（含帧头/分隔符）的最大字节数，同时也是残留缓冲的上限。
    fn max_frame_size(&self) -> usize;

    /// 追加新字节并切出全部完整帧。
    fn extract_frames(&self, residue: &mut BytesMut, incoming: &[u8]) -> Result<Vec<Bytes>>;

    /// 为出站载荷加上本规则的帧格式。
    fn make_send_packet(&self, payload: &[u8]) -> Result<Bytes>;

    /// 复制出一个配置相同的规则实例。
    fn box_clone(&self) -> Box<dyn PacketRule>;
}

impl Clone for Box<dyn PacketRule> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl std::fmt::Debug for dyn PacketRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRule")
            .field("name", &self.name())
            .field("max_frame_size", &self.max_frame_size())
            .finish()
    }
}

/// 残留缓冲超过上限时构造错误。
pub(crate) fn ensure_residue_within(residue: &BytesMut, max: usize) -> Result<()> {
    if residue.len() > max {
        return Err(DelivererError::FrameTooLarge {
            len: residue.len(),
            max,
        });
    }
    Ok(())
}

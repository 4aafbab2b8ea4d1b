//! DeliveryBox 契约：应用层对象与原始字节载荷之间的双向转换。
//!
//! # 教案级注释
//!
//! ## 契约（What）
//! - `serialize(&T) -> Bytes`、`deserialize(Bytes) -> T`，失败分别返回
//!   [`DelivererError::Encoding`](crate::DelivererError::Encoding) 与
//!   [`DelivererError::Decoding`](crate::DelivererError::Decoding)；
//! - **往返律**：对实现声明支持的任意 `x`，`deserialize(serialize(x)) == x`；
//! - 实现必须无状态、`Send + Sync`，同一实例可被多个 Manager 并发共享。
//!
//! ## 注意事项（Trade-offs）
//! - Manager 对 DeliveryBox 只持有 `Arc` 共享引用，不负责其生命周期；
//! - 缺省时 Manager 使用 [`PassThrough`]，字节原样进出。

use bytes::Bytes;

use crate::error::Result;

#[cfg(feature = "json")]
mod json;
mod pass_through;
mod utf8;

#[cfg(feature = "json")]
pub use json::JsonBox;
pub use pass_through::PassThrough;
pub use utf8::Utf8StringBox;

/// 序列化策略契约。
pub trait DeliveryBox<T>: Send + Sync + 'static {
    /// 对象编码为字节。
    fn serialize(&self, value: &T) -> Result<Bytes>;

    /// 字节解码为对象。
    fn deserialize(&self, frame: Bytes) -> Result<T>;
}

use bytes::Bytes;

use super::DeliveryBox;
use crate::error::{DelivererError, Result};

/// UTF-8 文本载荷。
///
/// 解码时拒绝非法 UTF-8 序列，不做替换字符降级。
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8StringBox;

impl DeliveryBox<String> for Utf8StringBox {
    fn serialize(&self, value: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn deserialize(&self, frame: Bytes) -> Result<String> {
        String::from_utf8(frame.into())
            .map_err(|err| DelivererError::decoding(format!("payload is not valid UTF-8: {err}")))
    }
}

use std::marker::PhantomData;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use super::DeliveryBox;
use crate::error::{DelivererError, Result};

/// JSON 对象载荷，基于 `serde_json`。
///
/// # 契约说明（What）
/// - `T` 需同时实现 `Serialize` 与 `DeserializeOwned`；
/// - 编码产物为紧凑 JSON（无缩进），解码失败时错误信息包含 serde 的行列定位。
pub struct JsonBox<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonBox<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonBox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonBox<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonBox")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> DeliveryBox<T> for JsonBox<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn serialize(&self, value: &T) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| DelivererError::encoding(format!("json encode: {err}")))
    }

    fn deserialize(&self, frame: Bytes) -> Result<T> {
        serde_json::from_slice(&frame)
            .map_err(|err| DelivererError::decoding(format!("json decode: {err}")))
    }
}

use bytes::Bytes;

use super::DeliveryBox;
use crate::error::Result;

/// 字节直通：载荷即原始帧。
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl DeliveryBox<Bytes> for PassThrough {
    fn serialize(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn deserialize(&self, frame: Bytes) -> Result<Bytes> {
        Ok(frame)
    }
}

impl DeliveryBox<Vec<u8>> for PassThrough {
    fn serialize(&self, value: &Vec<u8>) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value))
    }

    fn deserialize(&self, frame: Bytes) -> Result<Vec<u8>> {
        Ok(frame.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_shared_not_copied() {
        let payload = Bytes::from_static(b"\x00\xffraw");
        let encoded = DeliveryBox::<Bytes>::serialize(&PassThrough, &payload).expect("encode");
        assert_eq!(encoded.as_ptr(), payload.as_ptr());
        let decoded = DeliveryBox::<Bytes>::deserialize(&PassThrough, encoded).expect("decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn vec_payload_round_trips() {
        let payload = vec![1u8, 2, 3];
        let encoded = PassThrough.serialize(&payload).expect("encode");
        let decoded: Vec<u8> = PassThrough.deserialize(encoded).expect("decode");
        assert_eq!(decoded, payload);
    }
}

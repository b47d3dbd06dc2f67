use anyhow::{ensure, Result};
use bytes::{Buf, BufMut, Bytes};

use crate::rpc::{Deserialize, Serialize};

/// Record value prefixed by its length as `[u32 len][value]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Value(pub Bytes);

impl Value {
    // UINT32 length prefix
    pub const LEN_SIZE: usize = 4;
}

impl Serialize for Value {
    #[inline]
    fn encode_size(&self) -> usize {
        Self::LEN_SIZE + self.0.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.0.len() as u32);
        buf.put_slice(&self.0);
    }
}

impl Deserialize for Value {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure!(
            buf.remaining() >= Self::LEN_SIZE,
            "record value length needs {}B, got {}B",
            Self::LEN_SIZE,
            buf.remaining()
        );

        let len = buf.get_u32() as usize;

        ensure!(
            buf.remaining() >= len,
            "record value has {len}B, got {}B",
            buf.remaining()
        );

        Ok(Self(buf.copy_to_bytes(len)))
    }
}

/// A record as served to consumers: `[u64 offset][u32 len][value]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub value: Bytes,
}

impl Serialize for Record {
    #[inline]
    fn encode_size(&self) -> usize {
        8 + Value::LEN_SIZE + self.value.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.offset);
        buf.put_u32(self.value.len() as u32);
        buf.put_slice(&self.value);
    }
}

impl Deserialize for Record {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure!(buf.remaining() >= 8, "record offset needs 8B");
        let offset = buf.get_u64();
        let Value(value) = Value::decode(buf)?;
        Ok(Self { offset, value })
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn record_wire_format() {
        let record = Record {
            offset: 7,
            value: Bytes::from_static(b"hello"),
        };

        let mut buf = BytesMut::new();
        record.encode(&mut buf);

        assert_eq!(record.encode_size(), buf.len());
        assert_eq!(
            &[0, 0, 0, 0, 0, 0, 0, 7, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'][..],
            &buf[..]
        );

        let mut bytes = buf.freeze();
        assert_eq!(record, Record::decode(&mut bytes).expect("valid record"));
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn truncated_value() {
        let mut buf = &[0, 0, 0, 10, b'a', b'b'][..];
        assert!(Value::decode(&mut buf).is_err());

        let mut buf = &[0, 0][..];
        assert!(Value::decode(&mut buf).is_err());
    }
}

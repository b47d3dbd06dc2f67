use anyhow::{bail, ensure, Result};
use bytes::{Buf, BufMut};

use crate::rpc::api::ApiKey;
use crate::rpc::error::ErrorCode;
use crate::rpc::record::Record;
use crate::rpc::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    /// The correlation id of the request this responds to
    pub correlation_id: i32,
    /// The error code, or [`ErrorCode::NONE`] if there was no error
    pub error_code: ErrorCode,
}

impl ResponseHeader {
    pub const SIZE: usize = 4 + ErrorCode::SIZE;
}

impl Serialize for ResponseHeader {
    #[inline]
    fn encode_size(&self) -> usize {
        Self::SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32(self.correlation_id);
        buf.put_i16(self.error_code as i16);
    }
}

impl Deserialize for ResponseHeader {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure!(
            buf.remaining() >= Self::SIZE,
            "response header has {}B, got {}B",
            Self::SIZE,
            buf.remaining()
        );

        let correlation_id = buf.get_i32();

        let error_code = match ErrorCode::try_from(buf.get_i16()) {
            Ok(error_code) => error_code,
            Err(code) => bail!("unknown error code {code}"),
        };

        Ok(Self {
            correlation_id,
            error_code,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Produce {
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseBody {
    Produce(Produce),
    /// Record served by both `Consume` and `ConsumeStream`
    Record(Record),
    /// Body of any response carrying an error code
    Empty,
}

impl ResponseBody {
    /// Decodes a response body for a request of given `api_key`.
    pub fn decode<B: Buf>(buf: &mut B, api_key: ApiKey, header: &ResponseHeader) -> Result<Self> {
        if !header.error_code.is_none() {
            return Ok(Self::Empty);
        }

        match api_key {
            ApiKey::Produce => {
                ensure!(buf.remaining() >= 8, "produce offset needs 8B");
                Ok(Self::Produce(Produce {
                    offset: buf.get_u64(),
                }))
            }
            ApiKey::Consume | ApiKey::ConsumeStream => Record::decode(buf).map(Self::Record),
        }
    }
}

impl Serialize for ResponseBody {
    fn encode_size(&self) -> usize {
        match self {
            Self::Produce(_) => 8,
            Self::Record(record) => record.encode_size(),
            Self::Empty => 0,
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Produce(Produce { offset }) => buf.put_u64(*offset),
            Self::Record(record) => record.encode(buf),
            Self::Empty => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseMessage {
    pub header: ResponseHeader,
    pub body: ResponseBody,
}

impl ResponseMessage {
    #[inline]
    pub fn new(correlation_id: i32, body: ResponseBody) -> Self {
        Self {
            header: ResponseHeader {
                correlation_id,
                error_code: ErrorCode::NONE,
            },
            body,
        }
    }

    #[inline]
    pub fn error(correlation_id: i32, error_code: ErrorCode) -> Self {
        Self {
            header: ResponseHeader {
                correlation_id,
                error_code,
            },
            body: ResponseBody::Empty,
        }
    }
}

impl Serialize for ResponseMessage {
    #[inline]
    fn encode_size(&self) -> usize {
        self.header.encode_size() + self.body.encode_size()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.encode(buf);
        self.body.encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;

    #[test]
    fn error_response_has_empty_body() {
        let msg = ResponseMessage::error(5, ErrorCode::OFFSET_OUT_OF_RANGE);

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);

        assert_eq!(&[0, 0, 0, 5, 0, 1][..], &buf[..]);

        let mut buf = buf.freeze();
        let header = ResponseHeader::decode(&mut buf).expect("header");
        let body = ResponseBody::decode(&mut buf, ApiKey::Consume, &header).expect("body");

        assert_eq!(msg, ResponseMessage { header, body });
    }

    #[test]
    fn record_response() {
        let msg = ResponseMessage::new(
            1,
            ResponseBody::Record(Record {
                offset: 2,
                value: Bytes::from_static(b"x"),
            }),
        );

        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(msg.encode_size(), buf.len());

        let mut buf = buf.freeze();
        let header = ResponseHeader::decode(&mut buf).expect("header");
        let body = ResponseBody::decode(&mut buf, ApiKey::ConsumeStream, &header).expect("body");

        assert_eq!(msg.body, body);
    }

    #[test]
    fn unknown_error_code() {
        let mut buf = &[0, 0, 0, 1, 0, 99][..];
        assert!(ResponseHeader::decode(&mut buf).is_err());
    }
}

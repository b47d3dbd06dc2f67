use anyhow::{ensure, Result};
use bytes::{Buf, BufMut, Bytes};

use crate::rpc::api::ApiKey;
use crate::rpc::error::{ErrorCode, RpcError};
use crate::rpc::record::Value;
use crate::rpc::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    /// An integer identifying the request type.
    pub api_key: ApiKey,

    /// A client-chosen identifier echoed back in every response to this request.
    pub correlation_id: i32,
}

impl RequestHeader {
    pub const SIZE: usize = ApiKey::SIZE + 4;

    /// Parses the header, failing with an [`RpcError`] if the API key is unknown.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure!(
            buf.remaining() >= Self::SIZE,
            "request header has {}B, got {}B",
            Self::SIZE,
            buf.remaining()
        );

        let api_key = buf.get_i16();
        let correlation_id = buf.get_i32();

        let api_key = ApiKey::try_from(api_key).map_err(|error_code| RpcError {
            error_code,
            api_key,
            correlation_id,
        })?;

        Ok(Self {
            api_key,
            correlation_id,
        })
    }

    /// An [`RpcError`] for this request with given error code.
    #[inline]
    pub fn error(&self, error_code: ErrorCode) -> RpcError {
        RpcError {
            error_code,
            api_key: self.api_key.into(),
            correlation_id: self.correlation_id,
        }
    }
}

impl Serialize for RequestHeader {
    #[inline]
    fn encode_size(&self) -> usize {
        Self::SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i16(self.api_key.into());
        buf.put_i32(self.correlation_id);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Produce {
    pub record: Bytes,
}

impl Serialize for Produce {
    #[inline]
    fn encode_size(&self) -> usize {
        Value::LEN_SIZE + self.record.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        Value(self.record.clone()).encode(buf)
    }
}

impl Deserialize for Produce {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let Value(record) = Value::decode(buf)?;
        Ok(Self { record })
    }
}

/// Body of both `Consume` and `ConsumeStream` requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Consume {
    pub offset: u64,
}

impl Serialize for Consume {
    #[inline]
    fn encode_size(&self) -> usize {
        8
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64(self.offset);
    }
}

impl Deserialize for Consume {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        ensure!(
            buf.remaining() >= 8,
            "consume offset needs 8B, got {}B",
            buf.remaining()
        );
        Ok(Self {
            offset: buf.get_u64(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    Produce(Produce),
    Consume(Consume),
    ConsumeStream(Consume),
}

impl RequestBody {
    /// Decodes a body of the API identified by `header`, consuming all of `buf`.
    ///
    /// Any malformed content is reported as an `INVALID_REQUEST` [`RpcError`].
    pub fn decode<B: Buf>(buf: &mut B, header: &RequestHeader) -> Result<Self> {
        let body = match header.api_key {
            ApiKey::Produce => Produce::decode(buf).map(Self::Produce),
            ApiKey::Consume => Consume::decode(buf).map(Self::Consume),
            ApiKey::ConsumeStream => Consume::decode(buf).map(Self::ConsumeStream),
        };

        match body {
            Ok(body) if !buf.has_remaining() => Ok(body),
            _ => Err(header.error(ErrorCode::INVALID_REQUEST).into()),
        }
    }

    pub fn api_key(&self) -> ApiKey {
        match self {
            Self::Produce(_) => ApiKey::Produce,
            Self::Consume(_) => ApiKey::Consume,
            Self::ConsumeStream(_) => ApiKey::ConsumeStream,
        }
    }
}

impl Serialize for RequestBody {
    fn encode_size(&self) -> usize {
        match self {
            Self::Produce(body) => body.encode_size(),
            Self::Consume(body) | Self::ConsumeStream(body) => body.encode_size(),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::Produce(body) => body.encode(buf),
            Self::Consume(body) | Self::ConsumeStream(body) => body.encode(buf),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMessage {
    pub header: RequestHeader,
    pub body: RequestBody,
}

impl RequestMessage {
    pub fn new(correlation_id: i32, body: RequestBody) -> Self {
        Self {
            header: RequestHeader {
                api_key: body.api_key(),
                correlation_id,
            },
            body,
        }
    }
}

impl Serialize for RequestMessage {
    #[inline]
    fn encode_size(&self) -> usize {
        self.header.encode_size() + self.body.encode_size()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.encode(buf);
        self.body.encode(buf);
    }
}

//! Binary request/response protocol spoken over TCP.
//!
//! Every message is a frame prefixed by its size as a big-endian `i32`:
//!  - requests: `[i32 size][i16 api_key][i32 correlation_id][body]`
//!  - responses: `[i32 size][i32 correlation_id][i16 error_code][body]`
use std::io::ErrorKind;

use anyhow::{ensure, Context as _, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::io::{BufReader, BufWriter};

pub use api::ApiKey;
pub use error::{ErrorCode, RpcError};
pub use record::Record;
pub use request::{RequestBody, RequestHeader, RequestMessage};
pub use response::{ResponseBody, ResponseHeader, ResponseMessage};

pub mod api;
pub mod error;
pub mod record;
pub mod request;
pub mod response;

/// Upper bound on the size of a single frame a peer may send.
pub const MAX_MESSAGE_SIZE: i32 = 64 * 1024 * 1024;

pub trait Serialize {
    /// Number of bytes [`Serialize::encode`] writes
    fn encode_size(&self) -> usize;

    fn encode<B: BufMut>(&self, buf: &mut B);
}

pub trait Deserialize: Sized {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self>;
}

pub struct MessageReader<R> {
    inner: BufReader<R>,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    #[inline]
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Reads the next request, or returns `None` if the peer closed the connection at a message
    /// boundary.
    ///
    /// An unknown API key or a malformed body is reported as an [`RpcError`] inside the `anyhow`
    /// error so that the caller can answer it.
    pub async fn read_request(&mut self) -> Result<Option<RequestMessage>> {
        let Some(mut buf) = self.read_frame().await? else {
            return Ok(None);
        };

        let header = RequestHeader::decode(&mut buf).context("message header")?;

        let body = RequestBody::decode(&mut buf, &header)
            .with_context(|| format!("{:?} message body", header.api_key))?;

        Ok(Some(RequestMessage { header, body }))
    }

    /// Reads the next response to a request of given `api_key`.
    pub async fn read_response(&mut self, api_key: ApiKey) -> Result<Option<ResponseMessage>> {
        let Some(mut buf) = self.read_frame().await? else {
            return Ok(None);
        };

        let header = ResponseHeader::decode(&mut buf).context("message header")?;

        let body = ResponseBody::decode(&mut buf, api_key, &header)
            .with_context(|| format!("{api_key:?} message body"))?;

        ensure!(!buf.has_remaining(), "{}B left after response", buf.remaining());

        Ok(Some(ResponseMessage { header, body }))
    }

    /// Resolves once the peer either sends more data or closes its side of the connection.
    ///
    /// Buffered data is kept for the next [`MessageReader::read_request`]. Cancel safe.
    pub async fn peer_activity(&mut self) -> Result<()> {
        self.inner
            .fill_buf()
            .await
            .map(|_| ())
            .context("wait for peer")
    }

    async fn read_frame(&mut self) -> Result<Option<BytesMut>> {
        // read message size in bytes
        let size = match self.inner.read_i32().await {
            Ok(size) => size,

            // if the input ends at message boundary, return successfully without a message
            Err(e) if matches!(e.kind(), ErrorKind::UnexpectedEof) => return Ok(None),

            Err(e) => return Err(e).context("message size"),
        };

        ensure!(size > 0, "received a non-positive message size {size}");
        ensure!(
            size <= MAX_MESSAGE_SIZE,
            "message of {size}B exceeds {MAX_MESSAGE_SIZE}B"
        );

        let mut buf = BytesMut::zeroed(size as usize);

        self.inner
            .read_exact(&mut buf)
            .await
            .context("message content")?;

        Ok(Some(buf))
    }
}

pub struct MessageWriter<W> {
    inner: BufWriter<W>,
    buf: BytesMut,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    #[inline]
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
            buf: BytesMut::new(),
        }
    }

    pub async fn write_request(&mut self, msg: &RequestMessage) -> Result<()> {
        self.write_frame(msg).await.context("write request")
    }

    pub async fn write_response(&mut self, msg: &ResponseMessage) -> Result<()> {
        self.write_frame(msg).await.context("write response")
    }

    async fn write_frame(&mut self, msg: &impl Serialize) -> Result<()> {
        let size = msg.encode_size();

        self.buf.clear();
        self.buf.reserve(4 + size);
        self.buf.put_i32(i32::try_from(size).context("message size")?);
        msg.encode(&mut self.buf);

        self.inner
            .write_all(&self.buf)
            .await
            .context("message content")?;

        self.inner.flush().await.context("flush message")
    }
}

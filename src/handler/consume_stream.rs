use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task;
use tokio::time::{self, Duration};
use tracing::{debug, warn};

use crate::commit_log::CommitLog;
use crate::rpc::request::{self, RequestHeader};
use crate::rpc::response::{ResponseBody, ResponseMessage};
use crate::rpc::{ApiKey, ErrorCode, MessageReader, MessageWriter, Record};

use super::blocking;

/// How long to wait before re-reading an offset that was not yet produced.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serves records from a starting offset onwards, one response frame per record, until the client
/// closes the connection or sends another request.
///
/// Unlike the other handlers this one owns the connection for the duration of the stream, so it
/// does not implement [`Handler`](super::Handler).
pub struct ConsumeStreamHandler {
    log: Arc<dyn CommitLog>,
    poll_interval: Duration,
}

impl ConsumeStreamHandler {
    pub const API_KEY: ApiKey = ApiKey::ConsumeStream;

    #[inline]
    pub fn new(log: Arc<dyn CommitLog>) -> Self {
        Self {
            log,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[inline]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn stream<R, W>(
        &self,
        header: &RequestHeader,
        body: request::Consume,
        reader: &mut MessageReader<R>,
        writer: &mut MessageWriter<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let mut offset = body.offset;

        debug!(offset, "starting consume stream");

        loop {
            let log = Arc::clone(&self.log);

            match blocking(move || log.read(offset)).await? {
                Ok(value) => {
                    let msg = ResponseMessage::new(
                        header.correlation_id,
                        ResponseBody::Record(Record { offset, value }),
                    );

                    writer
                        .write_response(&msg)
                        .await
                        .with_context(|| format!("stream record at offset {offset}"))?;

                    offset += 1;

                    // cooperatively yield while catching up
                    task::yield_now().await;
                }

                // not produced yet, wait for it unless the client is done
                Err(err) if err.is_offset_not_found() => {
                    tokio::select! {
                        _ = time::sleep(self.poll_interval) => continue,
                        activity = reader.peer_activity() => {
                            activity?;
                            debug!(offset, "client ended consume stream");
                            break Ok(());
                        }
                    }
                }

                Err(err) => {
                    warn!(error = %err, offset, "consume stream failed");
                    let msg = ResponseMessage::error(header.correlation_id, ErrorCode::from(&err));
                    break writer.write_response(&msg).await;
                }
            }
        }
    }
}

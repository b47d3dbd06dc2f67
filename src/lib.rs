use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use handler::{ConsumeHandler, ConsumeStreamHandler, Handler as _, ProduceHandler};
use rpc::{MessageReader, MessageWriter, RequestBody, RequestMessage, ResponseMessage, RpcError};

pub use commit_log::CommitLog;
pub use error::{LogError, Result as LogResult};
pub use memory::InMemoryLog;
pub use storage::{Config, Log, SegmentConfig};

pub mod commit_log;
pub mod error;
pub mod handler;
pub mod http;
pub mod memory;
pub mod properties;
pub mod rpc;
pub mod storage;

/// Serves RPC requests from a single client connection until it closes or misbehaves.
pub async fn handle_connection<S>(conn: S, log: Arc<dyn CommitLog>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (reader, writer) = tokio::io::split(conn);

    let mut reader = MessageReader::new(reader);
    let mut writer = MessageWriter::new(writer);

    let produce = ProduceHandler::new(Arc::clone(&log));
    let consume = ConsumeHandler::new(Arc::clone(&log));
    let consume_stream = ConsumeStreamHandler::new(log);

    loop {
        let msg = reader.read_request().await.context("read request");

        let (msg, control) = match msg {
            // the client hung up at a message boundary
            Ok(None) => break Ok(()),

            // request handling
            Ok(Some(RequestMessage { header, body })) => {
                debug!(api_key = ?header.api_key, correlation_id = header.correlation_id, "handling request");

                let msg = match body {
                    RequestBody::Produce(body) => produce.handle_message(&header, body).await,
                    RequestBody::Consume(body) => consume.handle_message(&header, body).await,

                    // streams write their own responses
                    RequestBody::ConsumeStream(body) => {
                        consume_stream
                            .stream(&header, body, &mut reader, &mut writer)
                            .await
                            .context("consume stream")?;
                        continue;
                    }
                };

                (msg.context("handle message")?, ControlFlow::Continue(()))
            }

            // error handling
            Err(err) => match err.downcast::<RpcError>() {
                Ok(err) => {
                    warn!(%err, "rejecting request");
                    let msg = ResponseMessage::error(err.correlation_id, err.error_code);
                    (msg, ControlFlow::Break(()))
                }
                Err(err) => bail!(err),
            },
        };

        writer
            .write_response(&msg)
            .await
            .context("write response")?;

        if control.is_break() {
            break Ok(());
        }

        // cooperatively yield from the connection handler
        tokio::task::yield_now().await;
    }
}

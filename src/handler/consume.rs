use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::commit_log::CommitLog;
use crate::rpc::request::{self, RequestHeader};
use crate::rpc::response::{ResponseBody, ResponseMessage};
use crate::rpc::{ApiKey, ErrorCode, Record};

use super::{blocking, Handler};

pub struct ConsumeHandler {
    log: Arc<dyn CommitLog>,
}

impl ConsumeHandler {
    #[inline]
    pub fn new(log: Arc<dyn CommitLog>) -> Self {
        Self { log }
    }
}

impl Handler for ConsumeHandler {
    const API_KEY: ApiKey = ApiKey::Consume;

    type RequestBody = request::Consume;

    async fn handle_message(
        &self,
        header: &RequestHeader,
        body: Self::RequestBody,
    ) -> Result<ResponseMessage> {
        let log = Arc::clone(&self.log);
        let offset = body.offset;

        let msg = match blocking(move || log.read(offset)).await? {
            Ok(value) => ResponseMessage::new(
                header.correlation_id,
                ResponseBody::Record(Record { offset, value }),
            ),
            Err(err) if err.is_offset_not_found() => {
                debug!(offset, "consumed offset out of range");
                ResponseMessage::error(header.correlation_id, ErrorCode::OFFSET_OUT_OF_RANGE)
            }
            Err(err) => {
                warn!(error = %err, offset, "failed to consume record");
                ResponseMessage::error(header.correlation_id, ErrorCode::from(&err))
            }
        };

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::memory::InMemoryLog;

    fn header(correlation_id: i32) -> RequestHeader {
        RequestHeader {
            api_key: ConsumeHandler::API_KEY,
            correlation_id,
        }
    }

    #[tokio::test]
    async fn consume_record() {
        let log = Arc::new(InMemoryLog::new());
        log.append(b"first").expect("append record");
        log.append(b"second").expect("append record");

        let handler = ConsumeHandler::new(log);

        let msg = handler
            .handle_message(&header(1), request::Consume { offset: 1 })
            .await
            .expect("handle consume");

        let expected = ResponseMessage::new(
            1,
            ResponseBody::Record(Record {
                offset: 1,
                value: Bytes::from_static(b"second"),
            }),
        );

        assert_eq!(expected, msg);
    }

    #[tokio::test]
    async fn consume_out_of_range() {
        let handler = ConsumeHandler::new(Arc::new(InMemoryLog::new()));

        let msg = handler
            .handle_message(&header(2), request::Consume { offset: 0 })
            .await
            .expect("handle consume");

        assert_eq!(ResponseMessage::error(2, ErrorCode::OFFSET_OUT_OF_RANGE), msg);
    }
}

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::commit_log::CommitLog;
use crate::rpc::request::{self, RequestHeader};
use crate::rpc::response::{self, ResponseBody, ResponseMessage};
use crate::rpc::{ApiKey, ErrorCode};

use super::{blocking, Handler};

pub struct ProduceHandler {
    log: Arc<dyn CommitLog>,
}

impl ProduceHandler {
    #[inline]
    pub fn new(log: Arc<dyn CommitLog>) -> Self {
        Self { log }
    }
}

impl Handler for ProduceHandler {
    const API_KEY: ApiKey = ApiKey::Produce;

    type RequestBody = request::Produce;

    async fn handle_message(
        &self,
        header: &RequestHeader,
        body: Self::RequestBody,
    ) -> Result<ResponseMessage> {
        let log = Arc::clone(&self.log);
        let size = body.record.len();

        let msg = match blocking(move || log.append(&body.record)).await? {
            Ok(offset) => {
                debug!(offset, size, "produced record");
                ResponseMessage::new(
                    header.correlation_id,
                    ResponseBody::Produce(response::Produce { offset }),
                )
            }
            Err(err) => {
                warn!(error = %err, size, "failed to produce record");
                ResponseMessage::error(header.correlation_id, ErrorCode::from(&err))
            }
        };

        Ok(msg)
    }
}

use std::panic;

use anyhow::{anyhow, Result};
use tokio::task;

use crate::rpc::{ApiKey, RequestHeader, ResponseMessage};

pub use consume::ConsumeHandler;
pub use consume_stream::ConsumeStreamHandler;
pub use produce::ProduceHandler;

mod consume;
mod consume_stream;
mod produce;

// TODO: resolve async_fn_in_trait lint and remove the allow
#[allow(async_fn_in_trait)]
pub trait Handler {
    const API_KEY: ApiKey;

    type RequestBody;

    async fn handle_message(
        &self,
        header: &RequestHeader,
        body: Self::RequestBody,
    ) -> Result<ResponseMessage>;
}

/// Runs a blocking commit log operation off the async executor.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(f).await {
        Ok(out) => Ok(out),
        Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
        Err(e) => Err(anyhow!("blocking log operation did not complete: {e}")),
    }
}

//! JSON over HTTP transport: `POST /` produces a record, `GET /` consumes one.
//!
//! Record values travel base64-encoded:
//!  - `POST /` with `{"record":{"value":"<base64>"}}` responds `{"offset":n}`
//!  - `GET /` with `{"offset":n}` responds `{"record":{"value":"<base64>","offset":n}}`
use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::commit_log::CommitLog;
use crate::error::LogError;
use crate::handler::blocking;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, with = "base64_value")]
    pub value: Bytes,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub record: Record,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub record: Record,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    BadRequest(#[from] serde_json::Error),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Log(err) if err.is_offset_not_found() => StatusCode::NOT_FOUND,
            Self::Log(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(error = %self, "HTTP request failed");
        }

        (status, self.to_string()).into_response()
    }
}

pub fn router(log: Arc<dyn CommitLog>) -> Router {
    Router::new()
        .route("/", post(produce).get(consume))
        .with_state(log)
}

/// Serves the HTTP transport on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, log: Arc<dyn CommitLog>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(log))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve HTTP")
}

// NOTE: bodies are parsed by hand so that malformed JSON maps to 400 rather than axum's 422
async fn produce(
    State(log): State<Arc<dyn CommitLog>>,
    body: Bytes,
) -> Result<Json<ProduceResponse>, HttpError> {
    let ProduceRequest { record } = serde_json::from_slice(&body)?;

    let offset = blocking(move || log.append(&record.value)).await??;
    debug!(offset, "produced record over HTTP");

    Ok(Json(ProduceResponse { offset }))
}

async fn consume(
    State(log): State<Arc<dyn CommitLog>>,
    body: Bytes,
) -> Result<Json<ConsumeResponse>, HttpError> {
    let ConsumeRequest { offset } = serde_json::from_slice(&body)?;

    let value = blocking(move || log.read(offset)).await??;

    Ok(Json(ConsumeResponse {
        record: Record { value, offset },
    }))
}

mod base64_value {
    use axum::body::Bytes;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt as _;
    use serde_json::{json, Value};
    use tower::ServiceExt as _;

    use super::*;
    use crate::memory::InMemoryLog;

    async fn send(app: Router, method: Method, body: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request");

        let response = app.oneshot(request).await.expect("response");
        let status = response.status();

        let body = response
            .into_body()
            .collect()
            .await
            .expect("response body")
            .to_bytes();

        (status, body)
    }

    #[tokio::test]
    async fn produce_consume() {
        let app = router(Arc::new(InMemoryLog::new()));

        // "foo" and "bar"
        for (value, offset) in [("Zm9v", 0), ("YmFy", 1)] {
            let body = json!({"record": {"value": value}}).to_string();
            let (status, body) = send(app.clone(), Method::POST, &body).await;

            assert_eq!(StatusCode::OK, status);
            let body: Value = serde_json::from_slice(&body).expect("json response");
            assert_eq!(json!({"offset": offset}), body);
        }

        let body = json!({"offset": 1}).to_string();
        let (status, body) = send(app, Method::GET, &body).await;

        assert_eq!(StatusCode::OK, status);
        let body: Value = serde_json::from_slice(&body).expect("json response");
        assert_eq!(json!({"record": {"value": "YmFy", "offset": 1}}), body);
    }

    #[tokio::test]
    async fn consume_not_found() {
        let app = router(Arc::new(InMemoryLog::new()));

        let (status, _) = send(app, Method::GET, r#"{"offset":0}"#).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[tokio::test]
    async fn malformed_json() {
        let app = router(Arc::new(InMemoryLog::new()));

        let (status, _) = send(app.clone(), Method::POST, "{not json").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);

        let (status, _) = send(app.clone(), Method::POST, r#"{"record":{"value":"%%%"}}"#).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);

        let (status, _) = send(app, Method::GET, r#"{"offset":"zero"}"#).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[test]
    fn record_json() {
        let record = Record {
            value: Bytes::from_static(b"hello"),
            offset: 3,
        };

        let json = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(json!({"value": "aGVsbG8=", "offset": 3}), json);

        let back: Record = serde_json::from_value(json).expect("deserialize record");
        assert_eq!(record, back);
    }
}

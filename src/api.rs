//! HTTP management API for custom records.
//!
//! | Method | Path | Result |
//! |---|---|---|
//! | `GET` | `/health` | `{"status":"ok"}` |
//! | `GET` | `/api/v1/records` | full snapshot |
//! | `POST` | `/api/v1/records` | create or replace a record |
//! | `PUT` | `/api/v1/records/{domain}/{name}` | replace the record at that key |
//! | `DELETE` | `/api/v1/records/{domain}/{name}` | remove the record |
//!
//! A `name` of `@` stands for the empty name.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::DnsError;
use crate::record::{Record, RecordType};
use crate::snapshot::Snapshot;
use crate::store::RecordStore;

/// Build the API router over `store`.
pub fn build_router(store: RecordStore) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/records", get(list_handler).post(create_handler))
        .route("/api/v1/records/", get(list_handler).post(create_handler))
        .route(
            "/api/v1/records/{domain}/{name}",
            put(update_handler).delete(delete_handler),
        )
        .with_state(store)
}

/// Serve the API on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    store: RecordStore,
    cancel: CancellationToken,
) -> Result<(), DnsError> {
    let addr = listener.local_addr()?;
    info!(%addr, "management API listening");

    axum::serve(listener, build_router(store))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("management API stopped");
    Ok(())
}

/// Run [`serve`] in the background. A serve failure cancels `cancel` so the
/// rest of the service shuts down with it.
pub fn spawn(
    listener: TcpListener,
    store: RecordStore,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), DnsError>> {
    tokio::spawn(async move {
        let result = serve(listener, store, cancel.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "management API failed");
            cancel.cancel();
        }
        result
    })
}

/// Wait for a task started by [`spawn`] and return its outcome.
pub async fn join(handle: JoinHandle<Result<(), DnsError>>) -> Result<(), DnsError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(DnsError::Io(std::io::Error::other(e))),
    }
}

/// Error response with a JSON `{"error": ...}` body.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DnsError> for ApiError {
    fn from(err: DnsError) -> Self {
        let status = match &err {
            DnsError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
            DnsError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "records API request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Body of a PUT; the key comes from the path.
#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(rename = "type")]
    record_type: RecordType,
    value: String,
    #[serde(default)]
    ttl: u32,
}

/// Run a blocking store operation off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, DnsError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!(error = %e, "store task failed");
            Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "internal error".to_string(),
            })
        }
    }
}

fn normalize_name(name: String) -> String {
    if name == "@" {
        String::new()
    } else {
        name
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_handler(State(store): State<RecordStore>) -> Json<Snapshot> {
    Json(store.list_all())
}

async fn create_handler(
    State(store): State<RecordStore>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record: Record = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?;

    let stored = blocking(move || store.set(record)).await?;
    info!(
        domain = %stored.domain,
        name = %stored.name,
        rtype = %stored.record_type(),
        "record created"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Record created successfully",
            "record": stored,
        })),
    ))
}

async fn update_handler(
    State(store): State<RecordStore>,
    Path((domain, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let update: UpdateBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?;

    let name = normalize_name(name);
    let record = Record::parse(name, domain, update.record_type, &update.value, update.ttl)?;

    let stored = blocking(move || store.set(record)).await?;
    info!(
        domain = %stored.domain,
        name = %stored.name,
        rtype = %stored.record_type(),
        "record updated"
    );

    Ok(Json(json!({
        "message": "Record updated successfully",
        "record": stored,
    })))
}

async fn delete_handler(
    State(store): State<RecordStore>,
    Path((domain, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let name = normalize_name(name);

    let (d, n) = (domain.clone(), name.clone());
    if let Err(e) = blocking(move || store.delete(&d, &n)).await {
        if e.status == StatusCode::NOT_FOUND {
            warn!(domain = %domain, name = %name, "delete of unknown record");
        }
        return Err(e);
    }
    info!(domain = %domain, name = %name, "record deleted");

    Ok(Json(json!({ "message": "Record deleted successfully" })))
}

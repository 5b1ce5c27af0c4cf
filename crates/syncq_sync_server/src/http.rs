//! HTTP binding for the sync server.
//!
//! JSON endpoints are thin wrappers over [`SyncServer::dispatch`]; the
//! blocking handler work runs on tokio's blocking pool. Artifacts are
//! streamed from disk without buffering the whole file.

use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use syncq_sync_protocol::endpoints;
use tokio_util::io::ReaderStream;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_body())).into_response()
    }
}

/// Builds the router for all sync endpoints.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/sync/{endpoint}", post(sync_endpoint))
        .route("/sync/artifact/{name}", get(artifact))
        .with_state(server)
}

/// Serves the router on `addr` until `shutdown` resolves.
pub async fn serve<F>(server: Arc<SyncServer>, addr: SocketAddr, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "hub listening");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("hub stopped");
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn sync_endpoint(
    State(server): State<Arc<SyncServer>>,
    Path(endpoint): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/sync/{endpoint}");
    let api_key = header_str(&headers, endpoints::API_KEY_HEADER).map(str::to_string);

    let dispatched = tokio::task::spawn_blocking(move || {
        server.dispatch(&path, api_key.as_deref(), &body)
    })
    .await;

    match dispatched {
        Ok((status, bytes)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                bytes,
            )
                .into_response()
        }
        Err(e) => ServerError::Internal(format!("handler task failed: {e}")).into_response(),
    }
}

async fn artifact(
    State(server): State<Arc<SyncServer>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let node_id = header_str(&headers, endpoints::NODE_ID_HEADER).unwrap_or_default();
    let api_key = header_str(&headers, endpoints::API_KEY_HEADER).unwrap_or_default();
    let path = server.artifact_path(node_id, api_key, &name)?;

    let file = tokio::fs::File::open(&path).await?;
    let length = file.metadata().await?.len();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let out = response.headers_mut();
    out.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    out.insert(header::CONTENT_DISPOSITION, disposition);
    out.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    out.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(response)
}

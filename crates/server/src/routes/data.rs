// crates/server/src/routes/data.rs
//! Artifact endpoints backed by the [`ResultStore`](crate::results::ResultStore).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::error::ApiResult;
use crate::metrics::record_artifact_request;
use crate::results::{DataFile, TweetRecord};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DeleteResponse {
    pub success: bool,
}

/// GET /api/data/list
async fn list_files(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DataFile>>> {
    record_artifact_request("list");
    Ok(Json(state.results.list().await?))
}

/// GET /api/data/{filename}
async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Vec<TweetRecord>>> {
    record_artifact_request("read");
    Ok(Json(state.results.read(&filename).await?))
}

/// GET /api/data/download/{filename} - streams the raw bytes as an attachment.
async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    record_artifact_request("download");
    let download = state.results.open(&filename).await?;
    let content_type = download
        .format
        .map_or("application/octet-stream", |f| f.content_type());
    // validate_filename already rejected separators; quotes would still
    // break the header value.
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download.filename.replace('"', "")
    );

    let body = Body::from_stream(ReaderStream::new(download.file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, download.size.to_string()),
        ],
        body,
    )
        .into_response())
}

/// DELETE /api/data/{filename}
async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    record_artifact_request("delete");
    state.results.remove(&filename).await?;
    Ok(Json(DeleteResponse { success: true }))
}

/// Build the data router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/data/list", get(list_files))
        .route("/data/download/{filename}", get(download_file))
        .route("/data/{filename}", get(read_file).delete(delete_file))
}

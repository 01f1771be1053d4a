use super::AppState;
use crate::error::{ChatError, ChatResult};
use crate::media;
use axum::{
    body::StreamBody,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
};
use tokio_util::io::ReaderStream;

/// Stream a stored image with its recorded content type.
pub(super) async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ChatResult<impl IntoResponse> {
    let path = state
        .media
        .path_of(&id)
        .ok_or_else(|| ChatError::not_found("Media not found"))?;
    let meta = state
        .db(move |conn| media::lookup(conn, &id))
        .await?
        .ok_or_else(|| ChatError::not_found("Media not found"))?;
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| ChatError::not_found("Media not found"))?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.mime).map_err(|e| ChatError::Internal(e.into()))?,
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("sandbox"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok((headers, StreamBody::new(ReaderStream::new(file))))
}

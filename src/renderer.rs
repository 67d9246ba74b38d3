//! Response renderer: JSON entries and collections, or binary content through the streamer.

use crate::error::ApiError;
use crate::response::{CollectionWithPagingInfo, Entry, JSON_CONTENT_TYPE};
use crate::service::Outcome;
use crate::streaming::ContentStreamer;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

const PIPE_CAPACITY: usize = 16 * 1024;

fn json_error(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Write `{"list":{"pagination":...,"entries":[{"entry":...},...]}}` one entry at a time.
pub async fn write_collection<W>(writer: &mut W, collection: &CollectionWithPagingInfo) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(b"{\"list\":{\"pagination\":").await?;
    writer
        .write_all(&serde_json::to_vec(&collection.pagination).map_err(json_error)?)
        .await?;
    writer.write_all(b",\"entries\":[").await?;
    for (i, entry) in collection.entries.iter().enumerate() {
        if i > 0 {
            writer.write_all(b",").await?;
        }
        writer
            .write_all(&serde_json::to_vec(&Entry { entry }).map_err(json_error)?)
            .await?;
    }
    writer.write_all(b"]}}").await?;
    writer.shutdown().await
}

fn json_response(status: StatusCode, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Render an outcome. The status was fixed by the executor; binary outcomes may still fail
/// before any body byte is produced (permission, missing content), which surfaces as an error.
pub async fn render(
    status: StatusCode,
    outcome: Outcome,
    streamer: &ContentStreamer,
    request_headers: &HeaderMap,
    user: &str,
) -> Result<Response, ApiError> {
    match outcome {
        Outcome::Empty => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            Ok(response)
        }
        Outcome::One(value) => {
            let bytes = serde_json::to_vec(&Entry { entry: value })
                .map_err(|e| ApiError::Internal(format!("serialize entry: {}", e)))?;
            Ok(json_response(status, Body::from(bytes)))
        }
        Outcome::Many(collection) => {
            let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
            tokio::spawn(async move {
                if let Err(e) = write_collection(&mut writer, &collection).await {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        tracing::info!(error = %e, "Client aborted stream read");
                    } else {
                        tracing::error!(error = %e, "collection rendering failed");
                    }
                }
            });
            Ok(json_response(status, Body::from_stream(ReaderStream::new(reader))))
        }
        Outcome::Binary(resource) => streamer.stream(resource, request_headers, user).await,
    }
}

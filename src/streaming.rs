//! Binary content streaming: conditional GET, caching headers and the byte copy to the client.

use crate::error::ApiError;
use crate::resource::{BinaryResource, ContentInfo};
use crate::store::{require_permission, ContentReader, NodeRef, Permission, Repository};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

const PIPE_CAPACITY: usize = 64 * 1024;
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Content codings that map onto a `Content-Encoding` header. Character sets do not.
const CONTENT_CODINGS: &[&str] = &["gzip", "deflate", "br", "compress", "zstd"];

pub fn format_http_date(date: DateTime<Utc>) -> String {
    date.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date in RFC 1123, RFC 850 or asctime form.
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[derive(Debug)]
pub enum CopyOutcome {
    Completed(u64),
    ClientAborted,
    Failed(io::Error),
}

fn is_client_abort(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Copy all bytes from `reader` to `writer`. A client going away ends the copy quietly.
pub async fn copy_content<R, W>(mut reader: R, mut writer: W) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => n,
        Err(e) if is_client_abort(&e) => {
            tracing::info!(error = %e, "Client aborted stream read");
            return CopyOutcome::ClientAborted;
        }
        Err(e) => {
            tracing::error!(error = %e, "content stream failed");
            return CopyOutcome::Failed(e);
        }
    };
    match writer.shutdown().await {
        Ok(()) => CopyOutcome::Completed(copied),
        Err(e) if is_client_abort(&e) => {
            tracing::info!(error = %e, "Client aborted stream read");
            CopyOutcome::ClientAborted
        }
        Err(e) => CopyOutcome::Failed(e),
    }
}

/// Body fed by a background copy through an in-memory pipe. Dropping the body closes the pipe,
/// which the copy sees as a client abort.
fn piped_body(reader: impl AsyncRead + Send + Unpin + 'static) -> Body {
    let (writer, pipe_reader) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        let outcome = copy_content(reader, writer).await;
        tracing::trace!(?outcome, "content copy finished");
    });
    Body::from_stream(ReaderStream::new(pipe_reader))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|e| ApiError::Internal(format!("invalid header value {:?}: {}", value, e)))
}

fn content_type(mimetype: &str, encoding: Option<&str>) -> String {
    match encoding.filter(|e| !e.is_empty()) {
        Some(charset) if mimetype.starts_with("text/") => format!("{};charset={}", mimetype, charset),
        _ => mimetype.to_string(),
    }
}

/// `attachment; filename="x"; filename*=UTF-8''x` with the starred form percent-encoded.
pub fn content_disposition(file_name: &str) -> Result<HeaderValue, ApiError> {
    let quoted = file_name.replace('\\', "\\\\").replace('"', "\\\"");
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        quoted,
        urlencoding::encode(file_name)
    );
    HeaderValue::from_bytes(value.as_bytes())
        .map_err(|e| ApiError::Internal(format!("invalid attachment name {:?}: {}", file_name, e)))
}

pub struct ContentStreamer {
    repository: Arc<dyn Repository>,
    reference_modified: OnceCell<DateTime<Utc>>,
}

impl ContentStreamer {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            reference_modified: OnceCell::new(),
        }
    }

    /// Fixed modification time reported for file-backed resources, computed on first use.
    pub fn reference_modified(&self) -> DateTime<Utc> {
        *self.reference_modified.get_or_init(|| {
            Utc.with_ymd_and_hms(1975, 4, 26, 0, 0, 0)
                .single()
                .unwrap_or_default()
        })
    }

    pub async fn stream(
        &self,
        resource: BinaryResource,
        request_headers: &HeaderMap,
        user: &str,
    ) -> Result<Response, ApiError> {
        match resource {
            BinaryResource::File { path, content_info } => self.stream_file(&path, &content_info).await,
            BinaryResource::Node {
                node_ref,
                property,
                content_info,
                attach_file_name,
            } => {
                self.stream_node(
                    node_ref,
                    &property,
                    &content_info,
                    attach_file_name.as_deref(),
                    request_headers,
                    user,
                )
                .await
            }
        }
    }

    async fn stream_file(&self, path: &Path, info: &ContentInfo) -> Result<Response, ApiError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ApiError::not_found(format!("file {}", path.display())),
            _ => ApiError::Io(e),
        })?;
        let length = file.metadata().await?.len();
        let mimetype = info.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_raw()
                .unwrap_or(crate::resource::content::DEFAULT_MIMETYPE)
                .to_string()
        });
        let modified = self.reference_modified();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header_value(&content_type(&mimetype, info.encoding.as_deref()))?);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        headers.insert(header::ETAG, header_value(&format!("\"{}\"", modified.timestamp_millis()))?);
        headers.insert(header::LAST_MODIFIED, header_value(&format_http_date(modified))?);
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("must-revalidate"));
        tracing::debug!(path = %path.display(), length, "streaming file");
        respond(StatusCode::OK, headers, piped_body(file))
    }

    async fn stream_node(
        &self,
        node_ref: NodeRef,
        property: &str,
        info: &ContentInfo,
        attach_file_name: Option<&str>,
        request_headers: &HeaderMap,
        user: &str,
    ) -> Result<Response, ApiError> {
        let mut tx = self.repository.begin(true, user).await?;
        let looked_up = async {
            require_permission(tx.as_mut(), node_ref, Permission::ReadContent).await?;
            let node = tx
                .get_node(node_ref)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("node {}", node_ref)))?;
            let content = tx.content(node_ref, property).await?;
            Ok::<_, ApiError>((node, content))
        }
        .await;
        let (node, content) = match looked_up {
            Ok(found) => {
                tx.commit().await?;
                found
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                return Err(e);
            }
        };

        let modified = content.as_ref().map(|c| c.modified_at).unwrap_or(node.modified_at);
        if let Some(raw) = request_headers.get(header::IF_MODIFIED_SINCE) {
            match raw.to_str().ok().and_then(parse_http_date) {
                Some(since) if since.timestamp() > 0 && modified.timestamp() <= since.timestamp() => {
                    tracing::debug!(node = %node_ref, "content not modified");
                    return respond(StatusCode::NOT_MODIFIED, HeaderMap::new(), Body::empty());
                }
                Some(_) => {}
                None => tracing::info!(value = ?raw, "ignoring unparseable If-Modified-Since"),
            }
        }

        let content = content.ok_or_else(|| ApiError::not_found(format!("no {} on {}", property, node_ref)))?;
        let reader: ContentReader = self
            .repository
            .open_content(node_ref, property)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("no {} reader for {}", property, node_ref)))?;

        let mimetype = info.mime_type.as_deref().unwrap_or(&content.mimetype);
        let encoding = info.encoding.as_deref().unwrap_or(&content.encoding);
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header_value(&content_type(mimetype, Some(encoding)))?);
        if CONTENT_CODINGS.contains(&encoding.to_ascii_lowercase().as_str()) {
            headers.insert(header::CONTENT_ENCODING, header_value(encoding)?);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content.size));
        headers.insert(header::ETAG, header_value(&format!("\"{}\"", modified.timestamp_millis()))?);
        headers.insert(header::LAST_MODIFIED, header_value(&format_http_date(modified))?);
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("must-revalidate"));
        if let Some(name) = attach_file_name {
            headers.insert(header::CONTENT_DISPOSITION, content_disposition(name)?);
        }
        tracing::debug!(node = %node_ref, property, size = content.size, "streaming content");
        respond(StatusCode::OK, headers, piped_body(reader))
    }
}

fn respond(status: StatusCode, headers: HeaderMap, body: Body) -> Result<Response, ApiError> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepository, NewNode, CONTENT_PROPERTY, TYPE_CONTENT};
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    async fn stored(repo: &MemoryRepository, body: &[u8], mimetype: &str) -> NodeRef {
        let mut tx = repo.begin(false, "alice").await.unwrap();
        let node = tx
            .create_node(NewNode {
                name: "report.txt".into(),
                node_type: TYPE_CONTENT.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        tx.write_content(node.id, CONTENT_PROPERTY, body.to_vec(), mimetype, "UTF-8")
            .await
            .unwrap();
        tx.commit().await.unwrap();
        node.id
    }

    fn node_resource(node_ref: NodeRef, attach: Option<&str>) -> BinaryResource {
        BinaryResource::Node {
            node_ref,
            property: CONTENT_PROPERTY.into(),
            content_info: ContentInfo::default(),
            attach_file_name: attach.map(String::from),
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[test]
    fn http_dates_parse_in_all_three_forms() {
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(format_http_date(expected), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn reference_timestamp_is_computed_once() {
        let streamer = ContentStreamer::new(Arc::new(MemoryRepository::new()));
        let first = streamer.reference_modified();
        assert_eq!(first, Utc.with_ymd_and_hms(1975, 4, 26, 0, 0, 0).unwrap());
        assert_eq!(streamer.reference_modified(), first);
    }

    #[tokio::test]
    async fn node_content_is_streamed_with_headers() {
        let repo = Arc::new(MemoryRepository::new());
        let id = stored(&repo, b"hello world", "text/plain").await;
        let streamer = ContentStreamer::new(repo);
        let response = streamer
            .stream(node_resource(id, Some("résumé.txt")), &HeaderMap::new(), "alice")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain;charset=UTF-8");
        assert_eq!(headers[header::CONTENT_LENGTH], "11");
        assert_eq!(headers[header::CACHE_CONTROL], "must-revalidate");
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
        assert!(headers.get(header::ETAG).is_some());
        assert!(headers.get(header::LAST_MODIFIED).is_some());
        let disposition = headers[header::CONTENT_DISPOSITION].as_bytes();
        assert!(disposition.ends_with(b"filename*=UTF-8''r%C3%A9sum%C3%A9.txt"));
        assert_eq!(body_bytes(response).await, b"hello world");
    }

    #[tokio::test]
    async fn unchanged_content_answers_not_modified_without_body() {
        let repo = Arc::new(MemoryRepository::new());
        let id = stored(&repo, b"cached", "text/plain").await;
        let streamer = ContentStreamer::new(repo);

        let later = format_http_date(Utc::now() + chrono::Duration::seconds(60));
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(&later).unwrap());
        let response = streamer.stream(node_resource(id, None), &headers, "alice").await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(body_bytes(response).await.is_empty());

        let earlier = format_http_date(Utc::now() - chrono::Duration::days(1));
        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(&earlier).unwrap());
        let response = streamer.stream(node_resource(id, None), &headers, "alice").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn modification_in_the_same_second_counts_as_unchanged() {
        let repo = Arc::new(MemoryRepository::new());
        let id = stored(&repo, b"x", "text/plain").await;
        let mut tx = repo.begin(true, "alice").await.unwrap();
        let modified = tx.content(id, CONTENT_PROPERTY).await.unwrap().unwrap().modified_at;
        drop(tx);
        // HTTP dates drop sub-second precision; the truncated value must still match.
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(&format_http_date(modified)).unwrap());
        let response = ContentStreamer::new(repo)
            .stream(node_resource(id, None), &headers, "alice")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn garbage_if_modified_since_is_ignored() {
        let repo = Arc::new(MemoryRepository::new());
        let id = stored(&repo, b"x", "text/plain").await;
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_static("not a date"));
        let response = ContentStreamer::new(repo)
            .stream(node_resource(id, None), &headers, "alice")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn denied_read_content_is_forbidden_and_missing_content_not_found() {
        let repo = Arc::new(MemoryRepository::new());
        let id = stored(&repo, b"secret", "text/plain").await;
        repo.set_permission(id, "mallory", "ReadContent", false).unwrap();
        let streamer = ContentStreamer::new(repo.clone());
        let err = streamer
            .stream(node_resource(id, None), &HeaderMap::new(), "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));

        let mut tx = repo.begin(false, "alice").await.unwrap();
        let empty = tx
            .create_node(NewNode {
                name: "empty".into(),
                node_type: TYPE_CONTENT.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let err = streamer
            .stream(node_resource(empty.id, None), &HeaderMap::new(), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn gzip_encoding_sets_content_encoding() {
        let repo = Arc::new(MemoryRepository::new());
        let mut tx = repo.begin(false, "alice").await.unwrap();
        let node = tx
            .create_node(NewNode {
                name: "a.gz".into(),
                node_type: TYPE_CONTENT.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        tx.write_content(node.id, CONTENT_PROPERTY, vec![0x1f, 0x8b], "application/x-tar", "gzip")
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let response = ContentStreamer::new(repo)
            .stream(node_resource(node.id, None), &HeaderMap::new(), "alice")
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-tar");
    }

    #[tokio::test]
    async fn file_resource_uses_extension_and_reference_date() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"a":1}"#).unwrap();
        let streamer = ContentStreamer::new(Arc::new(MemoryRepository::new()));
        let resource = BinaryResource::File {
            path: file.path().to_path_buf(),
            content_info: ContentInfo::default(),
        };
        let response = streamer.stream(resource, &HeaderMap::new(), "alice").await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::LAST_MODIFIED], "Sat, 26 Apr 1975 00:00:00 GMT");
        assert_eq!(body_bytes(response).await, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let streamer = ContentStreamer::new(Arc::new(MemoryRepository::new()));
        let resource = BinaryResource::File {
            path: "/definitely/not/here.bin".into(),
            content_info: ContentInfo::default(),
        };
        let err = streamer.stream(resource, &HeaderMap::new(), "alice").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn client_abort_ends_copy_quietly() {
        let (writer, reader) = tokio::io::duplex(8);
        drop(reader);
        let source: &[u8] = &[7u8; 1024];
        let outcome = copy_content(source, writer).await;
        assert!(matches!(outcome, CopyOutcome::ClientAborted));
    }

    #[tokio::test]
    async fn completed_copy_reports_length() {
        let (writer, mut reader) = tokio::io::duplex(4096);
        let source: &[u8] = b"twelve bytes";
        let outcome = copy_content(source, writer).await;
        assert!(matches!(outcome, CopyOutcome::Completed(12)));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"twelve bytes");
    }
}

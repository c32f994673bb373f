//! Local file responses
//!
//! Serves a [`FileRule`]'s file in place of the upstream response, honouring
//! single `Range: bytes=start-end` requests.

use crate::models::{FileRule, InterceptedRequest};
use bytes::Bytes;
use http::{header, Response, StatusCode};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Fixed `Last-Modified` value sent with every served file
pub const LAST_MODIFIED_PLACEHOLDER: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

/// The rule's file cannot be served; the dispatcher moves on.
#[derive(Debug, Error)]
pub enum FileServeError {
    #[error("file {path:?} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),
    #[error("building file response: {0}")]
    Response(#[from] http::Error),
}

/// Inclusive byte span selected by a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse `bytes=start-end` against a file of `size` bytes.
///
/// Omitted bounds default to the start and end of the file and both bounds
/// are clamped into the file. Anything unparseable (including multi-range
/// requests) yields `None`, which callers treat as "no range".
pub fn parse_range(value: &str, size: u64) -> Option<ByteRange> {
    if size == 0 {
        return None;
    }
    let (unit, ranges) = value.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    let last = size - 1;
    let start = if start.is_empty() {
        0
    } else {
        start.parse::<u64>().ok()?
    };
    let end = if end.is_empty() {
        last
    } else {
        end.parse::<u64>().ok()?
    };

    let start = start.min(last);
    let end = end.min(last).max(start);
    Some(ByteRange { start, end })
}

/// Content type for a path based on its extension.
pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Entity tag derived from the file size and name.
pub fn etag_for(path: &Path, size: u64) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    // FNV-1a keeps the tag stable across processes
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    format!("\"{:x}-{:x}\"", size, hash)
}

/// Stateless responder for file rules.
#[derive(Debug, Clone, Default)]
pub struct FileResponder;

impl FileResponder {
    pub fn new() -> Self {
        Self
    }

    /// Build the response for `rule`, or report that the file is not servable.
    pub async fn serve(
        &self,
        rule: &FileRule,
        req: &InterceptedRequest,
    ) -> Result<Response<Bytes>, FileServeError> {
        let path = PathBuf::from(&rule.local_file_path);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| FileServeError::Unreadable {
                path: path.clone(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(FileServeError::NotAFile(path));
        }
        let size = metadata.len();

        let content_type = rule
            .content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| content_type_for(&path));
        let range = req.header("range").and_then(|value| parse_range(value, size));
        let head_only = req.method.eq_ignore_ascii_case("HEAD");

        let builder = Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::ETAG, etag_for(&path, size))
            .header(header::LAST_MODIFIED, LAST_MODIFIED_PLACEHOLDER);

        let response = match range {
            Some(range) => {
                let body = if head_only {
                    Bytes::new()
                } else {
                    read_span(&path, range).await?
                };
                tracing::debug!(
                    "Serving {:?} bytes {}-{}/{}",
                    path,
                    range.start,
                    range.end,
                    size
                );
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", range.start, range.end, size),
                    )
                    .header(header::CONTENT_LENGTH, range.byte_count().to_string())
                    .body(body)?
            }
            None => {
                let body = if head_only {
                    Bytes::new()
                } else {
                    tokio::fs::read(&path)
                        .await
                        .map(Bytes::from)
                        .map_err(|source| FileServeError::Unreadable {
                            path: path.clone(),
                            source,
                        })?
                };
                tracing::debug!("Serving {:?} ({} bytes)", path, size);
                builder
                    .status(StatusCode::OK)
                    .header(header::CONTENT_LENGTH, size.to_string())
                    .body(body)?
            }
        };
        Ok(response)
    }
}

async fn read_span(path: &Path, range: ByteRange) -> Result<Bytes, FileServeError> {
    let unreadable = |source: std::io::Error| FileServeError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(unreadable)?;
    let mut buf = Vec::with_capacity(range.byte_count() as usize);
    file.take(range.byte_count())
        .read_to_end(&mut buf)
        .await
        .map_err(unreadable)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const OCTET_STREAM: &str = "application/octet-stream";

    fn sample_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn rule_for(path: &Path) -> FileRule {
        FileRule {
            id: "f".into(),
            name: String::new(),
            url_pattern: "download".into(),
            local_file_path: path.to_string_lossy().to_string(),
            content_type: None,
            enabled: true,
        }
    }

    fn header<'a>(resp: &'a Response<Bytes>, name: &str) -> &'a str {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn range_parsing_clamps_and_defaults() {
        assert_eq!(parse_range("bytes=0-99", 500), Some(ByteRange { start: 0, end: 99 }));
        assert_eq!(parse_range("bytes=400-999", 500), Some(ByteRange { start: 400, end: 499 }));
        assert_eq!(parse_range("bytes=100-", 500), Some(ByteRange { start: 100, end: 499 }));
        assert_eq!(parse_range("bytes=-20", 500), Some(ByteRange { start: 0, end: 20 }));
        assert_eq!(parse_range("bytes=900-950", 500), Some(ByteRange { start: 499, end: 499 }));
        assert_eq!(parse_range("bytes=50-10", 500), Some(ByteRange { start: 50, end: 50 }));
    }

    #[test]
    fn malformed_ranges_are_ignored() {
        assert_eq!(parse_range("bytes=abc", 500), None);
        assert_eq!(parse_range("bytes=1-x", 500), None);
        assert_eq!(parse_range("items=0-1", 500), None);
        assert_eq!(parse_range("bytes=0-1,5-6", 500), None);
        assert_eq!(parse_range("bytes=0-1", 0), None);
    }

    #[test]
    fn content_type_inference() {
        assert_eq!(content_type_for(Path::new("/a/b.JSON")), "application/json");
        assert_eq!(content_type_for(Path::new("/a/clip.mov")), "video/quicktime");
        assert_eq!(content_type_for(Path::new("/a/b.png")), "image/png");
        assert_eq!(content_type_for(Path::new("/a/b.zzunknown")), OCTET_STREAM);
        assert_eq!(content_type_for(Path::new("/a/noext")), OCTET_STREAM);
    }

    #[tokio::test]
    async fn full_file_response() {
        let dir = tempdir().unwrap();
        let (path, data) = sample_file(dir.path(), "app.bin", 500);
        let req = InterceptedRequest::new("GET", "http://cdn/download/app.bin");

        let resp = FileResponder::new().serve(&rule_for(&path), &req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), data.as_slice());
        assert_eq!(header(&resp, "content-length"), "500");
        assert_eq!(header(&resp, "accept-ranges"), "bytes");
        assert_eq!(header(&resp, "content-type"), OCTET_STREAM);
        assert_eq!(header(&resp, "last-modified"), LAST_MODIFIED_PLACEHOLDER);
        assert_eq!(header(&resp, "etag"), etag_for(&path, 500));
    }

    #[tokio::test]
    async fn partial_content_response() {
        let dir = tempdir().unwrap();
        let (path, data) = sample_file(dir.path(), "app.bin", 500);
        let req = InterceptedRequest::new("GET", "http://cdn/download/app.bin")
            .with_header("Range", "bytes=0-99");

        let resp = FileResponder::new().serve(&rule_for(&path), &req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&resp, "content-range"), "bytes 0-99/500");
        assert_eq!(header(&resp, "content-length"), "100");
        assert_eq!(resp.body().as_ref(), &data[..100]);
    }

    #[tokio::test]
    async fn range_past_end_is_clamped() {
        let dir = tempdir().unwrap();
        let (path, data) = sample_file(dir.path(), "app.bin", 500);
        let req = InterceptedRequest::new("GET", "http://cdn/download/app.bin")
            .with_header("range", "bytes=400-999");

        let resp = FileResponder::new().serve(&rule_for(&path), &req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&resp, "content-range"), "bytes 400-499/500");
        assert_eq!(header(&resp, "content-length"), "100");
        assert_eq!(resp.body().as_ref(), &data[400..]);
    }

    #[tokio::test]
    async fn malformed_range_serves_full_file() {
        let dir = tempdir().unwrap();
        let (path, data) = sample_file(dir.path(), "app.bin", 500);
        let req = InterceptedRequest::new("GET", "http://cdn/download/app.bin")
            .with_header("Range", "bytes=abc");

        let resp = FileResponder::new().serve(&rule_for(&path), &req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().len(), data.len());
    }

    #[tokio::test]
    async fn content_type_override_wins() {
        let dir = tempdir().unwrap();
        let (path, _) = sample_file(dir.path(), "data.json", 10);
        let mut rule = rule_for(&path);
        rule.content_type = Some("text/x-custom".into());
        let req = InterceptedRequest::new("GET", "http://cdn/download/data.json");

        let resp = FileResponder::new().serve(&rule, &req).await.unwrap();
        assert_eq!(header(&resp, "content-type"), "text/x-custom");
    }

    #[tokio::test]
    async fn missing_file_is_not_servable() {
        let dir = tempdir().unwrap();
        let rule = rule_for(&dir.path().join("gone.bin"));
        let req = InterceptedRequest::new("GET", "http://cdn/download/gone.bin");
        let err = FileResponder::new().serve(&rule, &req).await.unwrap_err();
        assert!(matches!(err, FileServeError::Unreadable { .. }));

        let dir_rule = rule_for(dir.path());
        let err = FileResponder::new().serve(&dir_rule, &req).await.unwrap_err();
        assert!(matches!(err, FileServeError::NotAFile(_)));
    }
}

//! Binary request and response bodies.

use crate::store::NodeRef;
use axum::body::Bytes;
use std::path::PathBuf;

pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";
pub const DEFAULT_ENCODING: &str = "UTF-8";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentInfo {
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub length: Option<u64>,
    pub locale: Option<String>,
}

/// Response body produced by a handler and consumed once by the renderer.
#[derive(Clone, Debug, PartialEq)]
pub enum BinaryResource {
    /// Bytes of a (usually temporary) file on local disk.
    File { path: PathBuf, content_info: ContentInfo },
    /// A content property of a repository node.
    Node {
        node_ref: NodeRef,
        property: String,
        content_info: ContentInfo,
        attach_file_name: Option<String>,
    },
}

/// Raw request body of a binary PUT.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicContent {
    pub bytes: Bytes,
    pub mime_type: String,
    pub encoding: String,
}

impl BasicContent {
    /// Split a `Content-Type` header into mime type and charset.
    pub fn from_content_type(bytes: Bytes, content_type: Option<&str>) -> Self {
        let mut mime_type = DEFAULT_MIMETYPE.to_string();
        let mut encoding = DEFAULT_ENCODING.to_string();
        if let Some(ct) = content_type {
            let mut parts = ct.split(';');
            if let Some(mime) = parts.next().map(str::trim).filter(|m| !m.is_empty()) {
                mime_type = mime.to_ascii_lowercase();
            }
            for part in parts {
                if let Some((k, v)) = part.split_once('=') {
                    if k.trim().eq_ignore_ascii_case("charset") {
                        encoding = v.trim().trim_matches('"').to_string();
                    }
                }
            }
        }
        Self {
            bytes,
            mime_type,
            encoding,
        }
    }
}

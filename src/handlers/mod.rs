//! HTTP handlers: the resource API dispatcher and the WebDAV PUT adapter.

pub mod webdav;
pub mod webscript;

pub use webdav::{node_for_path, path_without_context, put_document, PutDocument};
pub use webscript::handle_request;

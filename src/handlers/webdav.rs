//! WebDAV `PUT`: store the request body as the content of the document at a context-relative
//! path. Only PUT is served; the rest of the protocol is out of scope.

use crate::error::ApiError;
use crate::extractors::RunAsUser;
use crate::resource::BasicContent;
use crate::service::UnitOfWork;
use crate::state::AppState;
use crate::store::{require_permission, resolve_path, NewNode, Node, Permission, RepositoryTx, CONTENT_PROPERTY, TYPE_CONTENT};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};

/// Request path below `context`, percent-decoded and without leading or trailing slashes.
pub fn path_without_context(context: &str, request_path: &str) -> Result<String, ApiError> {
    let context = context.trim_end_matches('/');
    let relative = match request_path.strip_prefix(context) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => request_path,
    };
    let decoded = urlencoding::decode(relative)
        .map_err(|e| ApiError::InvalidArgument(format!("invalid path encoding: {}", e)))?;
    Ok(decoded.trim_matches('/').to_string())
}

/// Node at `path`, or its working copy when the node is checked out.
pub async fn node_for_path(tx: &mut dyn RepositoryTx, path: &str) -> Result<Node, ApiError> {
    let node = resolve_path(tx, path)
        .await?
        .ok_or_else(|| ApiError::not_found(path.to_string()))?;
    match tx.working_copy(node.id).await? {
        Some(working_copy) => Ok(working_copy),
        None => Ok(node),
    }
}

/// Writes one document; creates it under its parent folder when absent.
pub struct PutDocument<'a> {
    pub path: &'a str,
    pub content: &'a BasicContent,
}

#[async_trait]
impl<'a> UnitOfWork for PutDocument<'a> {
    type Output = StatusCode;

    async fn execute(&self, tx: &mut dyn RepositoryTx) -> Result<StatusCode, ApiError> {
        let (node, status) = match node_for_path(tx, self.path).await {
            Ok(node) => {
                if node.is_folder() {
                    return Err(ApiError::unsupported(format!("cannot PUT onto folder {}", self.path)));
                }
                require_permission(tx, node.id, Permission::Write).await?;
                (node, StatusCode::NO_CONTENT)
            }
            Err(ApiError::NotFound(_)) => (self.create(tx).await?, StatusCode::CREATED),
            Err(e) => return Err(e),
        };
        tx.write_content(
            node.id,
            CONTENT_PROPERTY,
            self.content.bytes.to_vec(),
            &self.content.mime_type,
            &self.content.encoding,
        )
        .await?;
        Ok(status)
    }
}

impl<'a> PutDocument<'a> {
    async fn create(&self, tx: &mut dyn RepositoryTx) -> Result<Node, ApiError> {
        let (parent_path, name) = match self.path.rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", self.path),
        };
        if name.is_empty() {
            return Err(ApiError::unsupported("PUT requires a document path"));
        }
        let parent = if parent_path.is_empty() {
            None
        } else {
            let folder = resolve_path(tx, parent_path)
                .await?
                .filter(Node::is_folder)
                .ok_or_else(|| ApiError::Conflict(format!("parent folder {} does not exist", parent_path)))?;
            require_permission(tx, folder.id, Permission::Write).await?;
            Some(folder.id)
        };
        tx.create_node(NewNode {
            parent_id: parent,
            name: name.to_string(),
            node_type: TYPE_CONTENT.to_string(),
            ..Default::default()
        })
        .await
    }
}

pub async fn put_document(
    State(state): State<AppState>,
    RunAsUser(user): RunAsUser,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let path = path_without_context(&state.webdav_context, uri.path())?;
        let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let content = BasicContent::from_content_type(body, content_type);
        let unit = PutDocument {
            path: &path,
            content: &content,
        };
        let status = state.transactions.do_in_transaction(&unit, false, &user).await?;
        tracing::debug!(path = %path, %status, user = %user, "WebDAV PUT");
        Ok::<_, ApiError>(status)
    }
    .await;
    match result {
        Ok(status) => status.into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepository, NodeRef, Repository, TYPE_FOLDER};

    #[test]
    fn context_is_stripped_and_path_decoded() {
        assert_eq!(path_without_context("/webdav", "/webdav/Sites/My%20Doc.txt").unwrap(), "Sites/My Doc.txt");
        assert_eq!(path_without_context("/webdav/", "/webdav").unwrap(), "");
        assert_eq!(path_without_context("/webdav", "/webdavx/a").unwrap(), "webdavx/a");
        assert_eq!(path_without_context("/", "/a/b/").unwrap(), "a/b");
    }

    async fn create(tx: &mut dyn RepositoryTx, parent: Option<NodeRef>, name: &str, node_type: &str, wc: Option<NodeRef>) -> NodeRef {
        tx.create_node(NewNode {
            parent_id: parent,
            name: name.into(),
            node_type: node_type.into(),
            working_copy_of: wc,
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn working_copy_is_preferred() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(false, "alice").await.unwrap();
        let folder = create(tx.as_mut(), None, "Sites", TYPE_FOLDER, None).await;
        let doc = create(tx.as_mut(), Some(folder), "plan.docx", TYPE_CONTENT, None).await;
        let wc = create(tx.as_mut(), Some(folder), "plan (Working Copy).docx", TYPE_CONTENT, Some(doc)).await;

        assert_eq!(node_for_path(tx.as_mut(), "Sites/plan.docx").await.unwrap().id, wc);
        assert!(matches!(node_for_path(tx.as_mut(), "Sites/none").await, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn put_creates_then_updates() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(false, "alice").await.unwrap();
        create(tx.as_mut(), None, "Sites", TYPE_FOLDER, None).await;
        let content = BasicContent::from_content_type(Bytes::from_static(b"v1"), Some("text/plain"));
        let unit = PutDocument {
            path: "Sites/a.txt",
            content: &content,
        };
        assert_eq!(unit.execute(tx.as_mut()).await.unwrap(), StatusCode::CREATED);
        assert_eq!(unit.execute(tx.as_mut()).await.unwrap(), StatusCode::NO_CONTENT);

        let missing_parent = PutDocument {
            path: "Nowhere/a.txt",
            content: &content,
        };
        assert!(matches!(missing_parent.execute(tx.as_mut()).await, Err(ApiError::Conflict(_))));
    }
}

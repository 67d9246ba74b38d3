use super::{load, load_child, node_json};
use crate::error::ApiError;
use crate::resource::{BasicContent, BinaryPropertyResource, BinaryResource, ContentInfo, Params, RelationshipBinaryResource};
use crate::store::{Node, Permission, RepositoryTx, CONTENT_PROPERTY};
use async_trait::async_trait;
use serde_json::Value;

/// Query parameter asking for a `Content-Disposition: attachment` response.
const PARAM_ATTACHMENT: &str = "attachment";

/// `/nodes/{entityId}/content`.
pub struct NodeContent;

/// `/nodes/{entityId}/children/{relationshipId}/content`.
pub struct ChildContent;

async fn read(tx: &mut dyn RepositoryTx, node: Node, params: &Params) -> Result<BinaryResource, ApiError> {
    let content_info = match tx.content(node.id, CONTENT_PROPERTY).await? {
        Some(data) => ContentInfo {
            mime_type: Some(data.mimetype),
            encoding: Some(data.encoding),
            length: Some(data.size),
            locale: None,
        },
        None => ContentInfo::default(),
    };
    let attach = params
        .filter(PARAM_ATTACHMENT)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    Ok(BinaryResource::Node {
        node_ref: node.id,
        property: CONTENT_PROPERTY.to_string(),
        content_info,
        attach_file_name: attach.then(|| node.name),
    })
}

async fn write(tx: &mut dyn RepositoryTx, node: Node, content: &BasicContent) -> Result<Value, ApiError> {
    if node.is_folder() {
        return Err(ApiError::InvalidArgument(format!("folder {} cannot hold content", node.id)));
    }
    tx.write_content(
        node.id,
        CONTENT_PROPERTY,
        content.bytes.to_vec(),
        &content.mime_type,
        &content.encoding,
    )
    .await?;
    let refreshed = tx
        .get_node(node.id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("node {}", node.id)))?;
    Ok(node_json(&refreshed))
}

async fn remove(tx: &mut dyn RepositoryTx, node: Node) -> Result<(), ApiError> {
    if !tx.delete_content(node.id, CONTENT_PROPERTY).await? {
        return Err(ApiError::not_found(format!("no content on {}", node.id)));
    }
    Ok(())
}

#[async_trait]
impl BinaryPropertyResource for NodeContent {
    async fn read_property(&self, tx: &mut dyn RepositoryTx, entity_id: &str, params: &Params) -> Result<BinaryResource, ApiError> {
        let node = load(tx, entity_id, Permission::Read).await?;
        read(tx, node, params).await
    }

    async fn update_property(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        content: &BasicContent,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        let node = load(tx, entity_id, Permission::Write).await?;
        write(tx, node, content).await
    }

    async fn delete_property(&self, tx: &mut dyn RepositoryTx, entity_id: &str, _params: &Params) -> Result<(), ApiError> {
        let node = load(tx, entity_id, Permission::Write).await?;
        remove(tx, node).await
    }
}

#[async_trait]
impl RelationshipBinaryResource for ChildContent {
    async fn read_property(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        id: &str,
        params: &Params,
    ) -> Result<BinaryResource, ApiError> {
        let child = load_child(tx, entity_id, id, Permission::Read).await?;
        read(tx, child, params).await
    }

    async fn update_property(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        id: &str,
        content: &BasicContent,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        let child = load_child(tx, entity_id, id, Permission::Write).await?;
        write(tx, child, content).await
    }

    async fn delete_property(&self, tx: &mut dyn RepositoryTx, entity_id: &str, id: &str, _params: &Params) -> Result<(), ApiError> {
        let child = load_child(tx, entity_id, id, Permission::Write).await?;
        remove(tx, child).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepository, NewNode, NodeRef, Repository, TYPE_CONTENT, TYPE_FOLDER};
    use axum::body::Bytes;

    async fn create(tx: &mut dyn RepositoryTx, parent: Option<NodeRef>, name: &str, node_type: &str) -> NodeRef {
        tx.create_node(NewNode {
            parent_id: parent,
            name: name.into(),
            node_type: node_type.into(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn write_then_read_describes_stored_content() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(false, "alice").await.unwrap();
        let id = create(tx.as_mut(), None, "notes.txt", TYPE_CONTENT).await;
        let raw = id.0.to_string();
        let content = BasicContent::from_content_type(Bytes::from_static(b"hello"), Some("text/plain; charset=UTF-8"));

        NodeContent
            .update_property(tx.as_mut(), &raw, &content, &Params::default())
            .await
            .unwrap();

        let mut params = Params::default();
        params.filters.insert(PARAM_ATTACHMENT.into(), "true".into());
        match NodeContent.read_property(tx.as_mut(), &raw, &params).await.unwrap() {
            BinaryResource::Node {
                node_ref,
                content_info,
                attach_file_name,
                ..
            } => {
                assert_eq!(node_ref, id);
                assert_eq!(content_info.mime_type.as_deref(), Some("text/plain"));
                assert_eq!(content_info.length, Some(5));
                assert_eq!(attach_file_name.as_deref(), Some("notes.txt"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn deleting_absent_content_is_not_found() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(false, "alice").await.unwrap();
        let raw = create(tx.as_mut(), None, "empty", TYPE_CONTENT).await.0.to_string();
        let err = NodeContent
            .delete_property(tx.as_mut(), &raw, &Params::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn child_content_requires_the_parent_relationship() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(false, "alice").await.unwrap();
        let folder = create(tx.as_mut(), None, "docs", TYPE_FOLDER).await;
        let other = create(tx.as_mut(), None, "other", TYPE_FOLDER).await;
        let child = create(tx.as_mut(), Some(folder), "a.bin", TYPE_CONTENT).await;
        let content = BasicContent::from_content_type(Bytes::from_static(b"\x00\x01"), None);

        ChildContent
            .update_property(tx.as_mut(), &folder.0.to_string(), &child.0.to_string(), &content, &Params::default())
            .await
            .unwrap();
        let err = ChildContent
            .read_property(tx.as_mut(), &other.0.to_string(), &child.0.to_string(), &Params::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = NodeContent
            .update_property(tx.as_mut(), &folder.0.to_string(), &content, &Params::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }
}

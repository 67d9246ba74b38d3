use super::{load, load_child, node_json, NodeBody};
use crate::error::ApiError;
use crate::resource::{Params, RelationshipResource};
use crate::response::CollectionWithPagingInfo;
use crate::store::{require_permission, NewNode, Permission, RepositoryTx, TYPE_CONTENT};
use async_trait::async_trait;
use serde_json::Value;

/// `/nodes/{entityId}/children[/{relationshipId}]`: the primary children of a folder.
pub struct NodeChildren;

#[async_trait]
impl RelationshipResource for NodeChildren {
    async fn read_all(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        params: &Params,
    ) -> Result<CollectionWithPagingInfo, ApiError> {
        let parent = load(tx, entity_id, Permission::Read).await?;
        let name_filter = params.filter("name");
        let mut visible = Vec::new();
        for child in tx.children(Some(parent.id)).await? {
            if name_filter.is_some_and(|n| n != child.name) {
                continue;
            }
            if require_permission(tx, child.id, Permission::Read).await.is_ok() {
                visible.push(node_json(&child));
            }
        }
        let paging = params.paging();
        Ok(CollectionWithPagingInfo::as_page(visible, paging.skip_count, paging.max_items))
    }

    async fn read_by_id(&self, tx: &mut dyn RepositoryTx, entity_id: &str, id: &str, _params: &Params) -> Result<Value, ApiError> {
        Ok(node_json(&load_child(tx, entity_id, id, Permission::Read).await?))
    }

    async fn create(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        entities: Vec<Value>,
        _params: &Params,
    ) -> Result<Vec<Value>, ApiError> {
        let parent = load(tx, entity_id, Permission::Write).await?;
        if !parent.is_folder() {
            return Err(ApiError::InvalidArgument(format!("{} is not a folder", entity_id)));
        }
        let mut created = Vec::with_capacity(entities.len());
        for entity in entities {
            let body = NodeBody::parse(entity)?;
            if body.parent_id.is_some() {
                return Err(ApiError::InvalidArgument("parentId is taken from the URL".into()));
            }
            let node = tx
                .create_node(NewNode {
                    parent_id: Some(parent.id),
                    name: body.required_name()?,
                    node_type: body.node_type.unwrap_or_else(|| TYPE_CONTENT.to_string()),
                    properties: body.properties,
                    aspects: body.aspect_names,
                    working_copy_of: None,
                })
                .await?;
            created.push(node_json(&node));
        }
        Ok(created)
    }

    async fn update(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        id: &str,
        entity: Value,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        let child = load_child(tx, entity_id, id, Permission::Write).await?;
        let body = NodeBody::parse(entity)?;
        if body.parent_id.is_some() || body.node_type.is_some() {
            return Err(ApiError::InvalidArgument("parentId and nodeType cannot be changed".into()));
        }
        let name = match body.name {
            Some(_) => Some(body.required_name()?),
            None => None,
        };
        Ok(node_json(&tx.update_node(child.id, name, body.properties).await?))
    }

    async fn delete(&self, tx: &mut dyn RepositoryTx, entity_id: &str, id: &str, _params: &Params) -> Result<(), ApiError> {
        let child = load_child(tx, entity_id, id, Permission::Delete).await?;
        tx.delete_node(child.id).await
    }
}

use super::{load, node_json, NodeBody};
use crate::error::ApiError;
use crate::resource::{ActionResource, EntityResource, Params};
use crate::response::CollectionWithPagingInfo;
use crate::store::{require_permission, NewNode, NodeRef, Permission, RepositoryTx, CONTENT_PROPERTY, TYPE_CONTENT};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// `/nodes` and `/nodes/{entityId}`.
pub struct Nodes;

#[async_trait]
impl EntityResource for Nodes {
    /// Top-level nodes the user may read.
    async fn read_all(&self, tx: &mut dyn RepositoryTx, params: &Params) -> Result<CollectionWithPagingInfo, ApiError> {
        let mut visible = Vec::new();
        for node in tx.children(None).await? {
            if require_permission(tx, node.id, Permission::Read).await.is_ok() {
                visible.push(node_json(&node));
            }
        }
        let paging = params.paging();
        Ok(CollectionWithPagingInfo::as_page(visible, paging.skip_count, paging.max_items))
    }

    async fn read_by_id(&self, tx: &mut dyn RepositoryTx, id: &str, _params: &Params) -> Result<Value, ApiError> {
        Ok(node_json(&load(tx, id, Permission::Read).await?))
    }

    async fn create(&self, tx: &mut dyn RepositoryTx, entities: Vec<Value>, _params: &Params) -> Result<Vec<Value>, ApiError> {
        let mut created = Vec::with_capacity(entities.len());
        for entity in entities {
            let body = NodeBody::parse(entity)?;
            let name = body.required_name()?;
            let parent_id = match body.parent_id.as_deref() {
                Some(raw) => {
                    let parent = load(tx, raw, Permission::Write).await?;
                    if !parent.is_folder() {
                        return Err(ApiError::InvalidArgument(format!("parent {} is not a folder", raw)));
                    }
                    Some(parent.id)
                }
                None => None,
            };
            let node = tx
                .create_node(NewNode {
                    parent_id,
                    name,
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

    async fn update(&self, tx: &mut dyn RepositoryTx, id: &str, entity: Value, _params: &Params) -> Result<Value, ApiError> {
        let node = load(tx, id, Permission::Write).await?;
        let body = NodeBody::parse(entity)?;
        if body.parent_id.is_some() || body.node_type.is_some() {
            return Err(ApiError::InvalidArgument("parentId and nodeType cannot be changed".into()));
        }
        let name = match body.name {
            Some(_) => Some(body.required_name()?),
            None => None,
        };
        let updated = tx.update_node(node.id, name, body.properties).await?;
        Ok(node_json(&updated))
    }

    async fn delete(&self, tx: &mut dyn RepositoryTx, id: &str, _params: &Params) -> Result<(), ApiError> {
        let node = load(tx, id, Permission::Delete).await?;
        tx.delete_node(node.id).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CopyBody {
    target_parent_id: Option<String>,
    name: Option<String>,
}

/// `POST /nodes/{entityId}/copy`: copy a node (properties, aspects and content) under a folder.
pub struct CopyNode;

#[async_trait]
impl ActionResource for CopyNode {
    async fn execute(&self, tx: &mut dyn RepositoryTx, entity_id: Option<&str>, params: &Params) -> Result<Value, ApiError> {
        let entity_id = entity_id.ok_or_else(|| ApiError::unsupported("copy requires a node id"))?;
        let source = load(tx, entity_id, Permission::Read).await?;
        let body: CopyBody = match params.body() {
            Value::Null => CopyBody {
                target_parent_id: None,
                name: None,
            },
            value => serde_json::from_value(value.clone())
                .map_err(|e| ApiError::InvalidArgument(format!("invalid copy body: {}", e)))?,
        };

        let target_parent: Option<NodeRef> = match body.target_parent_id.as_deref().map(str::parse::<NodeRef>).transpose()? {
            Some(parent) => Some(parent),
            None => source.parent_id,
        };
        if let Some(parent) = target_parent {
            let folder = load(tx, &parent.0.to_string(), Permission::Write).await?;
            if !folder.is_folder() {
                return Err(ApiError::InvalidArgument("copy target is not a folder".into()));
            }
        }
        let name = body.name.unwrap_or_else(|| source.name.clone());

        let copy = tx
            .create_node(NewNode {
                parent_id: target_parent,
                name,
                node_type: source.node_type.clone(),
                properties: source.properties.clone(),
                aspects: source.aspects.clone(),
                working_copy_of: None,
            })
            .await?;
        if let Some(data) = tx.content(source.id, CONTENT_PROPERTY).await? {
            if let Some(bytes) = tx.read_content(source.id, CONTENT_PROPERTY).await? {
                tx.write_content(copy.id, CONTENT_PROPERTY, bytes, &data.mimetype, &data.encoding)
                    .await?;
            }
        }
        tracing::debug!(source = %source.id, copy = %copy.id, "Copied node");
        Ok(node_json(&copy))
    }
}

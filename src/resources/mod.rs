//! Built-in `nodes` API (`public/alfresco/versions/1`) over the repository, plus the cached
//! upstream `extranet` lookups.

mod children;
mod content;
mod lookups;
mod nodes;
mod references;

pub use children::NodeChildren;
pub use content::{ChildContent, NodeContent};
pub use lookups::FilterRecords;
pub use nodes::{CopyNode, Nodes};
pub use references::NodeReferences;

use crate::cache::CachedLookup;
use crate::error::{ApiError, ConfigError};
use crate::resource::{Api, ApiScope, HttpMethod, Resource, ResourceKind, ResourceMetadata, ResourceRegistry};
use crate::service::capability::CHANGE_OR_DELETE_REFERENCES;
use crate::store::{require_permission, Node, NodeRef, Permission, RepositoryTx};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const NODES_API_NAME: &str = "alfresco";
pub const LOOKUP_API_NAME: &str = "extranet";

pub fn nodes_api() -> Api {
    Api::new(ApiScope::Public, NODES_API_NAME, 1)
}

/// Register every built-in resource of the nodes API.
pub fn register_nodes_api(registry: &mut ResourceRegistry) -> Result<(), ConfigError> {
    use HttpMethod::{Delete, Get, Post, Put};
    let api = nodes_api();
    let meta = |id: &str, kind: ResourceKind| ResourceMetadata::new(api.clone(), id, kind);

    registry.register(
        meta("/nodes", ResourceKind::Entity).supports(&[Get, Post, Put, Delete]),
        Resource::Entity(Arc::new(Nodes)),
    )?;
    registry.register(
        meta("/nodes/{entityId}/children", ResourceKind::Relationship).supports(&[Get, Post, Put, Delete]),
        Resource::Relationship(Arc::new(NodeChildren)),
    )?;
    registry.register(
        meta("/nodes/{entityId}/references", ResourceKind::Relationship)
            .supports(&[Get])
            .with_capability(Post, CHANGE_OR_DELETE_REFERENCES)
            .with_capability(Delete, CHANGE_OR_DELETE_REFERENCES),
        Resource::Relationship(Arc::new(NodeReferences)),
    )?;
    registry.register(
        meta("/nodes/{entityId}/content", ResourceKind::Property).supports(&[Get, Put, Delete]),
        Resource::Property(Arc::new(NodeContent)),
    )?;
    registry.register(
        meta("/nodes/{entityId}/children/{relationshipId}/content", ResourceKind::Property).supports(&[Get, Put, Delete]),
        Resource::RelationshipProperty(Arc::new(ChildContent)),
    )?;
    registry.register(
        meta("/nodes/{entityId}/copy", ResourceKind::Action).with_status(Post, StatusCode::CREATED),
        Resource::Action(Arc::new(CopyNode)),
    )?;
    Ok(())
}

pub fn lookup_api() -> Api {
    Api::new(ApiScope::Public, LOOKUP_API_NAME, 1)
}

/// Register the upstream lookups served through `lookup`.
pub fn register_lookup_api(registry: &mut ResourceRegistry, lookup: Arc<CachedLookup>) -> Result<(), ConfigError> {
    registry.register(
        ResourceMetadata::new(lookup_api(), "/filters/{entityId}/checkins", ResourceKind::Relationship)
            .supports(&[HttpMethod::Get]),
        Resource::Relationship(Arc::new(FilterRecords::new(lookup))),
    )
}

/// JSON shape of a node in API responses.
pub fn node_json(node: &Node) -> Value {
    json!({
        "id": node.id.0.to_string(),
        "parentId": node.parent_id.map(|p| p.0.to_string()),
        "name": node.name,
        "nodeType": node.node_type,
        "isFolder": node.is_folder(),
        "isWorkingCopy": node.working_copy_of.is_some(),
        "aspectNames": node.aspects,
        "properties": node.properties,
        "modifiedAt": node.modified_at.to_rfc3339(),
    })
}

/// Fetch a node by API id and check `permission` on it.
pub(crate) async fn load(tx: &mut dyn RepositoryTx, id: &str, permission: Permission) -> Result<Node, ApiError> {
    let node_ref: NodeRef = id.parse()?;
    let node = tx
        .get_node(node_ref)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("node {}", id)))?;
    require_permission(tx, node_ref, permission).await?;
    Ok(node)
}

/// Fetch `child_id` and check that it sits directly under `parent_id`.
pub(crate) async fn load_child(
    tx: &mut dyn RepositoryTx,
    parent_id: &str,
    child_id: &str,
    permission: Permission,
) -> Result<Node, ApiError> {
    let parent: NodeRef = parent_id.parse()?;
    let child = load(tx, child_id, permission).await?;
    if child.parent_id != Some(parent) {
        return Err(ApiError::not_found(format!("{} is not a child of {}", child_id, parent_id)));
    }
    Ok(child)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct NodeBody {
    pub name: Option<String>,
    pub node_type: Option<String>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub aspect_names: BTreeSet<String>,
}

impl NodeBody {
    pub fn parse(value: Value) -> Result<Self, ApiError> {
        serde_json::from_value(value).map_err(|e| ApiError::InvalidArgument(format!("invalid node body: {}", e)))
    }

    pub fn required_name(&self) -> Result<String, ApiError> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && !n.contains('/'))
            .map(String::from)
            .ok_or_else(|| ApiError::InvalidArgument("node name is required and must not contain '/'".into()))
    }
}

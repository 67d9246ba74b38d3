//! Content repository capability interface: node lookup, permission checks, content read/write.
//! Handlers only see a [`RepositoryTx`]; the concrete store is injected through [`Repository`].

pub mod memory;
pub mod pg;

pub use memory::MemoryRepository;
pub use pg::{ensure_database_exists, ensure_repository_tables, PgRepository};

use crate::error::ApiError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use tokio::io::AsyncRead;
use uuid::Uuid;

pub const CONTENT_PROPERTY: &str = "cm:content";
pub const TYPE_FOLDER: &str = "cm:folder";
pub const TYPE_CONTENT: &str = "cm:content";

/// Authority that matches every user in ACL entries.
pub const EVERYONE: &str = "GROUP_EVERYONE";
/// User the dispatcher runs as for resources marked no-auth.
pub const SYSTEM_USER: &str = "System";
/// ACL permission name matching every permission.
pub const ALL_PERMISSIONS: &str = "All";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRef(pub Uuid);

impl NodeRef {
    pub fn new() -> Self {
        NodeRef(Uuid::new_v4())
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workspace://SpacesStore/{}", self.0)
    }
}

impl FromStr for NodeRef {
    type Err = ApiError;

    /// Accepts a bare UUID or a `workspace://SpacesStore/<uuid>` reference.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let id = raw.rsplit('/').next().unwrap_or(raw);
        Uuid::parse_str(id)
            .map(NodeRef)
            .map_err(|_| ApiError::NotFound(format!("invalid node id: {}", s)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeRef,
    pub parent_id: Option<NodeRef>,
    pub name: String,
    pub node_type: String,
    pub properties: Map<String, Value>,
    pub aspects: BTreeSet<String>,
    /// Set on a checked-out working copy: the node it was copied from.
    pub working_copy_of: Option<NodeRef>,
    pub version: i64,
    pub modified_at: DateTime<Utc>,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.node_type == TYPE_FOLDER
    }

    pub fn has_aspect(&self, aspect: &str) -> bool {
        self.aspects.contains(aspect)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewNode {
    pub parent_id: Option<NodeRef>,
    pub name: String,
    pub node_type: String,
    pub properties: Map<String, Value>,
    pub aspects: BTreeSet<String>,
    pub working_copy_of: Option<NodeRef>,
}

/// Metadata of a stored content property.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentData {
    pub mimetype: String,
    pub encoding: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    Delete,
    ReadContent,
    Filing,
    ChangeOrDeleteReferences,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "Read",
            Permission::Write => "Write",
            Permission::Delete => "Delete",
            Permission::ReadContent => "ReadContent",
            Permission::Filing => "Filing",
            Permission::ChangeOrDeleteReferences => "ChangeOrDeleteReferences",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessStatus {
    Allowed,
    Denied,
    Undetermined,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub authority: String,
    pub permission: String,
    pub allowed: bool,
}

/// Evaluate ACL levels ordered from the node itself up to the root. The closest level with a
/// matching entry decides (deny beats allow within a level); no matching entry anywhere allows.
pub fn evaluate_acl(levels: &[Vec<AccessControlEntry>], authority: &str, permission: Permission) -> AccessStatus {
    for level in levels {
        let matching: Vec<&AccessControlEntry> = level
            .iter()
            .filter(|e| e.authority == authority || e.authority == EVERYONE)
            .filter(|e| e.permission == permission.as_str() || e.permission == ALL_PERMISSIONS)
            .collect();
        if matching.iter().any(|e| !e.allowed) {
            return AccessStatus::Denied;
        }
        if !matching.is_empty() {
            return AccessStatus::Allowed;
        }
    }
    AccessStatus::Allowed
}

/// Merge a property patch into `target`; null values remove keys.
pub fn merge_properties(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (k, v) in patch {
        if v.is_null() {
            target.remove(&k);
        } else {
            target.insert(k, v);
        }
    }
}

/// Entry point to the repository. Opens transactions and reads content bytes outside of them.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn begin(&self, read_only: bool, user: &str) -> Result<Box<dyn RepositoryTx>, ApiError>;

    /// Open a reader over a content property; `None` when no content is stored.
    async fn open_content(&self, node: NodeRef, property: &str) -> Result<Option<ContentReader>, ApiError>;
}

/// One repository transaction bound to a user. Writes become visible to others only after commit.
#[async_trait]
pub trait RepositoryTx: Send {
    fn is_read_only(&self) -> bool;

    fn user(&self) -> &str;

    async fn get_node(&mut self, id: NodeRef) -> Result<Option<Node>, ApiError>;

    /// Children of `parent`, or top-level nodes when `parent` is `None`, ordered by name.
    async fn children(&mut self, parent: Option<NodeRef>) -> Result<Vec<Node>, ApiError>;

    async fn child_by_name(&mut self, parent: Option<NodeRef>, name: &str) -> Result<Option<Node>, ApiError>;

    async fn working_copy(&mut self, original: NodeRef) -> Result<Option<Node>, ApiError>;

    async fn create_node(&mut self, node: NewNode) -> Result<Node, ApiError>;

    /// Merge `properties` into the node (null values remove keys) and optionally rename it.
    async fn update_node(
        &mut self,
        id: NodeRef,
        name: Option<String>,
        properties: Map<String, Value>,
    ) -> Result<Node, ApiError>;

    /// Delete the node with its descendants, content and references.
    async fn delete_node(&mut self, id: NodeRef) -> Result<(), ApiError>;

    async fn content(&mut self, id: NodeRef, property: &str) -> Result<Option<ContentData>, ApiError>;

    /// Stored bytes of a content property, read inside the transaction.
    async fn read_content(&mut self, id: NodeRef, property: &str) -> Result<Option<Vec<u8>>, ApiError>;

    async fn write_content(
        &mut self,
        id: NodeRef,
        property: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: &str,
    ) -> Result<ContentData, ApiError>;

    async fn delete_content(&mut self, id: NodeRef, property: &str) -> Result<bool, ApiError>;

    async fn references(&mut self, source: NodeRef) -> Result<Vec<NodeRef>, ApiError>;

    async fn add_reference(&mut self, source: NodeRef, target: NodeRef) -> Result<(), ApiError>;

    async fn remove_reference(&mut self, source: NodeRef, target: NodeRef) -> Result<bool, ApiError>;

    async fn has_permission(&mut self, id: NodeRef, permission: Permission) -> Result<AccessStatus, ApiError>;

    async fn commit(self: Box<Self>) -> Result<(), ApiError>;

    async fn rollback(self: Box<Self>) -> Result<(), ApiError>;
}

/// Fail with `PermissionDenied` unless `permission` is allowed on `id` for the transaction's user.
pub async fn require_permission(tx: &mut dyn RepositoryTx, id: NodeRef, permission: Permission) -> Result<(), ApiError> {
    match tx.has_permission(id, permission).await? {
        AccessStatus::Denied => Err(ApiError::PermissionDenied(format!(
            "{} on {} denied for {}",
            permission.as_str(),
            id,
            tx.user()
        ))),
        AccessStatus::Allowed | AccessStatus::Undetermined => Ok(()),
    }
}

/// Resolve a slash-separated path of node names from the top level down.
pub async fn resolve_path(tx: &mut dyn RepositoryTx, path: &str) -> Result<Option<Node>, ApiError> {
    let mut current: Option<Node> = None;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let parent = current.as_ref().map(|n| n.id);
        match tx.child_by_name(parent, segment).await? {
            Some(child) => current = Some(child),
            None => return Ok(None),
        }
    }
    Ok(current)
}

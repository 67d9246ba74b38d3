//! In-memory repository. Each transaction works on a snapshot; commit validates per-node
//! versions and reports a transient conflict when another transaction changed a touched node.

use crate::error::ApiError;
use crate::store::{
    evaluate_acl, merge_properties, AccessControlEntry, AccessStatus, ContentData, ContentReader, NewNode, Node, NodeRef, Permission,
    Repository, RepositoryTx,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug)]
struct StoredContent {
    data: ContentData,
    bytes: Arc<Vec<u8>>,
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    nodes: HashMap<NodeRef, Node>,
    content: HashMap<(NodeRef, String), StoredContent>,
    acl: HashMap<NodeRef, Vec<AccessControlEntry>>,
    references: HashMap<NodeRef, BTreeSet<NodeRef>>,
}

impl MemoryState {
    fn acl_levels(&self, id: NodeRef) -> Vec<Vec<AccessControlEntry>> {
        let mut levels = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            levels.push(self.acl.get(&node.id).cloned().unwrap_or_default());
            current = node.parent_id.and_then(|p| self.nodes.get(&p));
        }
        levels
    }

    fn permission(&self, id: NodeRef, authority: &str, permission: Permission) -> AccessStatus {
        if !self.nodes.contains_key(&id) {
            return AccessStatus::Undetermined;
        }
        evaluate_acl(&self.acl_levels(id), authority, permission)
    }

    fn descendants(&self, id: NodeRef) -> Vec<NodeRef> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            let parent = out[i];
            out.extend(self.nodes.values().filter(|n| n.parent_id == Some(parent)).map(|n| n.id));
            i += 1;
        }
        out
    }
}

#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ACL entry directly, outside any transaction.
    pub fn set_permission(&self, node: NodeRef, authority: &str, permission: &str, allowed: bool) -> Result<(), ApiError> {
        let mut state = self.state.write().map_err(|_| ApiError::Internal("repository lock poisoned".into()))?;
        state.acl.entry(node).or_default().push(AccessControlEntry {
            authority: authority.to_string(),
            permission: permission.to_string(),
            allowed,
        });
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.state.read().map(|s| s.nodes.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn begin(&self, read_only: bool, user: &str) -> Result<Box<dyn RepositoryTx>, ApiError> {
        let snapshot = self
            .state
            .read()
            .map_err(|_| ApiError::Internal("repository lock poisoned".into()))?
            .clone();
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            working: snapshot,
            touched: HashMap::new(),
            read_only,
            user: user.to_string(),
        }))
    }

    async fn open_content(&self, node: NodeRef, property: &str) -> Result<Option<ContentReader>, ApiError> {
        let state = self.state.read().map_err(|_| ApiError::Internal("repository lock poisoned".into()))?;
        Ok(state.content.get(&(node, property.to_string())).map(|c| {
            let reader: ContentReader = Box::pin(Cursor::new(c.bytes.as_ref().clone()));
            reader
        }))
    }
}

pub struct MemoryTx {
    shared: Arc<RwLock<MemoryState>>,
    working: MemoryState,
    /// Node id -> version seen in the snapshot (`None` for nodes created in this transaction).
    touched: HashMap<NodeRef, Option<i64>>,
    read_only: bool,
    user: String,
}

impl MemoryTx {
    fn ensure_writable(&self, operation: &str) -> Result<(), ApiError> {
        if self.read_only {
            return Err(ApiError::ReadOnlyTransaction(operation.to_string()));
        }
        Ok(())
    }

    fn touch(&mut self, id: NodeRef) {
        let seen = self.working.nodes.get(&id).map(|n| n.version);
        self.touched.entry(id).or_insert(seen);
    }

    fn existing(&self, id: NodeRef) -> Result<&Node, ApiError> {
        self.working
            .nodes
            .get(&id)
            .ok_or_else(|| ApiError::NotFound(format!("node {}", id)))
    }

    fn mark_modified(&mut self, id: NodeRef) {
        if let Some(node) = self.working.nodes.get_mut(&id) {
            node.modified_at = Utc::now();
        }
    }
}

/// A node written by a committing transaction must still have its parent, and must not share
/// its name with a sibling committed by someone else since the snapshot was taken.
fn placement_still_valid(
    committed: &MemoryState,
    working: &MemoryState,
    touched: &HashMap<NodeRef, Option<i64>>,
    node: &Node,
) -> Result<(), ApiError> {
    if let Some(parent) = node.parent_id {
        let parent_exists = if touched.contains_key(&parent) {
            working.nodes.contains_key(&parent)
        } else {
            committed.nodes.contains_key(&parent)
        };
        if !parent_exists {
            return Err(ApiError::TransientConflict(format!("parent {} of {} was deleted concurrently", parent, node.id)));
        }
    }
    if node.working_copy_of.is_some() {
        return Ok(());
    }
    let clash = committed.nodes.values().any(|other| {
        other.id != node.id
            && !touched.contains_key(&other.id)
            && other.working_copy_of.is_none()
            && other.parent_id == node.parent_id
            && other.name == node.name
    });
    if clash {
        return Err(ApiError::TransientConflict(format!("name {} was taken concurrently", node.name)));
    }
    Ok(())
}

#[async_trait]
impl RepositoryTx for MemoryTx {
    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn user(&self) -> &str {
        &self.user
    }

    async fn get_node(&mut self, id: NodeRef) -> Result<Option<Node>, ApiError> {
        Ok(self.working.nodes.get(&id).cloned())
    }

    async fn children(&mut self, parent: Option<NodeRef>) -> Result<Vec<Node>, ApiError> {
        let mut out: Vec<Node> = self
            .working
            .nodes
            .values()
            .filter(|n| n.parent_id == parent && n.working_copy_of.is_none())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn child_by_name(&mut self, parent: Option<NodeRef>, name: &str) -> Result<Option<Node>, ApiError> {
        Ok(self
            .working
            .nodes
            .values()
            .find(|n| n.parent_id == parent && n.name == name && n.working_copy_of.is_none())
            .cloned())
    }

    async fn working_copy(&mut self, original: NodeRef) -> Result<Option<Node>, ApiError> {
        Ok(self
            .working
            .nodes
            .values()
            .find(|n| n.working_copy_of == Some(original))
            .cloned())
    }

    async fn create_node(&mut self, node: NewNode) -> Result<Node, ApiError> {
        self.ensure_writable("create node")?;
        if let Some(parent) = node.parent_id {
            self.existing(parent)?;
        }
        let duplicate = node.working_copy_of.is_none()
            && self
                .working
                .nodes
                .values()
                .any(|n| n.parent_id == node.parent_id && n.name == node.name && n.working_copy_of.is_none());
        if duplicate {
            return Err(ApiError::Conflict(format!("name already exists: {}", node.name)));
        }
        let created = Node {
            id: NodeRef::new(),
            parent_id: node.parent_id,
            name: node.name,
            node_type: node.node_type,
            properties: node.properties,
            aspects: node.aspects,
            working_copy_of: node.working_copy_of,
            version: 1,
            modified_at: Utc::now(),
        };
        self.touch(created.id);
        self.working.nodes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_node(
        &mut self,
        id: NodeRef,
        name: Option<String>,
        properties: Map<String, Value>,
    ) -> Result<Node, ApiError> {
        self.ensure_writable("update node")?;
        self.existing(id)?;
        self.touch(id);
        let node = self
            .working
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound(format!("node {}", id)))?;
        if let Some(name) = name {
            node.name = name;
        }
        merge_properties(&mut node.properties, properties);
        node.modified_at = Utc::now();
        Ok(node.clone())
    }

    async fn delete_node(&mut self, id: NodeRef) -> Result<(), ApiError> {
        self.ensure_writable("delete node")?;
        self.existing(id)?;
        let victims: BTreeSet<NodeRef> = self.working.descendants(id).into_iter().collect();
        for &victim in &victims {
            self.touch(victim);
            self.working.nodes.remove(&victim);
            self.working.content.retain(|(node, _), _| *node != victim);
            self.working.references.remove(&victim);
            self.working.acl.remove(&victim);
        }
        let sources: Vec<NodeRef> = self.working.references.keys().copied().collect();
        for source in sources {
            let changed = self
                .working
                .references
                .get_mut(&source)
                .map(|targets| {
                    let before = targets.len();
                    targets.retain(|t| !victims.contains(t));
                    targets.len() != before
                })
                .unwrap_or(false);
            if changed {
                self.touch(source);
            }
        }
        Ok(())
    }

    async fn content(&mut self, id: NodeRef, property: &str) -> Result<Option<ContentData>, ApiError> {
        Ok(self
            .working
            .content
            .get(&(id, property.to_string()))
            .map(|c| c.data.clone()))
    }

    async fn read_content(&mut self, id: NodeRef, property: &str) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(self
            .working
            .content
            .get(&(id, property.to_string()))
            .map(|c| c.bytes.as_ref().clone()))
    }

    async fn write_content(
        &mut self,
        id: NodeRef,
        property: &str,
        data: Vec<u8>,
        mimetype: &str,
        encoding: &str,
    ) -> Result<ContentData, ApiError> {
        self.ensure_writable("write content")?;
        self.existing(id)?;
        self.touch(id);
        let info = ContentData {
            mimetype: mimetype.to_string(),
            encoding: encoding.to_string(),
            size: data.len() as u64,
            modified_at: Utc::now(),
        };
        self.working.content.insert(
            (id, property.to_string()),
            StoredContent {
                data: info.clone(),
                bytes: Arc::new(data),
            },
        );
        self.mark_modified(id);
        Ok(info)
    }

    async fn delete_content(&mut self, id: NodeRef, property: &str) -> Result<bool, ApiError> {
        self.ensure_writable("delete content")?;
        self.existing(id)?;
        self.touch(id);
        let removed = self.working.content.remove(&(id, property.to_string())).is_some();
        if removed {
            self.mark_modified(id);
        }
        Ok(removed)
    }

    async fn references(&mut self, source: NodeRef) -> Result<Vec<NodeRef>, ApiError> {
        Ok(self
            .working
            .references
            .get(&source)
            .map(|t| t.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn add_reference(&mut self, source: NodeRef, target: NodeRef) -> Result<(), ApiError> {
        self.ensure_writable("add reference")?;
        self.existing(source)?;
        self.existing(target)?;
        self.touch(source);
        if !self.working.references.entry(source).or_default().insert(target) {
            return Err(ApiError::Conflict(format!("{} already references {}", source, target)));
        }
        Ok(())
    }

    async fn remove_reference(&mut self, source: NodeRef, target: NodeRef) -> Result<bool, ApiError> {
        self.ensure_writable("remove reference")?;
        self.existing(source)?;
        self.touch(source);
        Ok(self
            .working
            .references
            .get_mut(&source)
            .map(|t| t.remove(&target))
            .unwrap_or(false))
    }

    async fn has_permission(&mut self, id: NodeRef, permission: Permission) -> Result<AccessStatus, ApiError> {
        Ok(self.working.permission(id, &self.user, permission))
    }

    async fn commit(self: Box<Self>) -> Result<(), ApiError> {
        if self.touched.is_empty() {
            return Ok(());
        }
        let MemoryTx {
            shared,
            mut working,
            touched,
            ..
        } = *self;
        let mut state = shared
            .write()
            .map_err(|_| ApiError::Internal("repository lock poisoned".into()))?;
        for (id, seen) in &touched {
            let current = state.nodes.get(id).map(|n| n.version);
            if current != *seen {
                return Err(ApiError::TransientConflict(format!("node {} was modified concurrently", id)));
            }
        }
        for id in touched.keys() {
            if let Some(node) = working.nodes.get(id) {
                placement_still_valid(&state, &working, &touched, node)?;
            }
        }
        for (id, seen) in touched {
            state.content.retain(|(node, _), _| *node != id);
            match working.nodes.remove(&id) {
                Some(mut node) => {
                    node.version = seen.map_or(1, |v| v + 1);
                    state.nodes.insert(id, node);
                    let keys: Vec<(NodeRef, String)> =
                        working.content.keys().filter(|(node, _)| *node == id).cloned().collect();
                    for key in keys {
                        if let Some(content) = working.content.remove(&key) {
                            state.content.insert(key, content);
                        }
                    }
                    match working.references.remove(&id) {
                        Some(targets) => state.references.insert(id, targets),
                        None => state.references.remove(&id),
                    };
                }
                None => {
                    state.nodes.remove(&id);
                    state.references.remove(&id);
                    state.acl.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ApiError> {
        tracing::trace!(touched = self.touched.len(), "memory transaction rolled back");
        Ok(())
    }
}

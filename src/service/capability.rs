//! Named capabilities evaluated against a source and target node before a resource operation runs.

use crate::error::ApiError;
use crate::store::{AccessStatus, NodeRef, Permission, RepositoryTx};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub const CHANGE_OR_DELETE_REFERENCES: &str = "ChangeOrDeleteReferences";

/// Aspect marking a node as part of a records-management file plan.
pub const ASPECT_FILE_PLAN_COMPONENT: &str = "rma:filePlanComponent";
pub const ASPECT_FROZEN: &str = "rma:frozen";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
    Abstain,
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    /// Decision for a single node.
    async fn has_permission(&self, tx: &mut dyn RepositoryTx, node: NodeRef) -> Result<AccessDecision, ApiError>;

    /// Decision for an operation linking `source` to `target`. Defaults to the source-only check.
    async fn evaluate(
        &self,
        tx: &mut dyn RepositoryTx,
        source: NodeRef,
        _target: NodeRef,
    ) -> Result<AccessDecision, ApiError> {
        self.has_permission(tx, source).await
    }
}

/// Grants changing or deleting a reference only when both ends are records-management nodes,
/// both are fileable and not frozen, and the user holds the permission on both.
pub struct ChangeOrDeleteReferencesCapability;

impl ChangeOrDeleteReferencesCapability {
    async fn is_rm(tx: &mut dyn RepositoryTx, node: NodeRef) -> Result<bool, ApiError> {
        Ok(tx
            .get_node(node)
            .await?
            .map(|n| n.has_aspect(ASPECT_FILE_PLAN_COMPONENT))
            .unwrap_or(false))
    }

    async fn filing_unfrozen(tx: &mut dyn RepositoryTx, node: NodeRef) -> Result<bool, ApiError> {
        let frozen = tx.get_node(node).await?.map(|n| n.has_aspect(ASPECT_FROZEN)).unwrap_or(true);
        if frozen {
            return Ok(false);
        }
        Ok(tx.has_permission(node, Permission::Filing).await? == AccessStatus::Allowed)
    }

    async fn allowed(tx: &mut dyn RepositoryTx, node: NodeRef) -> Result<bool, ApiError> {
        Ok(tx.has_permission(node, Permission::ChangeOrDeleteReferences).await? == AccessStatus::Allowed)
    }
}

#[async_trait]
impl Capability for ChangeOrDeleteReferencesCapability {
    fn name(&self) -> &str {
        CHANGE_OR_DELETE_REFERENCES
    }

    async fn has_permission(&self, _tx: &mut dyn RepositoryTx, _node: NodeRef) -> Result<AccessDecision, ApiError> {
        Ok(AccessDecision::Abstain)
    }

    async fn evaluate(
        &self,
        tx: &mut dyn RepositoryTx,
        source: NodeRef,
        target: NodeRef,
    ) -> Result<AccessDecision, ApiError> {
        if !Self::is_rm(tx, source).await? {
            return Ok(AccessDecision::Abstain);
        }
        let granted = Self::is_rm(tx, target).await?
            && Self::filing_unfrozen(tx, source).await?
            && Self::filing_unfrozen(tx, target).await?
            && Self::allowed(tx, source).await?
            && Self::allowed(tx, target).await?;
        Ok(if granted {
            AccessDecision::Granted
        } else {
            AccessDecision::Denied
        })
    }
}

/// Registry of capabilities by name.
#[derive(Clone, Default)]
pub struct CapabilityService {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service with the built-in capabilities registered.
    pub fn with_defaults() -> Self {
        let mut service = Self::new();
        service.register(Arc::new(ChangeOrDeleteReferencesCapability));
        service
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.insert(capability.name().to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Evaluate a capability; an unknown name is a configuration fault.
    pub async fn check(
        &self,
        name: &str,
        tx: &mut dyn RepositoryTx,
        source: NodeRef,
        target: NodeRef,
    ) -> Result<AccessDecision, ApiError> {
        let capability = self
            .get(name)
            .ok_or_else(|| ApiError::Internal(format!("unknown capability: {}", name)))?;
        let decision = capability.evaluate(tx, source, target).await?;
        tracing::debug!(capability = name, ?decision, "capability evaluated");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepository, NewNode, Repository, TYPE_FOLDER};
    use std::collections::BTreeSet;

    async fn node(repo: &MemoryRepository, name: &str, aspects: &[&str]) -> NodeRef {
        let mut tx = repo.begin(false, "admin").await.unwrap();
        let created = tx
            .create_node(NewNode {
                name: name.into(),
                node_type: TYPE_FOLDER.into(),
                aspects: aspects.iter().map(|a| a.to_string()).collect::<BTreeSet<_>>(),
                ..Default::default()
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        created.id
    }

    async fn decide(repo: &MemoryRepository, user: &str, source: NodeRef, target: NodeRef) -> AccessDecision {
        let service = CapabilityService::with_defaults();
        let mut tx = repo.begin(true, user).await.unwrap();
        service
            .check(CHANGE_OR_DELETE_REFERENCES, tx.as_mut(), source, target)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn abstains_when_source_is_not_records_managed() {
        let repo = MemoryRepository::new();
        let plain = node(&repo, "plain", &[]).await;
        let record = node(&repo, "record", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        assert_eq!(decide(&repo, "alice", plain, record).await, AccessDecision::Abstain);
    }

    #[tokio::test]
    async fn grants_between_unfrozen_records() {
        let repo = MemoryRepository::new();
        let a = node(&repo, "a", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        let b = node(&repo, "b", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        assert_eq!(decide(&repo, "alice", a, b).await, AccessDecision::Granted);
    }

    #[tokio::test]
    async fn denies_when_target_is_frozen_or_not_records_managed() {
        let repo = MemoryRepository::new();
        let a = node(&repo, "a", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        let frozen = node(&repo, "frozen", &[ASPECT_FILE_PLAN_COMPONENT, ASPECT_FROZEN]).await;
        let plain = node(&repo, "plain", &[]).await;
        assert_eq!(decide(&repo, "alice", a, frozen).await, AccessDecision::Denied);
        assert_eq!(decide(&repo, "alice", a, plain).await, AccessDecision::Denied);
    }

    #[tokio::test]
    async fn denies_without_permission_on_target() {
        let repo = MemoryRepository::new();
        let a = node(&repo, "a", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        let b = node(&repo, "b", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        repo.set_permission(b, "bob", CHANGE_OR_DELETE_REFERENCES, false).unwrap();
        assert_eq!(decide(&repo, "bob", a, b).await, AccessDecision::Denied);
        assert_eq!(decide(&repo, "alice", a, b).await, AccessDecision::Granted);
    }

    #[tokio::test]
    async fn single_node_check_abstains() {
        let repo = MemoryRepository::new();
        let a = node(&repo, "a", &[ASPECT_FILE_PLAN_COMPONENT]).await;
        let mut tx = repo.begin(true, "alice").await.unwrap();
        let decision = ChangeOrDeleteReferencesCapability
            .has_permission(tx.as_mut(), a)
            .await
            .unwrap();
        assert_eq!(decision, AccessDecision::Abstain);
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error() {
        let repo = MemoryRepository::new();
        let a = node(&repo, "a", &[]).await;
        let mut tx = repo.begin(true, "alice").await.unwrap();
        let err = CapabilityService::new().check("Nope", tx.as_mut(), a, a).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}

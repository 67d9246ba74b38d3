use super::{load, node_json};
use crate::error::ApiError;
use crate::resource::{Params, RelationshipResource};
use crate::response::CollectionWithPagingInfo;
use crate::store::{NodeRef, Permission, RepositoryTx};
use async_trait::async_trait;
use serde_json::Value;

/// `/nodes/{entityId}/references[/{relationshipId}]`: peer associations from a node. Changes are
/// guarded by the ChangeOrDeleteReferences capability declared on the resource.
pub struct NodeReferences;

fn target_id(entity: &Value) -> Result<&str, ApiError> {
    entity
        .get("targetId")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::InvalidArgument("targetId is required".into()))
}

#[async_trait]
impl RelationshipResource for NodeReferences {
    async fn read_all(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        params: &Params,
    ) -> Result<CollectionWithPagingInfo, ApiError> {
        let source = load(tx, entity_id, Permission::Read).await?;
        let mut targets = Vec::new();
        for target in tx.references(source.id).await? {
            if let Some(node) = tx.get_node(target).await? {
                targets.push(node_json(&node));
            }
        }
        let paging = params.paging();
        Ok(CollectionWithPagingInfo::as_page(targets, paging.skip_count, paging.max_items))
    }

    async fn read_by_id(&self, tx: &mut dyn RepositoryTx, entity_id: &str, id: &str, _params: &Params) -> Result<Value, ApiError> {
        let source = load(tx, entity_id, Permission::Read).await?;
        let target: NodeRef = id.parse()?;
        if !tx.references(source.id).await?.contains(&target) {
            return Err(ApiError::not_found(format!("{} does not reference {}", entity_id, id)));
        }
        Ok(node_json(&load(tx, id, Permission::Read).await?))
    }

    async fn create(
        &self,
        tx: &mut dyn RepositoryTx,
        entity_id: &str,
        entities: Vec<Value>,
        _params: &Params,
    ) -> Result<Vec<Value>, ApiError> {
        let source = load(tx, entity_id, Permission::Write).await?;
        let mut created = Vec::with_capacity(entities.len());
        for entity in entities {
            let target = load(tx, target_id(&entity)?, Permission::Read).await?;
            tx.add_reference(source.id, target.id).await?;
            created.push(node_json(&target));
        }
        Ok(created)
    }

    async fn delete(&self, tx: &mut dyn RepositoryTx, entity_id: &str, id: &str, _params: &Params) -> Result<(), ApiError> {
        let source = load(tx, entity_id, Permission::Write).await?;
        let target: NodeRef = id.parse()?;
        if !tx.remove_reference(source.id, target).await? {
            return Err(ApiError::not_found(format!("{} does not reference {}", entity_id, id)));
        }
        Ok(())
    }
}

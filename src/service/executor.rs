//! Action executor: runs a located resource's handler inside a retrying transaction and fixes
//! the response status before the transaction ends.

use crate::error::ApiError;
use crate::resource::{BinaryResource, HttpMethod, Params, Resource, ResourceWithMetadata};
use crate::response::CollectionWithPagingInfo;
use crate::service::capability::{AccessDecision, CapabilityService};
use crate::service::transaction::{RetryingTransactionHelper, UnitOfWork};
use crate::store::{NodeRef, RepositoryTx, SYSTEM_USER};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{Map, Value};

/// Result of a handler, before rendering.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Empty,
    One(Value),
    Many(CollectionWithPagingInfo),
    Binary(BinaryResource),
}

/// One resource call as a unit of work. Holds only borrowed, immutable request state so that
/// a retried attempt starts from the same inputs.
pub struct ResourceInvocation<'a> {
    pub resource: &'a ResourceWithMetadata,
    pub method: HttpMethod,
    pub params: &'a Params,
    pub capabilities: &'a CapabilityService,
}

#[async_trait]
impl<'a> UnitOfWork for ResourceInvocation<'a> {
    type Output = (StatusCode, Outcome);

    async fn execute(&self, tx: &mut dyn RepositoryTx) -> Result<Self::Output, ApiError> {
        let metadata = &self.resource.metadata;
        let operation = metadata
            .operation(self.method)
            .ok_or_else(|| ApiError::unsupported(format!("{} {}", self.method, metadata.unique_id)))?;
        if operation.deleted {
            return Err(ApiError::DeletedResource(format!("({}) {}", self.method, metadata.unique_id)));
        }
        if let Some(capability) = &operation.capability {
            self.check_capability(capability, tx).await?;
        }
        let outcome = invoke(&self.resource.resource, self.method, tx, self.params).await?;
        Ok((operation.success_status, project_fields(outcome, self.params.fields())))
    }
}

impl<'a> ResourceInvocation<'a> {
    async fn check_capability(&self, name: &str, tx: &mut dyn RepositoryTx) -> Result<(), ApiError> {
        let source: NodeRef = self
            .params
            .entity_id()
            .ok_or_else(|| ApiError::InvalidArgument(format!("{} requires an entity id", name)))?
            .parse()?;
        for target in self.capability_targets(source)? {
            if self.capabilities.check(name, tx, source, target).await? == AccessDecision::Denied {
                return Err(ApiError::PermissionDenied(format!(
                    "{} denied for {} on {} -> {}",
                    name,
                    tx.user(),
                    source,
                    target
                )));
            }
        }
        Ok(())
    }

    /// Targets the capability is evaluated against: the relationship id, else every `targetId`
    /// in the body (object or list), else the source itself.
    fn capability_targets(&self, source: NodeRef) -> Result<Vec<NodeRef>, ApiError> {
        if let Some(raw) = self.params.relationship_id() {
            return Ok(vec![raw.parse()?]);
        }
        let mut targets = Vec::new();
        for item in self.params.body_items() {
            if let Some(raw) = item.get("targetId").and_then(Value::as_str) {
                targets.push(raw.parse()?);
            }
        }
        if targets.is_empty() {
            targets.push(source);
        }
        Ok(targets)
    }
}

fn missing(what: &str) -> ApiError {
    ApiError::unsupported(format!("missing {}", what))
}

/// Created entities: a single object answers with one entry, a list with a collection.
fn created(items: Vec<Value>, as_list: bool) -> Result<Outcome, ApiError> {
    if as_list {
        let n = items.len();
        return Ok(Outcome::Many(CollectionWithPagingInfo::as_page(items, 0, n)));
    }
    items
        .into_iter()
        .next()
        .map(Outcome::One)
        .ok_or_else(|| ApiError::Internal("create returned no entity".into()))
}

async fn invoke(
    resource: &Resource,
    method: HttpMethod,
    tx: &mut dyn RepositoryTx,
    params: &Params,
) -> Result<Outcome, ApiError> {
    let entity_id = params.entity_id();
    let relationship_id = params.relationship_id();
    match (resource, method) {
        (Resource::Entity(r), HttpMethod::Get) => match entity_id {
            Some(id) => Ok(Outcome::One(r.read_by_id(tx, id, params).await?)),
            None => Ok(Outcome::Many(r.read_all(tx, params).await?)),
        },
        (Resource::Entity(r), HttpMethod::Post) => {
            created(r.create(tx, params.body_items(), params).await?, params.body_is_list())
        }
        (Resource::Entity(r), HttpMethod::Put) => {
            let id = entity_id.ok_or_else(|| missing("entity id"))?;
            Ok(Outcome::One(r.update(tx, id, params.body().clone(), params).await?))
        }
        (Resource::Entity(r), HttpMethod::Delete) => {
            let id = entity_id.ok_or_else(|| missing("entity id"))?;
            r.delete(tx, id, params).await?;
            Ok(Outcome::Empty)
        }

        (Resource::Relationship(r), method) => {
            let entity_id = entity_id.ok_or_else(|| missing("entity id"))?;
            match (method, relationship_id) {
                (HttpMethod::Get, Some(id)) => Ok(Outcome::One(r.read_by_id(tx, entity_id, id, params).await?)),
                (HttpMethod::Get, None) => Ok(Outcome::Many(r.read_all(tx, entity_id, params).await?)),
                (HttpMethod::Post, _) => created(
                    r.create(tx, entity_id, params.body_items(), params).await?,
                    params.body_is_list(),
                ),
                (HttpMethod::Put, Some(id)) => {
                    Ok(Outcome::One(r.update(tx, entity_id, id, params.body().clone(), params).await?))
                }
                (HttpMethod::Delete, Some(id)) => {
                    r.delete(tx, entity_id, id, params).await?;
                    Ok(Outcome::Empty)
                }
                (_, None) => Err(missing("relationship id")),
            }
        }

        (Resource::Property(r), method) => {
            let entity_id = entity_id.ok_or_else(|| missing("entity id"))?;
            match method {
                HttpMethod::Get => Ok(Outcome::Binary(r.read_property(tx, entity_id, params).await?)),
                HttpMethod::Put => {
                    let content = params.content().ok_or_else(|| missing("content"))?;
                    Ok(Outcome::One(r.update_property(tx, entity_id, content, params).await?))
                }
                HttpMethod::Delete => {
                    r.delete_property(tx, entity_id, params).await?;
                    Ok(Outcome::Empty)
                }
                HttpMethod::Post => Err(ApiError::unsupported("POST not supported for Properties")),
            }
        }

        (Resource::RelationshipProperty(r), method) => {
            let entity_id = entity_id.ok_or_else(|| missing("entity id"))?;
            let id = relationship_id.ok_or_else(|| missing("relationship id"))?;
            match method {
                HttpMethod::Get => Ok(Outcome::Binary(r.read_property(tx, entity_id, id, params).await?)),
                HttpMethod::Put => {
                    let content = params.content().ok_or_else(|| missing("content"))?;
                    Ok(Outcome::One(r.update_property(tx, entity_id, id, content, params).await?))
                }
                HttpMethod::Delete => {
                    r.delete_property(tx, entity_id, id, params).await?;
                    Ok(Outcome::Empty)
                }
                HttpMethod::Post => Err(ApiError::unsupported("POST not supported for Properties")),
            }
        }

        (Resource::Action(r), HttpMethod::Post) => match r.execute(tx, entity_id, params).await? {
            Value::Null => Ok(Outcome::Empty),
            value => Ok(Outcome::One(value)),
        },
        (Resource::Action(_), method) => Err(ApiError::unsupported(format!("{} not supported for Actions", method))),
    }
}

/// Keep only the requested top-level fields of JSON results. Binary results pass through.
fn project_fields(outcome: Outcome, fields: &[String]) -> Outcome {
    if fields.is_empty() {
        return outcome;
    }
    let project = |value: Value| match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    };
    match outcome {
        Outcome::One(value) => Outcome::One(project(value)),
        Outcome::Many(mut page) => {
            page.entries = page.entries.into_iter().map(project).collect();
            Outcome::Many(page)
        }
        other => other,
    }
}

/// User the handler runs as: no-auth resources read as the system user.
pub fn effective_user<'p>(resource: &ResourceWithMetadata, method: HttpMethod, params: &'p Params) -> &'p str {
    if resource.metadata.no_auth && method == HttpMethod::Get {
        SYSTEM_USER
    } else {
        params.user()
    }
}

/// Execute `resource` for `method` in a retrying transaction (read-only for GET).
pub async fn execute(
    transactions: &RetryingTransactionHelper,
    capabilities: &CapabilityService,
    resource: &ResourceWithMetadata,
    method: HttpMethod,
    params: &Params,
) -> Result<(StatusCode, Outcome), ApiError> {
    let invocation = ResourceInvocation {
        resource,
        method,
        params,
        capabilities,
    };
    let read_only = method == HttpMethod::Get;
    let user = effective_user(resource, method, params);
    tracing::debug!(resource = %resource.metadata.unique_id, %method, read_only, user, "executing resource");
    transactions.do_in_transaction(&invocation, read_only, user).await
}

//! Resource registry and locator. The registry is filled at startup and frozen into a locator;
//! lookups never mutate.

use crate::error::{ApiError, ConfigError};
use crate::resource::metadata::{Api, HttpMethod, ResourceKind, ResourceMetadata};
use crate::resource::params::{VAR_COLLECTION, VAR_ENTITY_ID, VAR_PROPERTY, VAR_RELATIONSHIP, VAR_RELATIONSHIP_ID};
use crate::resource::Resource;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ResourceWithMetadata {
    pub resource: Resource,
    pub metadata: Arc<ResourceMetadata>,
}

impl ResourceWithMetadata {
    pub fn kind(&self) -> ResourceKind {
        self.metadata.kind
    }
}

/// Mutable registration phase.
#[derive(Default)]
pub struct ResourceRegistry {
    apis: HashMap<Api, HashMap<String, ResourceWithMetadata>>,
}

fn segments(unique_id: &str) -> Vec<&str> {
    unique_id.split('/').filter(|s| !s.is_empty()).collect()
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under its metadata's API and unique id. The id's shape must fit the
    /// handler: `/c` for entities, `/c/{entityId}/r` for relationships, properties and actions,
    /// `/c/{entityId}/r/{relationshipId}/p` for properties of related items.
    pub fn register(&mut self, metadata: ResourceMetadata, resource: Resource) -> Result<(), ConfigError> {
        let actual = resource.kind();
        if metadata.kind != actual {
            return Err(ConfigError::KindMismatch {
                id: metadata.unique_id.clone(),
                declared: metadata.kind.as_str(),
                actual: actual.as_str(),
            });
        }
        let depth = segments(&metadata.unique_id).len();
        let shape_ok = match &resource {
            Resource::Entity(_) => depth == 1,
            Resource::Relationship(_) | Resource::Property(_) | Resource::Action(_) => depth == 3,
            Resource::RelationshipProperty(_) => depth == 5,
        };
        if !shape_ok {
            return Err(ConfigError::Validation(format!(
                "unique id {} does not fit a {} resource",
                metadata.unique_id,
                actual.as_str()
            )));
        }
        let key = canonical_key(&segments(&metadata.unique_id));
        let entries = self.apis.entry(metadata.api.clone()).or_default();
        if entries.contains_key(&key) {
            return Err(ConfigError::DuplicateResource(format!("{} {}", metadata.api, metadata.unique_id)));
        }
        tracing::debug!(api = %metadata.api, id = %metadata.unique_id, kind = actual.as_str(), "resource registered");
        entries.insert(
            key,
            ResourceWithMetadata {
                resource,
                metadata: Arc::new(metadata),
            },
        );
        Ok(())
    }

    pub fn build(self) -> ResourceLocator {
        ResourceLocator { apis: self.apis }
    }
}

/// Key with the identifier segments replaced, so `/nodes/{id}/children` and
/// `/nodes/{entityId}/children` collide.
fn canonical_key(parts: &[&str]) -> String {
    parts
        .iter()
        .enumerate()
        .map(|(i, p)| if i % 2 == 1 { "{}" } else { *p })
        .collect::<Vec<_>>()
        .join("/")
}

pub struct ResourceLocator {
    apis: HashMap<Api, HashMap<String, ResourceWithMetadata>>,
}

impl ResourceLocator {
    /// Find the resource addressed by the template variables and check that it supports `method`.
    pub fn locate(
        &self,
        api: &Api,
        vars: &HashMap<String, String>,
        method: HttpMethod,
    ) -> Result<ResourceWithMetadata, ApiError> {
        let var = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
        let not_found = || ApiError::not_found(format!("unable to locate resource for {} {:?}", api, vars));
        let resources = self.apis.get(api).ok_or_else(not_found)?;
        let collection = var(VAR_COLLECTION).ok_or_else(not_found)?;

        let found = match (var(VAR_RELATIONSHIP), var(VAR_PROPERTY)) {
            (None, _) => resources.get(collection),
            (Some(relationship), None) => {
                let found = resources.get(&canonical_key(&[collection, "", relationship]));
                let has_relationship_id = var(VAR_RELATIONSHIP_ID).is_some();
                found.filter(|r| !has_relationship_id || r.kind() == ResourceKind::Relationship)
            }
            (Some(relationship), Some(property)) => {
                resources.get(&canonical_key(&[collection, "", relationship, "", property]))
            }
        };
        let found = found.ok_or_else(not_found)?;
        if var(VAR_ENTITY_ID).is_none() && found.kind() != ResourceKind::Entity {
            return Err(not_found());
        }
        if found.metadata.operation(method).is_none() {
            return Err(ApiError::unsupported(format!(
                "{} is not supported for {}",
                method, found.metadata.unique_id
            )));
        }
        Ok(found.clone())
    }

    pub fn resources(&self, api: &Api) -> Vec<Arc<ResourceMetadata>> {
        let mut out: Vec<Arc<ResourceMetadata>> = self
            .apis
            .get(api)
            .map(|r| r.values().map(|r| r.metadata.clone()).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::metadata::ApiScope;
    use crate::resource::params::Params;
    use crate::resource::{ActionResource, BinaryPropertyResource, EntityResource, RelationshipResource};
    use crate::store::RepositoryTx;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Things;
    impl EntityResource for Things {}

    struct Parts;
    impl RelationshipResource for Parts {}

    struct Photo;
    impl BinaryPropertyResource for Photo {}

    struct Ping;
    #[async_trait]
    impl ActionResource for Ping {
        async fn execute(&self, _tx: &mut dyn RepositoryTx, _id: Option<&str>, _p: &Params) -> Result<Value, ApiError> {
            Ok(Value::Null)
        }
    }

    fn api() -> Api {
        Api::new(ApiScope::Public, "test", 1)
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn locator() -> ResourceLocator {
        let mut registry = ResourceRegistry::new();
        registry
            .register(
                ResourceMetadata::new(api(), "/things", ResourceKind::Entity).supports(&[HttpMethod::Get, HttpMethod::Delete]),
                Resource::Entity(Arc::new(Things)),
            )
            .unwrap();
        registry
            .register(
                ResourceMetadata::new(api(), "/things/{entityId}/parts", ResourceKind::Relationship)
                    .supports(&[HttpMethod::Get]),
                Resource::Relationship(Arc::new(Parts)),
            )
            .unwrap();
        registry
            .register(
                ResourceMetadata::new(api(), "/things/{entityId}/photo", ResourceKind::Property)
                    .supports(&[HttpMethod::Get]),
                Resource::Property(Arc::new(Photo)),
            )
            .unwrap();
        registry
            .register(
                ResourceMetadata::new(api(), "/things/{entityId}/ping", ResourceKind::Action).supports(&[HttpMethod::Post]),
                Resource::Action(Arc::new(Ping)),
            )
            .unwrap();
        registry.build()
    }

    #[test]
    fn locates_each_kind_by_path_shape() {
        let locator = locator();
        let entity = locator.locate(&api(), &vars(&[(VAR_COLLECTION, "things")]), HttpMethod::Get).unwrap();
        assert_eq!(entity.kind(), ResourceKind::Entity);

        let base = [(VAR_COLLECTION, "things"), (VAR_ENTITY_ID, "t1")];
        for (name, kind, method) in [
            ("parts", ResourceKind::Relationship, HttpMethod::Get),
            ("photo", ResourceKind::Property, HttpMethod::Get),
            ("ping", ResourceKind::Action, HttpMethod::Post),
        ] {
            let mut v = vars(&base);
            v.insert(VAR_RELATIONSHIP.into(), name.into());
            assert_eq!(locator.locate(&api(), &v, method).unwrap().kind(), kind);
        }
    }

    #[test]
    fn unknown_path_or_api_is_not_found() {
        let locator = locator();
        let missing = vars(&[(VAR_COLLECTION, "nope")]);
        assert!(matches!(locator.locate(&api(), &missing, HttpMethod::Get), Err(ApiError::NotFound(_))));

        let other = Api::new(ApiScope::Private, "test", 1);
        let things = vars(&[(VAR_COLLECTION, "things")]);
        assert!(matches!(locator.locate(&other, &things, HttpMethod::Get), Err(ApiError::NotFound(_))));

        let deep = vars(&[
            (VAR_COLLECTION, "things"),
            (VAR_ENTITY_ID, "t1"),
            (VAR_RELATIONSHIP, "photo"),
            (VAR_RELATIONSHIP_ID, "x"),
        ]);
        assert!(matches!(locator.locate(&api(), &deep, HttpMethod::Get), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn undeclared_method_is_unsupported() {
        let locator = locator();
        let things = vars(&[(VAR_COLLECTION, "things")]);
        assert!(matches!(
            locator.locate(&api(), &things, HttpMethod::Put),
            Err(ApiError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn duplicate_and_mismatched_registrations_fail() {
        let mut registry = ResourceRegistry::new();
        let meta = || ResourceMetadata::new(api(), "/things", ResourceKind::Entity).supports(&[HttpMethod::Get]);
        registry.register(meta(), Resource::Entity(Arc::new(Things))).unwrap();
        assert!(matches!(
            registry.register(meta(), Resource::Entity(Arc::new(Things))),
            Err(ConfigError::DuplicateResource(_))
        ));
        assert!(matches!(
            registry.register(
                ResourceMetadata::new(api(), "/others", ResourceKind::Entity),
                Resource::Relationship(Arc::new(Parts))
            ),
            Err(ConfigError::KindMismatch { .. })
        ));
        assert!(matches!(
            registry.register(
                ResourceMetadata::new(api(), "/things/{entityId}", ResourceKind::Entity),
                Resource::Entity(Arc::new(Things))
            ),
            Err(ConfigError::Validation(_))
        ));
    }
}

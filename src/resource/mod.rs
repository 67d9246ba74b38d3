//! Resource handlers, their metadata and the locator that maps a request onto one.

pub mod content;
pub mod locator;
pub mod metadata;
pub mod params;

pub use content::{BasicContent, BinaryResource, ContentInfo};
pub use locator::{ResourceLocator, ResourceRegistry, ResourceWithMetadata};
pub use metadata::{Api, ApiScope, HttpMethod, OperationMeta, ResourceKind, ResourceMetadata};
pub use params::{Paging, Params, RequestData};

use crate::error::ApiError;
use crate::response::CollectionWithPagingInfo;
use crate::store::RepositoryTx;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A collection of entities addressed as `/{collection}` and `/{collection}/{entityId}`.
/// Every operation defaults to unsupported.
#[async_trait]
pub trait EntityResource: Send + Sync {
    async fn read_all(&self, _tx: &mut dyn RepositoryTx, _params: &Params) -> Result<CollectionWithPagingInfo, ApiError> {
        Err(ApiError::unsupported("read all"))
    }

    async fn read_by_id(&self, _tx: &mut dyn RepositoryTx, _id: &str, _params: &Params) -> Result<Value, ApiError> {
        Err(ApiError::unsupported("read by id"))
    }

    async fn create(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entities: Vec<Value>,
        _params: &Params,
    ) -> Result<Vec<Value>, ApiError> {
        Err(ApiError::unsupported("create"))
    }

    async fn update(
        &self,
        _tx: &mut dyn RepositoryTx,
        _id: &str,
        _entity: Value,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        Err(ApiError::unsupported("update"))
    }

    async fn delete(&self, _tx: &mut dyn RepositoryTx, _id: &str, _params: &Params) -> Result<(), ApiError> {
        Err(ApiError::unsupported("delete"))
    }
}

/// Items related to an entity: `/{collection}/{entityId}/{relationship}[/{relationshipId}]`.
#[async_trait]
pub trait RelationshipResource: Send + Sync {
    async fn read_all(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _params: &Params,
    ) -> Result<CollectionWithPagingInfo, ApiError> {
        Err(ApiError::unsupported("read all"))
    }

    async fn read_by_id(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _id: &str,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        Err(ApiError::unsupported("read by id"))
    }

    async fn create(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _entities: Vec<Value>,
        _params: &Params,
    ) -> Result<Vec<Value>, ApiError> {
        Err(ApiError::unsupported("create"))
    }

    async fn update(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _id: &str,
        _entity: Value,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        Err(ApiError::unsupported("update"))
    }

    async fn delete(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _id: &str,
        _params: &Params,
    ) -> Result<(), ApiError> {
        Err(ApiError::unsupported("delete"))
    }
}

/// Binary property of an entity: `/{collection}/{entityId}/{property}`.
#[async_trait]
pub trait BinaryPropertyResource: Send + Sync {
    async fn read_property(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _params: &Params,
    ) -> Result<BinaryResource, ApiError> {
        Err(ApiError::unsupported("read property"))
    }

    async fn update_property(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _content: &BasicContent,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        Err(ApiError::unsupported("update property"))
    }

    async fn delete_property(&self, _tx: &mut dyn RepositoryTx, _entity_id: &str, _params: &Params) -> Result<(), ApiError> {
        Err(ApiError::unsupported("delete property"))
    }
}

/// Binary property of a related item:
/// `/{collection}/{entityId}/{relationship}/{relationshipId}/{property}`.
#[async_trait]
pub trait RelationshipBinaryResource: Send + Sync {
    async fn read_property(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _id: &str,
        _params: &Params,
    ) -> Result<BinaryResource, ApiError> {
        Err(ApiError::unsupported("read property"))
    }

    async fn update_property(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _id: &str,
        _content: &BasicContent,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        Err(ApiError::unsupported("update property"))
    }

    async fn delete_property(
        &self,
        _tx: &mut dyn RepositoryTx,
        _entity_id: &str,
        _id: &str,
        _params: &Params,
    ) -> Result<(), ApiError> {
        Err(ApiError::unsupported("delete property"))
    }
}

/// Operation invoked with POST on `/{collection}/{entityId}/{action}`.
#[async_trait]
pub trait ActionResource: Send + Sync {
    async fn execute(&self, tx: &mut dyn RepositoryTx, entity_id: Option<&str>, params: &Params) -> Result<Value, ApiError>;
}

/// A registered handler, tagged by the shape of URL it serves.
#[derive(Clone)]
pub enum Resource {
    Entity(Arc<dyn EntityResource>),
    Relationship(Arc<dyn RelationshipResource>),
    Property(Arc<dyn BinaryPropertyResource>),
    RelationshipProperty(Arc<dyn RelationshipBinaryResource>),
    Action(Arc<dyn ActionResource>),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Entity(_) => ResourceKind::Entity,
            Resource::Relationship(_) => ResourceKind::Relationship,
            Resource::Property(_) | Resource::RelationshipProperty(_) => ResourceKind::Property,
            Resource::Action(_) => ResourceKind::Action,
        }
    }
}

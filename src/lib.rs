//! Resource SDK: REST resource web scripts over a content repository.
//! Locates a registered resource for each request, runs it inside a retrying transaction and
//! renders JSON, streamed binary content or a structured error.

pub mod cache;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod module_tool;
pub mod renderer;
pub mod resource;
pub mod resources;
pub mod response;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod streaming;

pub use cache::{CachedLookup, TtlCache, UpstreamSource};
pub use config::Settings;
pub use error::{ApiError, ConfigError};
pub use resource::{Api, ApiScope, HttpMethod, Resource, ResourceKind, ResourceLocator, ResourceMetadata, ResourceRegistry};
pub use resources::{lookup_api, nodes_api, register_lookup_api, register_nodes_api};
pub use response::{error_body, CollectionWithPagingInfo};
pub use routes::{api_routes, app_routes, common_routes, common_routes_with_ready, webdav_routes};
pub use service::{CapabilityService, RetryPolicy, RetryingTransactionHelper};
pub use state::AppState;
pub use store::{ensure_database_exists, ensure_repository_tables, MemoryRepository, PgRepository, Repository};

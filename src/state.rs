//! Shared application state for all routes. Everything here is immutable after startup.

use crate::config::DEFAULT_WEBDAV_CONTEXT;
use crate::resource::ResourceLocator;
use crate::service::{CapabilityService, RetryPolicy, RetryingTransactionHelper};
use crate::store::Repository;
use crate::streaming::ContentStreamer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub locator: Arc<ResourceLocator>,
    pub transactions: RetryingTransactionHelper,
    pub streamer: Arc<ContentStreamer>,
    pub capabilities: Arc<CapabilityService>,
    /// Path prefix stripped from WebDAV request paths, e.g. `/webdav`.
    pub webdav_context: Arc<str>,
}

impl AppState {
    /// State with the built-in capabilities and the default WebDAV context.
    pub fn new(repository: Arc<dyn Repository>, locator: ResourceLocator, retry: RetryPolicy) -> Self {
        Self {
            transactions: RetryingTransactionHelper::new(repository.clone(), retry),
            streamer: Arc::new(ContentStreamer::new(repository.clone())),
            capabilities: Arc::new(CapabilityService::with_defaults()),
            locator: Arc::new(locator),
            webdav_context: Arc::from(DEFAULT_WEBDAV_CONTEXT),
            repository,
        }
    }

    pub fn with_webdav_context(mut self, context: &str) -> Self {
        self.webdav_context = Arc::from(context);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityService) -> Self {
        self.capabilities = Arc::new(capabilities);
        self
    }
}

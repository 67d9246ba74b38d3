//! Resource metadata: kind, unique id, owning API and the operations declared per HTTP method.

use crate::error::ApiError;
use axum::http::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&Method> for HttpMethod {
    type Error = ApiError;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        match *method {
            Method::GET => Ok(HttpMethod::Get),
            Method::POST => Ok(HttpMethod::Post),
            Method::PUT => Ok(HttpMethod::Put),
            Method::DELETE => Ok(HttpMethod::Delete),
            _ => Err(ApiError::unsupported(format!("HTTP method {} not supported", method))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Entity,
    Relationship,
    Property,
    Action,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Entity => "entity",
            ResourceKind::Relationship => "relationship",
            ResourceKind::Property => "property",
            ResourceKind::Action => "action",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiScope {
    Public,
    Private,
}

/// A named, versioned API such as `public/alfresco/versions/1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Api {
    pub scope: ApiScope,
    pub name: String,
    pub version: u32,
}

impl Api {
    pub fn new(scope: ApiScope, name: impl Into<String>, version: u32) -> Self {
        Self {
            scope,
            name: name.into(),
            version,
        }
    }

    /// Parse the scope, name and version template variables. Anything unknown is NotFound.
    pub fn parse(scope: &str, name: &str, version: &str) -> Result<Self, ApiError> {
        let scope = match scope.to_ascii_lowercase().as_str() {
            "public" => ApiScope::Public,
            "private" => ApiScope::Private,
            _ => return Err(ApiError::not_found(format!("invalid API scope: {}", scope))),
        };
        let version = version
            .trim()
            .parse::<u32>()
            .map_err(|_| ApiError::not_found(format!("invalid API version: {}", version)))?;
        if name.trim().is_empty() {
            return Err(ApiError::not_found("missing API name"));
        }
        Ok(Api::new(scope, name.trim(), version))
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            ApiScope::Public => "public",
            ApiScope::Private => "private",
        };
        write!(f, "{}/{}/versions/{}", scope, self.name, self.version)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationMeta {
    pub success_status: StatusCode,
    /// Operation existed in an earlier API version; calls answer 410 Gone.
    pub deleted: bool,
    /// Capability evaluated against the entity (and target) before the handler runs.
    pub capability: Option<String>,
}

impl OperationMeta {
    pub fn for_method(kind: ResourceKind, method: HttpMethod) -> Self {
        let success_status = match (kind, method) {
            (ResourceKind::Action, HttpMethod::Post) => StatusCode::OK,
            (_, HttpMethod::Get) | (_, HttpMethod::Put) => StatusCode::OK,
            (_, HttpMethod::Post) => StatusCode::CREATED,
            (_, HttpMethod::Delete) => StatusCode::NO_CONTENT,
        };
        Self {
            success_status,
            deleted: false,
            capability: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResourceMetadata {
    pub unique_id: String,
    pub kind: ResourceKind,
    pub api: Api,
    pub operations: HashMap<HttpMethod, OperationMeta>,
    /// Binary reads run as the system user.
    pub no_auth: bool,
}

impl ResourceMetadata {
    pub fn new(api: Api, unique_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            unique_id: unique_id.into(),
            kind,
            api,
            operations: HashMap::new(),
            no_auth: false,
        }
    }

    pub fn supports(mut self, methods: &[HttpMethod]) -> Self {
        let kind = self.kind;
        for method in methods {
            self.operations
                .entry(*method)
                .or_insert_with(|| OperationMeta::for_method(kind, *method));
        }
        self
    }

    pub fn deleted(mut self, method: HttpMethod) -> Self {
        let kind = self.kind;
        self.operations
            .entry(method)
            .or_insert_with(|| OperationMeta::for_method(kind, method))
            .deleted = true;
        self
    }

    pub fn with_capability(mut self, method: HttpMethod, capability: &str) -> Self {
        let kind = self.kind;
        self.operations
            .entry(method)
            .or_insert_with(|| OperationMeta::for_method(kind, method))
            .capability = Some(capability.to_string());
        self
    }

    pub fn with_status(mut self, method: HttpMethod, status: StatusCode) -> Self {
        let kind = self.kind;
        self.operations
            .entry(method)
            .or_insert_with(|| OperationMeta::for_method(kind, method))
            .success_status = status;
        self
    }

    pub fn no_auth(mut self) -> Self {
        self.no_auth = true;
        self
    }

    pub fn operation(&self, method: HttpMethod) -> Option<&OperationMeta> {
        self.operations.get(&method)
    }
}

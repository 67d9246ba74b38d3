//! Per-method parameter extraction. `Params` is built once per request and never mutated.

use crate::error::ApiError;
use crate::resource::content::BasicContent;
use crate::resource::metadata::{HttpMethod, ResourceKind};
use axum::body::Bytes;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const VAR_API_SCOPE: &str = "apiScope";
pub const VAR_API_NAME: &str = "apiName";
pub const VAR_API_VERSION: &str = "apiVersion";
pub const VAR_COLLECTION: &str = "collectionResource";
pub const VAR_ENTITY_ID: &str = "entityId";
pub const VAR_RELATIONSHIP: &str = "relationshipResource";
pub const VAR_RELATIONSHIP_ID: &str = "relationshipId";
pub const VAR_PROPERTY: &str = "property";

pub const DEFAULT_SKIP_COUNT: usize = 0;
pub const DEFAULT_MAX_ITEMS: usize = 100;

const PARAM_SKIP_COUNT: &str = "skipCount";
const PARAM_MAX_ITEMS: &str = "maxItems";
const PARAM_FIELDS: &str = "fields";
const PARAM_INCLUDE: &str = "include";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paging {
    pub skip_count: usize,
    pub max_items: usize,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            skip_count: DEFAULT_SKIP_COUNT,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

impl Paging {
    fn from_query(query: &HashMap<String, String>) -> Result<Self, ApiError> {
        let skip_count = match query.get(PARAM_SKIP_COUNT) {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ApiError::InvalidArgument(format!("invalid skipCount: {}", raw)))?,
            None => DEFAULT_SKIP_COUNT,
        };
        let max_items = match query.get(PARAM_MAX_ITEMS) {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| ApiError::InvalidArgument(format!("invalid maxItems: {}", raw)))?,
            None => DEFAULT_MAX_ITEMS,
        };
        Ok(Self {
            skip_count,
            max_items,
        })
    }
}

/// Raw request pieces the extractors work from.
#[derive(Clone, Debug, Default)]
pub struct RequestData {
    pub vars: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub user: String,
}

impl RequestData {
    /// Template variable, trimmed; blank values count as absent.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Params {
    pub(crate) entity_id: Option<String>,
    pub(crate) relationship_id: Option<String>,
    pub(crate) property_name: Option<String>,
    pub(crate) paging: Paging,
    pub(crate) fields: Vec<String>,
    pub(crate) include: Vec<String>,
    pub(crate) filters: BTreeMap<String, String>,
    pub(crate) body: Value,
    pub(crate) body_is_list: bool,
    pub(crate) content: Option<BasicContent>,
    pub(crate) user: String,
}

impl Params {
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn relationship_id(&self) -> Option<&str> {
        self.relationship_id.as_deref()
    }

    pub fn property_name(&self) -> Option<&str> {
        self.property_name.as_deref()
    }

    pub fn paging(&self) -> Paging {
        self.paging
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_is_list(&self) -> bool {
        self.body_is_list
    }

    /// Body as a list of items: the array elements, or the single object.
    pub fn body_items(&self) -> Vec<Value> {
        match &self.body {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    pub fn content(&self) -> Option<&BasicContent> {
        self.content.as_ref()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Extract parameters for `method` on a resource of `kind`, validating required identifiers.
    pub fn extract(method: HttpMethod, kind: ResourceKind, req: &RequestData) -> Result<Self, ApiError> {
        match method {
            HttpMethod::Get => Self::extract_get(kind, req),
            HttpMethod::Post => Self::extract_post(kind, req),
            HttpMethod::Put => Self::extract_put(kind, req),
            HttpMethod::Delete => Self::extract_delete(kind, req),
        }
    }

    fn base(req: &RequestData) -> Result<Self, ApiError> {
        let split = |key: &str| -> Vec<String> {
            req.query
                .get(key)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };
        let filters = req
            .query
            .iter()
            .filter(|(k, _)| {
                ![PARAM_SKIP_COUNT, PARAM_MAX_ITEMS, PARAM_FIELDS, PARAM_INCLUDE].contains(&k.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Params {
            paging: Paging::from_query(&req.query)?,
            fields: split(PARAM_FIELDS),
            include: split(PARAM_INCLUDE),
            filters,
            user: req.user.clone(),
            ..Default::default()
        })
    }

    fn extract_get(kind: ResourceKind, req: &RequestData) -> Result<Self, ApiError> {
        let mut params = Self::base(req)?;
        match kind {
            ResourceKind::Entity => {
                params.entity_id = req.var(VAR_ENTITY_ID).map(String::from);
            }
            ResourceKind::Relationship => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "GET")?);
                params.relationship_id = req.var(VAR_RELATIONSHIP_ID).map(String::from);
            }
            ResourceKind::Property => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "GET")?);
                params.relationship_id = req.var(VAR_RELATIONSHIP_ID).map(String::from);
                params.property_name = property_name(req);
            }
            ResourceKind::Action => return Err(ApiError::unsupported("GET not supported for Actions")),
        }
        Ok(params)
    }

    fn extract_post(kind: ResourceKind, req: &RequestData) -> Result<Self, ApiError> {
        let mut params = Self::base(req)?;
        match kind {
            ResourceKind::Entity => {
                if req.var(VAR_ENTITY_ID).is_some() {
                    return Err(ApiError::unsupported("POST is executed against the collection URL"));
                }
                params.set_json_body(req, true)?;
            }
            ResourceKind::Relationship => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "POST")?);
                if req.var(VAR_RELATIONSHIP_ID).is_some() {
                    return Err(ApiError::unsupported("POST is executed against the collection URL"));
                }
                params.set_json_body(req, true)?;
            }
            ResourceKind::Property => return Err(ApiError::unsupported("POST not supported for Properties")),
            ResourceKind::Action => {
                params.entity_id = req.var(VAR_ENTITY_ID).map(String::from);
                params.set_json_body(req, false)?;
            }
        }
        Ok(params)
    }

    fn extract_put(kind: ResourceKind, req: &RequestData) -> Result<Self, ApiError> {
        let mut params = Self::base(req)?;
        match kind {
            ResourceKind::Entity => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "PUT")?);
                params.set_json_object(req)?;
            }
            ResourceKind::Relationship => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "PUT")?);
                params.relationship_id = Some(required(req, VAR_RELATIONSHIP_ID, "PUT")?);
                params.set_json_object(req)?;
            }
            ResourceKind::Property => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "PUT")?);
                params.relationship_id = req.var(VAR_RELATIONSHIP_ID).map(String::from);
                params.property_name = property_name(req);
                params.content = Some(BasicContent::from_content_type(
                    req.body.clone(),
                    req.content_type.as_deref(),
                ));
            }
            ResourceKind::Action => return Err(ApiError::unsupported("PUT not supported for Actions")),
        }
        Ok(params)
    }

    fn extract_delete(kind: ResourceKind, req: &RequestData) -> Result<Self, ApiError> {
        let mut params = Self::base(req)?;
        match kind {
            ResourceKind::Entity => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "DELETE")?);
            }
            ResourceKind::Relationship => {
                params.entity_id = Some(required(req, VAR_ENTITY_ID, "DELETE")?);
                params.relationship_id = Some(required(req, VAR_RELATIONSHIP_ID, "DELETE")?);
            }
            ResourceKind::Property => {
                let entity_id = req.var(VAR_ENTITY_ID);
                let resource_name = req.var(VAR_RELATIONSHIP);
                let (Some(entity_id), Some(resource_name)) = (entity_id, resource_name) else {
                    return Err(ApiError::unsupported(
                        "DELETE is executed against the instance URL and requires entity id and property name",
                    ));
                };
                params.entity_id = Some(entity_id.to_string());
                match req.var(VAR_PROPERTY) {
                    Some(property) => {
                        params.relationship_id = req.var(VAR_RELATIONSHIP_ID).map(String::from);
                        params.property_name = Some(property.to_string());
                    }
                    None => params.property_name = Some(resource_name.to_string()),
                }
            }
            ResourceKind::Action => return Err(ApiError::unsupported("DELETE not supported for Actions")),
        }
        Ok(params)
    }

    /// Parse the JSON body; arrays are accepted only when `allow_list` is set. An empty body is
    /// an error unless `allow_list` is false (actions may be invoked without one).
    fn set_json_body(&mut self, req: &RequestData, allow_list: bool) -> Result<(), ApiError> {
        if req.body.iter().all(u8::is_ascii_whitespace) {
            if allow_list {
                return Err(ApiError::InvalidArgument("request body is required".into()));
            }
            self.body = Value::Null;
            return Ok(());
        }
        let value: Value = serde_json::from_slice(&req.body)
            .map_err(|e| ApiError::InvalidArgument(format!("could not read content from HTTP request body: {}", e)))?;
        match value {
            Value::Array(_) if allow_list => self.body_is_list = true,
            Value::Object(_) => {}
            _ => return Err(ApiError::InvalidArgument("request body must be a JSON object".into())),
        }
        self.body = value;
        Ok(())
    }

    fn set_json_object(&mut self, req: &RequestData) -> Result<(), ApiError> {
        if req.body.iter().all(u8::is_ascii_whitespace) {
            return Err(ApiError::InvalidArgument("request body is required".into()));
        }
        self.set_json_body(req, false)
    }
}

fn required(req: &RequestData, var: &str, method: &str) -> Result<String, ApiError> {
    req.var(var)
        .map(String::from)
        .ok_or_else(|| ApiError::unsupported(format!("{} requires a non-blank {}", method, var)))
}

/// Property name from the trailing path segment: `property` under a relationship instance,
/// otherwise the resource name itself.
fn property_name(req: &RequestData) -> Option<String> {
    req.var(VAR_PROPERTY)
        .or_else(|| req.var(VAR_RELATIONSHIP))
        .map(String::from)
}

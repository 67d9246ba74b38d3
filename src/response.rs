//! Standard response envelope helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Single result: `{"entry": ...}`.
#[derive(Serialize)]
pub struct Entry<T> {
    pub entry: T,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub count: u64,
    pub has_more_items: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u64>,
    pub skip_count: u64,
    pub max_items: u64,
}

/// Collection result rendered as `{"list": {"pagination": ..., "entries": [{"entry": ...}]}}`.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionWithPagingInfo {
    pub entries: Vec<Value>,
    pub pagination: Pagination,
}

impl CollectionWithPagingInfo {
    /// Slice a fully materialized result according to skip/max and record whether more items remain.
    pub fn as_page(all: Vec<Value>, skip_count: usize, max_items: usize) -> Self {
        let total = all.len();
        let entries: Vec<Value> = all.into_iter().skip(skip_count).take(max_items).collect();
        let has_more_items = skip_count + entries.len() < total;
        CollectionWithPagingInfo {
            pagination: Pagination {
                count: entries.len() as u64,
                has_more_items,
                total_items: Some(total as u64),
                skip_count: skip_count as u64,
                max_items: max_items as u64,
            },
            entries,
        }
    }
}

pub fn error_body(code: &str, status_code: u16, message: String, details: Option<Value>) -> Value {
    serde_json::json!({
        "error": {
            "code": code,
            "statusCode": status_code,
            "message": message,
            "details": details
        }
    })
}

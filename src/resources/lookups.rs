use crate::cache::CachedLookup;
use crate::error::ApiError;
use crate::resource::{Params, RelationshipResource};
use crate::response::{CollectionWithPagingInfo, Pagination};
use crate::store::RepositoryTx;
use async_trait::async_trait;
use std::sync::Arc;

/// `/filters/{entityId}/checkins`: records an upstream service answers for a saved filter,
/// served from a time-bounded cache. The total is unknown, so one extra record is requested to
/// decide `hasMoreItems`.
pub struct FilterRecords {
    lookup: Arc<CachedLookup>,
}

impl FilterRecords {
    pub fn new(lookup: Arc<CachedLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl RelationshipResource for FilterRecords {
    async fn read_all(
        &self,
        _tx: &mut dyn RepositoryTx,
        entity_id: &str,
        params: &Params,
    ) -> Result<CollectionWithPagingInfo, ApiError> {
        let paging = params.paging();
        let start = paging.skip_count;
        let end = start.saturating_add(paging.max_items).saturating_add(1);
        // An unreachable upstream reads as an empty filter.
        let mut entries = self.lookup.page(entity_id, start, end).await.unwrap_or_default();
        let has_more_items = entries.len() > paging.max_items;
        entries.truncate(paging.max_items);
        Ok(CollectionWithPagingInfo {
            pagination: Pagination {
                count: entries.len() as u64,
                has_more_items,
                total_items: None,
                skip_count: start as u64,
                max_items: paging.max_items as u64,
            },
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::UpstreamSource;
    use crate::resource::Paging;
    use crate::store::{MemoryRepository, Repository};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Fixed(usize);

    #[async_trait]
    impl UpstreamSource for Fixed {
        async fn fetch(&self, filter_id: &str) -> Result<Vec<Value>, ApiError> {
            Ok((0..self.0).map(|i| json!({ "filter": filter_id, "key": i })).collect())
        }
    }

    struct Down;

    #[async_trait]
    impl UpstreamSource for Down {
        async fn fetch(&self, _filter_id: &str) -> Result<Vec<Value>, ApiError> {
            Err(ApiError::Internal("connection refused".into()))
        }
    }

    fn params(skip_count: usize, max_items: usize) -> Params {
        Params {
            paging: Paging { skip_count, max_items },
            ..Default::default()
        }
    }

    async fn read(source: Arc<dyn UpstreamSource>, skip: usize, max: usize) -> CollectionWithPagingInfo {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(true, "alice").await.unwrap();
        let resource = FilterRecords::new(Arc::new(CachedLookup::new(source, Duration::from_secs(300))));
        let page = resource.read_all(tx.as_mut(), "10010", &params(skip, max)).await.unwrap();
        tx.rollback().await.unwrap();
        page
    }

    #[tokio::test]
    async fn last_page_reports_no_more_items() {
        let page = read(Arc::new(Fixed(5)), 3, 2).await;
        assert_eq!(page.entries, vec![json!({"filter": "10010", "key": 3}), json!({"filter": "10010", "key": 4})]);
        assert!(!page.pagination.has_more_items);
        assert_eq!(page.pagination.total_items, None);

        let page = read(Arc::new(Fixed(6)), 3, 2).await;
        assert_eq!(page.pagination.count, 2);
        assert!(page.pagination.has_more_items);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_empty_page() {
        let page = read(Arc::new(Down), 0, 10).await;
        assert!(page.entries.is_empty());
        assert!(!page.pagination.has_more_items);
    }
}

//! Route builders. Each returns a stateless `Router` so callers can merge them freely.

pub mod api;
pub mod common;
pub mod webdav;

pub use api::{api_routes, API_ROOT};
pub use common::{common_routes, common_routes_with_ready};
pub use webdav::webdav_routes;

use crate::state::AppState;
use axum::Router;

/// Common, resource API and WebDAV routes over one state.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .merge(api_routes(state.clone()))
        .merge(webdav_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::REMOTE_USER_HEADER;
    use crate::resource::ResourceRegistry;
    use crate::cache::{CachedLookup, UpstreamSource};
    use crate::error::ApiError;
    use crate::resources::{register_lookup_api, register_nodes_api};
    use crate::service::capability::{ASPECT_FILE_PLAN_COMPONENT, ASPECT_FROZEN};
    use crate::service::RetryPolicy;
    use crate::store::{MemoryRepository, NewNode, NodeRef, Repository, CONTENT_PROPERTY, TYPE_CONTENT, TYPE_FOLDER};
    use crate::streaming::format_http_date;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{json, Value};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const NODES: &str = "/api/public/alfresco/versions/1/nodes";

    fn app() -> (Router, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let mut registry = ResourceRegistry::new();
        register_nodes_api(&mut registry).unwrap();
        let retry = RetryPolicy {
            max_retries: 3,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let state = AppState::new(repo.clone(), registry.build(), retry);
        (app_routes(state), repo)
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(REMOTE_USER_HEADER, "alice");
        match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seed(repo: &MemoryRepository, parent: Option<NodeRef>, name: &str, node_type: &str, wc: Option<NodeRef>) -> NodeRef {
        let mut tx = repo.begin(false, "admin").await.unwrap();
        let node = tx
            .create_node(NewNode {
                parent_id: parent,
                name: name.into(),
                node_type: node_type.into(),
                working_copy_of: wc,
                ..Default::default()
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        node.id
    }

    #[tokio::test]
    async fn delete_on_collection_is_method_not_allowed() {
        let (app, _) = app();
        let response = app.oneshot(request(Method::DELETE, NODES, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = json_body(response).await;
        assert_eq!(body["error"]["statusCode"], 405);
        assert_eq!(body["error"]["code"], "unsupported_operation");
    }

    #[tokio::test]
    async fn unknown_api_or_collection_is_not_found() {
        let (app, _) = app();
        for uri in ["/api/public/other/versions/1/nodes", "/api/public/alfresco/versions/1/sites", "/api/inner/alfresco/versions/1/nodes"] {
            let response = app.clone().oneshot(request(Method::GET, uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(json_body(response).await["error"]["statusCode"], 404);
        }
    }

    #[tokio::test]
    async fn other_http_methods_are_rejected() {
        let (app, _) = app();
        let response = app.oneshot(request(Method::PATCH, NODES, Some(json!({})))).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn create_then_read_round_trip() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(request(Method::POST, NODES, Some(json!({ "name": "Projects", "nodeType": TYPE_FOLDER }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        let created = json_body(response).await;
        let id = created["entry"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("{}/{}?fields=id,name", NODES, id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "entry": { "id": id, "name": "Projects" } }));

        let response = app.oneshot(request(Method::GET, NODES, None)).await.unwrap();
        let list = json_body(response).await;
        assert_eq!(list["list"]["pagination"]["count"], 1);
        assert_eq!(list["list"]["entries"][0]["entry"]["name"], "Projects");
    }

    #[tokio::test]
    async fn creating_a_list_answers_with_a_collection() {
        let (app, repo) = app();
        let root = seed(&repo, None, "root", TYPE_FOLDER, None).await;
        let uri = format!("{}/{}/children", NODES, root.0);
        let response = app
            .oneshot(request(Method::POST, &uri, Some(json!([{ "name": "a" }, { "name": "b" }]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["list"]["pagination"]["count"], 2);
    }

    #[tokio::test]
    async fn content_is_written_streamed_and_revalidated() {
        let (app, repo) = app();
        let doc = seed(&repo, None, "report.txt", TYPE_CONTENT, None).await;
        let uri = format!("{}/{}/content", NODES, doc.0);

        let put = Request::builder()
            .method(Method::PUT)
            .uri(&uri)
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(Body::from("hello world"))
            .unwrap();
        assert_eq!(app.clone().oneshot(put).await.unwrap().status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("{}?attachment=true", uri), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain;charset=UTF-8");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("filename=\"report.txt\""));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let later = format_http_date(Utc::now() + ChronoDuration::hours(1));
        let conditional = Request::builder()
            .uri(&uri)
            .header(header::IF_MODIFIED_SINCE, later)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(conditional).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        let response = app.clone().oneshot(request(Method::DELETE, &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.oneshot(request(Method::GET, &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn denied_content_read_is_forbidden() {
        let (app, repo) = app();
        let doc = seed(&repo, None, "secret.txt", TYPE_CONTENT, None).await;
        let mut tx = repo.begin(false, "admin").await.unwrap();
        tx.write_content(doc, CONTENT_PROPERTY, b"x".to_vec(), "text/plain", "UTF-8").await.unwrap();
        tx.commit().await.unwrap();
        repo.set_permission(doc, "alice", "ReadContent", false).unwrap();

        let uri = format!("{}/{}/content", NODES, doc.0);
        let response = app.oneshot(request(Method::GET, &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"]["code"], "permission_denied");
    }

    #[tokio::test]
    async fn references_to_a_frozen_target_are_forbidden_for_object_and_list_bodies() {
        let (app, repo) = app();
        let mut tx = repo.begin(false, "admin").await.unwrap();
        let mut created = Vec::new();
        for (name, aspects) in [
            ("record", vec![ASPECT_FILE_PLAN_COMPONENT]),
            ("held", vec![ASPECT_FILE_PLAN_COMPONENT, ASPECT_FROZEN]),
        ] {
            let node = tx
                .create_node(NewNode {
                    name: name.into(),
                    node_type: TYPE_FOLDER.into(),
                    aspects: aspects.into_iter().map(String::from).collect::<BTreeSet<_>>(),
                    ..Default::default()
                })
                .await
                .unwrap();
            created.push(node.id);
        }
        tx.commit().await.unwrap();
        let (source, frozen) = (created[0], created[1]);

        let uri = format!("{}/{}/references", NODES, source.0);
        let target = frozen.0.to_string();
        for body in [json!({ "targetId": target }), json!([{ "targetId": target }])] {
            let response = app
                .clone()
                .oneshot(request(Method::POST, &uri, Some(body.clone())))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", body);
            assert_eq!(json_body(response).await["error"]["code"], "permission_denied");
        }
    }

    #[tokio::test]
    async fn undecodable_path_segment_is_a_structured_bad_request() {
        let (app, _) = app();
        let uri = format!("{}/%FF", NODES);
        let response = app.oneshot(request(Method::GET, &uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "invalid_argument");
        assert_eq!(body["error"]["statusCode"], 400);
    }

    #[tokio::test]
    async fn copy_action_answers_created() {
        let (app, repo) = app();
        let folder = seed(&repo, None, "src", TYPE_FOLDER, None).await;
        let target = seed(&repo, None, "dst", TYPE_FOLDER, None).await;
        let doc = seed(&repo, Some(folder), "a.txt", TYPE_CONTENT, None).await;
        let uri = format!("{}/{}/copy", NODES, doc.0);
        let response = app
            .oneshot(request(Method::POST, &uri, Some(json!({ "targetParentId": target.0.to_string() }))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["entry"]["parentId"], target.0.to_string());
    }

    #[tokio::test]
    async fn webdav_put_targets_the_working_copy() {
        let (app, repo) = app();
        let folder = seed(&repo, None, "Sites", TYPE_FOLDER, None).await;
        let doc = seed(&repo, Some(folder), "plan.txt", TYPE_CONTENT, None).await;
        let wc = seed(&repo, Some(folder), "plan (Working Copy).txt", TYPE_CONTENT, Some(doc)).await;

        let put = Request::builder()
            .method(Method::PUT)
            .uri("/webdav/Sites/plan.txt")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("draft"))
            .unwrap();
        assert_eq!(app.clone().oneshot(put).await.unwrap().status(), StatusCode::NO_CONTENT);

        let mut tx = repo.begin(true, "admin").await.unwrap();
        assert_eq!(tx.read_content(wc, CONTENT_PROPERTY).await.unwrap().as_deref(), Some(&b"draft"[..]));
        assert!(tx.read_content(doc, CONTENT_PROPERTY).await.unwrap().is_none());
        tx.rollback().await.unwrap();

        let put = Request::builder()
            .method(Method::PUT)
            .uri("/webdav/Sites/New%20File.txt")
            .body(Body::from("new"))
            .unwrap();
        assert_eq!(app.oneshot(put).await.unwrap().status(), StatusCode::CREATED);
    }

    struct Issues {
        fetches: AtomicU32,
    }

    #[async_trait::async_trait]
    impl UpstreamSource for Issues {
        async fn fetch(&self, filter_id: &str) -> Result<Vec<Value>, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok((0..5).map(|i| json!({ "filter": filter_id, "key": format!("ISSUE-{}", i) })).collect())
        }
    }

    #[tokio::test]
    async fn filter_lookups_are_paged_from_one_cached_fetch() {
        let upstream = Arc::new(Issues { fetches: AtomicU32::new(0) });
        let mut registry = ResourceRegistry::new();
        let lookup = Arc::new(CachedLookup::new(upstream.clone(), Duration::from_secs(300)));
        register_lookup_api(&mut registry, lookup).unwrap();
        let retry = RetryPolicy {
            max_retries: 0,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let app = app_routes(AppState::new(Arc::new(MemoryRepository::new()), registry.build(), retry));
        let uri = "/api/public/extranet/versions/1/filters/10010/checkins";

        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("{}?skipCount=2&maxItems=2", uri), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["list"]["pagination"]["count"], 2);
        assert_eq!(body["list"]["pagination"]["hasMoreItems"], true);
        assert_eq!(body["list"]["entries"][0]["entry"]["key"], "ISSUE-2");

        let response = app
            .oneshot(request(Method::GET, &format!("{}?skipCount=4&maxItems=2", uri), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["list"]["pagination"]["count"], 1);
        assert_eq!(body["list"]["pagination"]["hasMoreItems"], false);
        assert_eq!(upstream.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_and_ready() {
        let (app, _) = app();
        let response = app.clone().oneshot(request(Method::GET, "/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(request(Method::GET, "/ready", None)).await.unwrap();
        assert_eq!(json_body(response).await["repository"], "ok");
    }
}

//! HTTP implementation of [`MaintenanceApi`] against the monitor backend.

use crate::api::{MaintenanceApi, StartSyncOutcome};
use crate::error::{MaintenanceError, Result};
use crate::sync_key::SyncKey;
use crate::types::{
    Candidate, CandidateId, CandidatePage, CandidateQuery, CrossServerMatch, LibraryItemId,
    RuleId, SyncStatusSnapshot,
};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::ByteStream;
use core_runtime::config::MonitorConfig;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const API_KEY_HEADER: &str = "X-Api-Key";

/// Error bodies larger than this are truncated before being surfaced.
const MAX_ERROR_BODY: usize = 4096;

#[derive(Serialize)]
struct StartSyncRequest<'a> {
    server_id: i64,
    library_id: &'a str,
}

#[derive(Serialize)]
struct BulkDeleteRequest<'a> {
    candidate_ids: &'a [CandidateId],
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Monitor backend client
///
/// # Example
///
/// ```ignore
/// use core_maintenance::HttpMaintenanceApi;
///
/// let api = HttpMaintenanceApi::from_config(&config);
/// let snapshot = api.sync_status().await?;
/// ```
pub struct HttpMaintenanceApi {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl HttpMaintenanceApi {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            Arc::clone(&config.http_client),
            config.base_url.clone(),
            config.api_key.clone(),
        )
        .with_timeout(config.request_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        let request = HttpRequest::new(method, self.url(path)).accept("application/json");
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key.clone()),
            None => request,
        }
    }

    /// Executes a buffered request and turns non-2xx statuses into `Api` errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.timeout(self.request_timeout);
        let response = self.http_client.execute(request).await?;
        Self::check(response)
    }

    /// Like [`send`](Self::send), but makes exactly one attempt. Used for
    /// calls with side effects on the backend (starting a sync, deleting an
    /// item), which must not be replayed.
    async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.timeout(self.request_timeout);
        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await?;
        Self::check(response)
    }

    fn check(response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(api_error(response.status, &response.body))
        }
    }

    fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
        serde_json::from_slice(&response.body).map_err(|e| MaintenanceError::Decode(e.to_string()))
    }
}

/// Builds an `Api` error, preferring the backend's `{error}` or `{message}` text.
fn api_error(status: u16, body: &[u8]) -> MaintenanceError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .unwrap_or_else(|| {
            let raw = String::from_utf8_lossy(&body[..body.len().min(MAX_ERROR_BODY)]);
            let raw = raw.trim();
            if raw.is_empty() {
                format!("HTTP {}", status)
            } else {
                raw.to_string()
            }
        });

    MaintenanceError::Api { status, message }
}

fn candidates_query_string(query: &CandidateQuery) -> String {
    let mut params = vec![
        format!("page={}", query.page),
        format!("per_page={}", query.per_page),
    ];

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        params.push(format!("search={}", urlencoding::encode(search)));
    }

    if let Some(sort) = &query.sort {
        params.push(format!("sort={}", sort.column.as_str()));
        params.push(format!("order={}", sort.direction.as_str()));
    }

    params.join("&")
}

#[async_trait]
impl MaintenanceApi for HttpMaintenanceApi {
    #[instrument(skip(self), fields(key = %key))]
    async fn start_sync(&self, key: &SyncKey) -> Result<StartSyncOutcome> {
        let request = self
            .request(HttpMethod::Post, "/api/sync/libraries")
            .json(&StartSyncRequest {
                server_id: key.server_id(),
                library_id: key.library_id(),
            })?;

        match self.send_once(request).await {
            Ok(_) => Ok(StartSyncOutcome::Started),
            Err(e) if e.is_conflict() => {
                debug!("Sync already running, joining it");
                Ok(StartSyncOutcome::AlreadyRunning)
            }
            Err(e) => Err(e),
        }
    }

    async fn sync_status(&self) -> Result<SyncStatusSnapshot> {
        let response = self
            .send(self.request(HttpMethod::Get, "/api/sync/status"))
            .await?;
        Self::decode(&response)
    }

    #[instrument(skip(self, query), fields(page = query.page))]
    async fn list_candidates(
        &self,
        rule_id: RuleId,
        query: &CandidateQuery,
    ) -> Result<CandidatePage> {
        let path = format!(
            "/api/rules/{}/candidates?{}",
            rule_id,
            candidates_query_string(query)
        );
        let response = self.send(self.request(HttpMethod::Get, &path)).await?;
        Self::decode(&response)
    }

    #[instrument(skip(self, candidate_ids), fields(count = candidate_ids.len()))]
    async fn bulk_delete(
        &self,
        rule_id: RuleId,
        candidate_ids: &[CandidateId],
    ) -> Result<ByteStream> {
        let path = format!("/api/rules/{}/candidates/delete", rule_id);
        let request = self
            .request(HttpMethod::Post, &path)
            .accept("text/event-stream")
            .json(&BulkDeleteRequest { candidate_ids })?;

        let mut response = self.http_client.execute_stream(request).await?;

        if response.is_success() {
            return Ok(response.body);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.body.next().await {
            match chunk {
                Ok(bytes) => body.extend_from_slice(&bytes),
                Err(e) => {
                    warn!(error = %e, "Failed to read bulk delete error body");
                    break;
                }
            }
            if body.len() >= MAX_ERROR_BODY {
                break;
            }
        }

        Err(api_error(response.status, &body))
    }

    #[instrument(skip(self, candidate), fields(item_id = candidate.item.id))]
    async fn cross_server_matches(&self, candidate: &Candidate) -> Result<Vec<CrossServerMatch>> {
        let path = format!("/api/library/items/{}/matches", candidate.item.id);
        let response = self.send(self.request(HttpMethod::Get, &path)).await?;
        Self::decode(&response)
    }

    #[instrument(skip(self))]
    async fn delete_library_item(
        &self,
        item_id: LibraryItemId,
        verify_against: Option<LibraryItemId>,
    ) -> Result<()> {
        let path = match verify_against {
            Some(source) => format!("/api/library/items/{}?source_item_id={}", item_id, source),
            None => format!("/api/library/items/{}", item_id),
        };

        self.send_once(self.request(HttpMethod::Delete, &path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{SortColumn, SortState};
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpStreamResponse, RetryPolicy};
    use bridge_traits::BridgeError;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn execute_with_retry(&self, request: HttpRequest, policy: RetryPolicy) -> BridgeResult<HttpResponse>;
            async fn execute_stream(&self, request: HttpRequest) -> BridgeResult<HttpStreamResponse>;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn stream_response(status: u16, chunks: Vec<&'static str>) -> HttpStreamResponse {
        let body = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, BridgeError>(Bytes::from_static(c.as_bytes()))),
        );
        HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body: Box::pin(body),
        }
    }

    fn api(mock: MockHttpClient) -> HttpMaintenanceApi {
        HttpMaintenanceApi::new(
            Arc::new(mock),
            "http://monitor.local/",
            Some("key-1".to_string()),
        )
    }

    #[tokio::test]
    async fn test_start_sync_posts_key() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().never();
        mock_http
            .expect_execute_with_retry()
            .withf(|_, policy| policy.max_attempts == 1)
            .times(1)
            .returning(|req, _| {
                assert_eq!(req.method, HttpMethod::Post);
                assert_eq!(req.url, "http://monitor.local/api/sync/libraries");
                assert_eq!(req.headers.get("X-Api-Key"), Some(&"key-1".to_string()));

                let body: serde_json::Value =
                    serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
                assert_eq!(body["server_id"], 3);
                assert_eq!(body["library_id"], "lib:7");
                Ok(response(202, "{}"))
            });

        let outcome = api(mock_http)
            .start_sync(&SyncKey::new(3, "lib:7"))
            .await
            .unwrap();
        assert_eq!(outcome, StartSyncOutcome::Started);
    }

    #[tokio::test]
    async fn test_start_sync_conflict_joins_running_job() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .returning(|_, _| Ok(response(409, r#"{"error":"sync already in progress"}"#)));

        let outcome = api(mock_http)
            .start_sync(&SyncKey::new(1, "movies"))
            .await
            .unwrap();
        assert_eq!(outcome, StartSyncOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_start_sync_surfaces_error_message() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .withf(|_, policy| policy.max_attempts == 1)
            .times(1)
            .returning(|_, _| Ok(response(502, r#"{"message":"server offline"}"#)));

        let err = api(mock_http)
            .start_sync(&SyncKey::new(1, "movies"))
            .await
            .unwrap_err();

        match err {
            MaintenanceError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "server offline");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sync_status_decodes_snapshot() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Get);
            assert!(req.url.ends_with("/api/sync/status"));
            Ok(response(200, r#"{"1:movies":{"phase":"history"}}"#))
        });

        let snapshot = api(mock_http).sync_status().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&SyncKey::new(1, "movies")).is_some());
    }

    #[tokio::test]
    async fn test_list_candidates_builds_query() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(
                req.url,
                "http://monitor.local/api/rules/5/candidates?page=2&per_page=25&search=star%20wars&sort=size&order=desc"
            );
            Ok(response(
                200,
                r#"{"items":[{"id":9,"rule_id":5,"reason":"Not watched in 2 years",
                    "item":{"id":90,"server_id":1,"library_id":"movies","title":"Heat","size_bytes":1024}}],
                    "total":26,"total_size":1024}"#,
            ))
        });

        let query = CandidateQuery {
            page: 2,
            per_page: 25,
            search: Some("star wars".to_string()),
            sort: Some(SortState::default_for(SortColumn::Size)),
        };
        let page = api(mock_http).list_candidates(5, &query).await.unwrap();

        assert_eq!(page.total, 26);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].item.title, "Heat");
    }

    #[tokio::test]
    async fn test_list_candidates_rejects_bad_json() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(200, "<html>")));

        let err = api(mock_http)
            .list_candidates(5, &CandidateQuery::new(10))
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::Decode(_)));
    }

    #[tokio::test]
    async fn test_bulk_delete_requests_event_stream() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute_stream().times(1).returning(|req| {
            assert_eq!(req.url, "http://monitor.local/api/rules/5/candidates/delete");
            assert_eq!(
                req.headers.get("Accept"),
                Some(&"text/event-stream".to_string())
            );
            let body: serde_json::Value =
                serde_json::from_slice(req.body.as_ref().unwrap()).unwrap();
            assert_eq!(body["candidate_ids"], serde_json::json!([1, 2, 3]));
            Ok(stream_response(200, vec!["data: {\"total\":3}\n\n"]))
        });

        let mut body = api(mock_http).bulk_delete(5, &[1, 2, 3]).await.unwrap();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"data: {\"total\":3}\n\n"));
    }

    #[tokio::test]
    async fn test_bulk_delete_non_success_is_api_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_stream()
            .times(1)
            .returning(|_| Ok(stream_response(403, vec![r#"{"error":"#, r#""forbidden"}"#])));

        let err = api(mock_http).bulk_delete(5, &[1]).await.err().unwrap();
        match err {
            MaintenanceError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "forbidden");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_library_item_passes_source_for_verification() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().never();
        mock_http
            .expect_execute_with_retry()
            .withf(|_, policy| policy.max_attempts == 1)
            .times(1)
            .returning(|req, _| {
                assert_eq!(req.method, HttpMethod::Delete);
                assert_eq!(
                    req.url,
                    "http://monitor.local/api/library/items/77?source_item_id=12"
                );
                Ok(response(204, ""))
            });

        api(mock_http).delete_library_item(77, Some(12)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_library_item_error_uses_plain_body() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .times(1)
            .returning(|_, _| Ok(response(404, "item not found")));

        let err = api(mock_http).delete_library_item(77, None).await.unwrap_err();
        assert_eq!(err.to_string(), "API error (status 404): item not found");
    }

    #[tokio::test]
    async fn test_delete_library_item_server_error_keeps_backend_message() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute_with_retry()
            .withf(|req, policy| {
                policy.max_attempts == 1 && req.url.ends_with("/api/library/items/20?source_item_id=10")
            })
            .times(1)
            .returning(|_, _| Ok(response(500, r#"{"error":"plex server unreachable"}"#)));

        let err = api(mock_http)
            .delete_library_item(20, Some(10))
            .await
            .unwrap_err();

        match err {
            MaintenanceError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "plex server unreachable");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reads_use_default_retry() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute_with_retry().never();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(200, "[]")));

        let source = Candidate {
            id: 1,
            rule_id: 5,
            item: serde_json::from_str(
                r#"{"id":90,"server_id":1,"library_id":"movies","title":"Heat"}"#,
            )
            .unwrap(),
            reason: "Unwatched".to_string(),
        };
        let matches = api(mock_http).cross_server_matches(&source).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates_as_bridge_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::OperationFailed("Connection failed".to_string())));

        let err = api(mock_http).sync_status().await.unwrap_err();
        assert!(matches!(err, MaintenanceError::Bridge(_)));
    }
}

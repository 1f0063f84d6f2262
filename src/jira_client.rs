use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, HOST, USER_AGENT};
use reqwest::Url;
use serde_json::Value;

use crate::error::{TrackerError, TrackerResult};
use crate::http_gateway::{HttpGateway, RequestBody};
use crate::models::{JiraField, JiraIssue, JiraStatus};
use crate::token_manager::TokenManager;

const ACCEPT_VALUE: &str = "application/json, text/plain, */*";
const POINTS_FIELD_TOKEN: &str = "point";

/// Authenticated access to the Jira Cloud REST API through the Atlassian
/// gateway (`<base>/ex/jira/<workspace>/rest/api/3/...`).
pub struct JiraClient {
    gateway: HttpGateway,
    tokens: TokenManager,
    api_root: String,
    host: String,
}

impl JiraClient {
    pub fn new(
        gateway: HttpGateway,
        tokens: TokenManager,
        api_base_url: &str,
        workspace_id: &str,
    ) -> TrackerResult<Self> {
        let base = Url::parse(api_base_url)
            .map_err(|e| TrackerError::Config(format!("Invalid API base URL {}: {}", api_base_url, e)))?;
        let host = match (base.host_str(), base.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(TrackerError::Config(format!(
                    "API base URL {} has no host",
                    api_base_url
                )))
            }
        };

        Ok(Self {
            gateway,
            tokens,
            api_root: format!(
                "{}/ex/jira/{}/rest/api/3",
                api_base_url.trim_end_matches('/'),
                workspace_id
            ),
            host,
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn resource_url(&self, resource_path: &str) -> String {
        format!("{}/{}", self.api_root, resource_path.trim_start_matches('/'))
    }

    fn headers(&self, access_token: &str) -> TrackerResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| TrackerError::Config("Access token is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("trackpulse/", env!("CARGO_PKG_VERSION"))),
        );
        let host = HeaderValue::from_str(&self.host)
            .map_err(|_| TrackerError::Config(format!("Invalid host {}", self.host)))?;
        headers.insert(HOST, host);
        Ok(headers)
    }

    /// GET a resource. A 401 triggers one credential refresh and one retry.
    pub async fn get(&self, resource_path: &str, params: &[(&str, String)]) -> TrackerResult<Value> {
        let url = self.resource_url(resource_path);
        let credential = self.tokens.credential().await?;
        match self.gateway.get(&url, self.headers(&credential.access_token)?, params).await {
            Err(e) if e.is_unauthorized() => {
                warn!("Access token rejected for {}; refreshing once", resource_path);
                let credential = self.tokens.refresh().await?;
                self.gateway
                    .get(&url, self.headers(&credential.access_token)?, params)
                    .await
            }
            other => other,
        }
    }

    /// POST a JSON body to a resource, with the same 401 policy as [`get`](Self::get).
    pub async fn post(&self, resource_path: &str, body: &Value) -> TrackerResult<Value> {
        let url = self.resource_url(resource_path);
        let body = RequestBody::Json(body.clone());
        let credential = self.tokens.credential().await?;
        match self.gateway.post(&url, &body, self.headers(&credential.access_token)?).await {
            Err(e) if e.is_unauthorized() => {
                warn!("Access token rejected for {}; refreshing once", resource_path);
                let credential = self.tokens.refresh().await?;
                self.gateway
                    .post(&url, &body, self.headers(&credential.access_token)?)
                    .await
            }
            other => other,
        }
    }

    /// All field descriptors visible to the user.
    pub async fn fields(&self) -> TrackerResult<Vec<JiraField>> {
        let value = self.get("field", &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fields whose name contains "point", case-insensitively.
    pub async fn points_fields(&self) -> TrackerResult<Vec<JiraField>> {
        let fields = self.fields().await?;
        let points = filter_points_fields(fields);
        debug!(
            "Resolved points fields: {:?}",
            points.iter().map(|f| f.id.as_str()).collect::<Vec<_>>()
        );
        Ok(points)
    }

    pub async fn statuses(&self) -> TrackerResult<Vec<JiraStatus>> {
        let value = self.get("status", &[]).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn issue(&self, issue_key: &str) -> TrackerResult<JiraIssue> {
        let value = self.get(&format!("issue/{}", issue_key), &[]).await?;
        Ok(serde_json::from_value(value)?)
    }
}

pub fn filter_points_fields(fields: Vec<JiraField>) -> Vec<JiraField> {
    fields
        .into_iter()
        .filter(|field| field.name.to_lowercase().contains(POINTS_FIELD_TOKEN))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use httpmock::prelude::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_resource_url_composition() {
        let server = MockServer::start();
        let (client, _dir) = client_for(&server);
        assert_eq!(
            client.resource_url("issue/PROJ-1/changelog"),
            format!("{}/ex/jira/cloud-1/rest/api/3/issue/PROJ-1/changelog", server.base_url())
        );
        assert_eq!(client.resource_url("/search"), client.resource_url("search"));
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_fixed_headers() {
        let server = MockServer::start();
        let token = mock_token_endpoint(&server);
        let fields = server.mock(|when, then| {
            when.method(GET)
                .path(api_path("field"))
                .header("authorization", "Bearer access-1")
                .header("accept", ACCEPT_VALUE);
            then.status(200).json_body(json!([
                {"id": "customfield_10016", "name": "Story Points"},
                {"id": "summary", "name": "Summary"},
                {"id": "customfield_10026", "name": "Story point estimate"}
            ]));
        });

        let (client, _dir) = client_for(&server);
        let points = client.points_fields().await.expect("fields");

        assert_eq!(token.calls(), 1);
        assert_eq!(fields.calls(), 1);
        let ids: Vec<&str> = points.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["customfield_10016", "customfield_10026"]);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_retries() {
        let server = MockServer::start();
        let first_token = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_includes("refresh_token=seed-token");
            then.status(200)
                .json_body(json!({"access_token": "expired", "refresh_token": "rotated-1"}));
        });
        let second_token = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_includes("refresh_token=rotated-1");
            then.status(200)
                .json_body(json!({"access_token": "fresh", "refresh_token": "rotated-2"}));
        });
        let rejected = server.mock(|when, then| {
            when.method(GET)
                .path(api_path("status"))
                .header("authorization", "Bearer expired");
            then.status(401).body("token expired");
        });
        let accepted = server.mock(|when, then| {
            when.method(GET)
                .path(api_path("status"))
                .header("authorization", "Bearer fresh");
            then.status(200).json_body(json!([
                {"id": "3", "name": "In Progress", "statusCategory": {"key": "indeterminate", "name": "In Progress"}}
            ]));
        });

        let (client, _dir) = client_for(&server);
        let statuses = client.statuses().await.expect("statuses after retry");

        assert_eq!(statuses.len(), 1);
        assert_eq!(first_token.calls(), 1);
        assert_eq!(second_token.calls(), 1);
        assert_eq!(rejected.calls(), 1);
        assert_eq!(accepted.calls(), 1);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_returned() {
        let server = MockServer::start();
        let token = mock_token_endpoint(&server);
        let status = server.mock(|when, then| {
            when.method(GET).path(api_path("status"));
            then.status(401).body("nope");
        });

        let (client, _dir) = client_for(&server);
        let err = client.statuses().await.unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(token.calls(), 2);
        assert_eq!(status.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_token_exchange_blocks_resource_calls() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(401).body("invalid_grant");
        });
        let search = server.mock(|when, then| {
            when.method(GET).path(api_path("search"));
            then.status(200).json_body(json!({"issues": []}));
        });

        let (client, _dir) = client_for(&server);
        let err = client.get("search", &[]).await.unwrap_err();

        assert!(matches!(err, TrackerError::Auth { .. }));
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test]
    async fn test_post_sends_json() {
        let server = MockServer::start();
        mock_token_endpoint(&server);
        let post = server.mock(|when, then| {
            when.method(POST)
                .path(api_path("search"))
                .json_body(json!({"jql": "project = PROJ"}));
            then.status(200).json_body(json!({"issues": []}));
        });

        let (client, _dir) = client_for(&server);
        let value = client
            .post("search", &json!({"jql": "project = PROJ"}))
            .await
            .expect("post");
        assert_eq!(value["issues"], json!([]));
        assert_eq!(post.calls(), 1);
    }

    #[test]
    fn test_filter_points_fields_is_case_insensitive() {
        let fields = vec![
            JiraField { id: "a".to_string(), name: "STORY POINTS".to_string() },
            JiraField { id: "b".to_string(), name: "Sprint".to_string() },
            JiraField { id: "c".to_string(), name: "Checkpoint".to_string() },
        ];
        let ids: Vec<String> = filter_points_fields(fields).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{PartialResult, TrackerResult};
use crate::jira_client::JiraClient;
use serde_json::Value;

use crate::models::{parse_comments, ChangelogEntry, JiraComment, JiraIssue, SearchResponse};

/// Default expansion for plain searches.
pub const DEFAULT_EXPAND: &str = "names";

#[derive(Debug, Deserialize)]
struct ChangelogResponse {
    #[serde(default)]
    values: Vec<ChangelogEntry>,
    #[serde(rename = "isLast", default)]
    is_last: Option<bool>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CommentPage {
    #[serde(default)]
    comments: Vec<Value>,
    #[serde(default)]
    total: Option<usize>,
}

/// Walks the paginated search and changelog resources.
///
/// A failed page ends the walk. No page is retried; whatever was gathered up
/// to that point comes back alongside the error.
pub struct QueryEngine {
    client: JiraClient,
    search_page_size: usize,
}

impl QueryEngine {
    pub fn new(client: JiraClient, search_page_size: usize) -> Self {
        Self {
            client,
            search_page_size: search_page_size.max(1),
        }
    }

    pub fn client(&self) -> &JiraClient {
        &self.client
    }

    /// Runs `jql` and returns at most `item_cap` issues.
    pub async fn search(&self, jql: &str, item_cap: usize) -> PartialResult<JiraIssue> {
        self.search_with(jql, DEFAULT_EXPAND, None, item_cap).await
    }

    /// Like [`search`](Self::search) with explicit `expand` and `fields` parameters.
    ///
    /// Advances `startAt` by the number of issues each page returned and
    /// stops on an empty page or once `item_cap` issues are held. A failed
    /// page yields an empty result carrying the error.
    pub async fn search_with(
        &self,
        jql: &str,
        expand: &str,
        fields: Option<&str>,
        item_cap: usize,
    ) -> PartialResult<JiraIssue> {
        let mut issues: Vec<JiraIssue> = Vec::new();
        let mut start_at = 0usize;

        while issues.len() < item_cap {
            let mut params = vec![
                ("expand", expand.to_string()),
                ("jql", jql.to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", self.search_page_size.to_string()),
            ];
            if let Some(fields) = fields {
                params.push(("fields", fields.to_string()));
            }

            let page = match self.fetch_search_page(&params).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Failed to get issues for JQL {}: {}", jql, e);
                    return PartialResult::partial(Vec::new(), e);
                }
            };

            let fetched = page.issues.len();
            if fetched == 0 {
                break;
            }
            issues.extend(page.issues);
            start_at += fetched;
        }

        issues.truncate(item_cap);
        debug!("JQL {} returned {} issues", jql, issues.len());
        PartialResult::complete(issues)
    }

    async fn fetch_search_page(&self, params: &[(&str, String)]) -> TrackerResult<SearchResponse> {
        let value = self.client.get("search", params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetches up to `max_items` changelog entries for an issue, `page_size`
    /// at a time.
    ///
    /// Stops on a short page, on a page the server marks as last, or once
    /// `max_items` entries are held. Authors come back trimmed to
    /// `accountId`/`displayName`.
    pub async fn changelog(
        &self,
        issue_id: &str,
        page_size: usize,
        max_items: usize,
    ) -> PartialResult<ChangelogEntry> {
        let page_size = page_size.max(1);
        let path = format!("issue/{}/changelog", issue_id);
        let mut entries: Vec<ChangelogEntry> = Vec::new();
        let mut start_at = 0usize;

        while entries.len() < max_items {
            let params = [
                ("startAt", start_at.to_string()),
                ("maxResults", page_size.to_string()),
            ];

            let page = match self.fetch_changelog_page(&path, &params).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(
                        "Changelog for {} incomplete after {} entries: {}",
                        issue_id,
                        entries.len(),
                        e
                    );
                    return PartialResult::partial(entries, e);
                }
            };

            let fetched = page.values.len();
            entries.extend(page.values);

            let reached_total = page.total.map_or(false, |total| start_at + fetched >= total);
            if fetched < page_size || page.is_last == Some(true) || reached_total {
                break;
            }
            start_at += page_size;
        }

        entries.truncate(max_items);
        PartialResult::complete(entries)
    }

    /// Fetches up to `max_items` comments for an issue from its comment
    /// resource, `page_size` at a time.
    ///
    /// Stops on a short page or once `total` (or `max_items`) comments have
    /// been seen. Comments that fail to decode are skipped individually.
    pub async fn comments(
        &self,
        issue_id: &str,
        page_size: usize,
        max_items: usize,
    ) -> PartialResult<JiraComment> {
        let page_size = page_size.max(1);
        let path = format!("issue/{}/comment", issue_id);
        let mut comments: Vec<JiraComment> = Vec::new();
        let mut start_at = 0usize;

        while start_at < max_items {
            let params = [
                ("startAt", start_at.to_string()),
                ("maxResults", page_size.to_string()),
            ];

            let page = match self.fetch_comment_page(&path, &params).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Failed to get comments for {}: {}", issue_id, e);
                    return PartialResult::partial(comments, e);
                }
            };

            let fetched = page.comments.len();
            comments.extend(parse_comments(issue_id, page.comments));

            let reached_total = page.total.map_or(false, |total| start_at + fetched >= total);
            if fetched < page_size || reached_total {
                break;
            }
            start_at += page_size;
        }

        comments.truncate(max_items);
        PartialResult::complete(comments)
    }

    async fn fetch_comment_page(&self, path: &str, params: &[(&str, String)]) -> TrackerResult<CommentPage> {
        let value = self.client.get(path, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn fetch_changelog_page(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> TrackerResult<ChangelogResponse> {
        let value = self.client.get(path, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

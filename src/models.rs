use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::utils::parse_timestamp;

/// OAuth credential pair persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

/// OAuth application identity, read from the client credential file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Token endpoint response. Unknown fields (`expires_in`, `scope`, ...) are ignored.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Jira issue snapshot as returned by the search resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Present only when the query expanded `changelog`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<Value>,
}

impl JiraIssue {
    pub fn has_changelog(&self) -> bool {
        self.changelog.is_some()
    }

    /// The issue's current status, if the `status` field was returned.
    pub fn status(&self) -> Option<JiraStatus> {
        self.fields
            .get("status")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn assignee(&self) -> Option<JiraUser> {
        self.fields
            .get("assignee")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn field_str(&self, path: &[&str]) -> Option<String> {
        let (first, rest) = path.split_first()?;
        let mut value = self.fields.get(*first)?;
        for segment in rest {
            value = value.get(*segment)?;
        }
        value.as_str().map(str::to_string)
    }

    /// Sum of every points field present on this issue. Missing, null and
    /// non-numeric values count as zero.
    pub fn points(&self, points_fields: &[JiraField]) -> f64 {
        points_fields
            .iter()
            .filter_map(|field| self.fields.get(&field.id))
            .filter_map(Value::as_f64)
            .sum()
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<JiraIssue>,
}

/// A Jira account, trimmed to the two identifying fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "accountId", default, deserialize_with = "null_as_empty")]
    pub account_id: String,
    #[serde(rename = "displayName", default, deserialize_with = "null_as_empty")]
    pub display_name: String,
}

/// A single field transition inside a changelog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub field: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "fromString", default, skip_serializing_if = "Option::is_none")]
    pub from_string: Option<String>,
    #[serde(rename = "toString", default, skip_serializing_if = "Option::is_none")]
    pub to_string: Option<String>,
}

/// One historical change to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub created: String,
    #[serde(default)]
    pub items: Vec<ChangeItem>,
    #[serde(default, deserialize_with = "nullable_author")]
    pub author: JiraUser,
}

impl ChangelogEntry {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created)
    }

    pub fn transitions_to(&self, target_id: &str) -> bool {
        self.items
            .iter()
            .any(|item| item.to.as_deref() == Some(target_id))
    }

    /// True when this change moved the issue under the epic with id `epic_id`.
    pub fn attaches_to_parent(&self, epic_id: &str) -> bool {
        self.items.iter().any(|item| {
            item.field == PARENT_ASSOCIATION_FIELD && item.to.as_deref() == Some(epic_id)
        })
    }
}

const PARENT_ASSOCIATION_FIELD: &str = "IssueParentAssociation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JiraComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub updated: String,
    #[serde(default, deserialize_with = "nullable_author")]
    pub author: JiraUser,
    /// Plain text or an Atlassian document, depending on the API version.
    #[serde(default)]
    pub body: Value,
}

impl JiraComment {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.updated)
    }

    /// Creation time, falling back to the last update when absent.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match &self.created {
            Some(created) => parse_timestamp(created),
            None => self.updated_at(),
        }
    }
}

/// Decodes comments one at a time. Malformed entries are logged and skipped
/// so they cannot take the rest of the page down with them.
pub fn parse_comments(issue_id: &str, values: Vec<Value>) -> Vec<JiraComment> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<JiraComment>(value) {
            Ok(comment) => Some(comment),
            Err(e) => {
                warn!("Skipping malformed comment #{} on {}: {}", index, issue_id, e);
                None
            }
        })
        .collect()
}

/// Comments of one issue split around a pivot instant. Comments created
/// exactly at the pivot belong to neither side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentsTimeline {
    pub before: Vec<JiraComment>,
    pub after: Vec<JiraComment>,
}

/// A child issue that was attached to the epic, with the points it brought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDelta {
    pub issue_key: String,
    pub story_points: f64,
    pub changing_user: JiraUser,
    pub changed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraField {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraStatus {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "statusCategory", default)]
    pub status_category: Option<JiraStatusCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraStatusCategory {
    #[serde(default)]
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildIssueReport {
    pub issue_id: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changelog: Option<Vec<ChangelogEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<JiraComment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongRunningIssue {
    pub id: String,
    pub key: String,
    #[serde(rename = "self")]
    pub self_url: String,
    pub days_in_status: i64,
}

/// Result of analysing one epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpicReport {
    pub report_id: Uuid,
    pub epic_key: String,
    pub summary: Option<String>,
    pub status_name: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub assignee: Option<JiraUser>,
    pub velocity: f64,
    pub remaining_points: f64,
    pub total_points: f64,
    pub in_progress_points: f64,
    pub completed_points: f64,
    pub epic_changelog: Option<ChangelogEntry>,
    pub epic_comments: CommentsTimeline,
    pub child_issues: Vec<ChildIssueReport>,
    pub long_running: Vec<LongRunningIssue>,
    pub scope_deltas: Vec<ScopeDelta>,
    pub window_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// Set when some pagination loop stopped early on a failed page.
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_key: String,
    pub velocity: f64,
    pub epics: Vec<EpicReport>,
    pub generated_at: DateTime<Utc>,
    pub partial: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_author<'de, D>(deserializer: D) -> Result<JiraUser, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<JiraUser>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_author_is_trimmed_to_two_keys() {
        let entry: ChangelogEntry = serde_json::from_value(json!({
            "id": "100",
            "created": "2024-01-15T10:30:00.000+0000",
            "author": {
                "accountId": "abc",
                "displayName": "Dana",
                "emailAddress": "dana@example.com",
                "avatarUrls": {"48x48": "https://example.test/a.png"},
                "active": true
            },
            "items": [{"field": "status", "from": "1", "to": "3"}]
        }))
        .unwrap();

        let serialized = serde_json::to_value(&entry.author).unwrap();
        let keys: Vec<&String> = serialized.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(serialized["accountId"], "abc");
        assert_eq!(serialized["displayName"], "Dana");
    }

    #[test]
    fn test_missing_author_fields_become_empty() {
        let entry: ChangelogEntry = serde_json::from_value(json!({
            "created": "2024-01-15T10:30:00.000+0000",
            "author": {"accountId": null},
            "items": []
        }))
        .unwrap();
        assert_eq!(entry.author, JiraUser::default());

        let no_author: ChangelogEntry = serde_json::from_value(json!({
            "created": "2024-01-15T10:30:00.000+0000",
            "author": null
        }))
        .unwrap();
        assert_eq!(no_author.author.account_id, "");
        assert_eq!(no_author.author.display_name, "");
    }

    #[test]
    fn test_issue_points_and_status() {
        let issue: JiraIssue = serde_json::from_value(json!({
            "id": "10001",
            "key": "PROJ-1",
            "self": "https://example.test/rest/api/3/issue/10001",
            "fields": {
                "customfield_10016": 3.0,
                "customfield_10026": null,
                "customfield_10030": "n/a",
                "status": {
                    "id": "3",
                    "name": "In Progress",
                    "statusCategory": {"key": "indeterminate", "name": "In Progress"}
                }
            }
        }))
        .unwrap();

        let fields = vec![
            JiraField { id: "customfield_10016".to_string(), name: "Story Points".to_string() },
            JiraField { id: "customfield_10026".to_string(), name: "Story point estimate".to_string() },
            JiraField { id: "customfield_10030".to_string(), name: "Points (legacy)".to_string() },
            JiraField { id: "customfield_99999".to_string(), name: "Sprint points".to_string() },
        ];
        assert_eq!(issue.points(&fields), 3.0);
        assert!(!issue.has_changelog());

        let status = issue.status().unwrap();
        assert_eq!(status.id, "3");
        assert_eq!(status.status_category.unwrap().name, "In Progress");
    }

    #[test]
    fn test_issue_field_str_and_assignee() {
        let issue: JiraIssue = serde_json::from_value(json!({
            "id": "1",
            "key": "PROJ-1",
            "fields": {
                "summary": "Checkout flow",
                "priority": {"name": "High"},
                "duedate": "2024-03-01",
                "assignee": {"accountId": "u-1", "displayName": "Robin", "timeZone": "UTC"}
            },
            "changelog": {"histories": []}
        }))
        .unwrap();

        assert!(issue.has_changelog());
        assert_eq!(issue.field_str(&["summary"]).as_deref(), Some("Checkout flow"));
        assert_eq!(issue.field_str(&["priority", "name"]).as_deref(), Some("High"));
        assert_eq!(issue.field_str(&["duedate"]).as_deref(), Some("2024-03-01"));
        assert!(issue.field_str(&["reporter", "displayName"]).is_none());
        let assignee = issue.assignee().unwrap();
        assert_eq!(assignee.account_id, "u-1");
        assert_eq!(assignee.display_name, "Robin");

        let unassigned: JiraIssue = serde_json::from_value(json!({
            "id": "2", "key": "PROJ-2", "fields": {"assignee": null}
        }))
        .unwrap();
        assert!(unassigned.assignee().is_none());
    }

    #[test]
    fn test_malformed_comment_does_not_hide_the_others() {
        let comments = parse_comments(
            "10002",
            vec![
                json!({"id": "1", "updated": "2024-01-02T00:00:00.000+0000", "body": "kept"}),
                json!({"id": "2", "body": "no timestamp"}),
                json!("not even an object"),
                json!({"id": "3", "created": "2024-01-01T00:00:00.000+0000",
                       "updated": "2024-01-03T00:00:00.000+0000", "body": "also kept",
                       "author": {"accountId": "a", "displayName": "Dana"}}),
            ],
        );

        let ids: Vec<&str> = comments.iter().filter_map(|c| c.id.as_deref()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(comments[1].author.display_name, "Dana");
        // created wins over updated when both are present
        assert_eq!(
            comments[1].created_at(),
            parse_timestamp("2024-01-01T00:00:00.000+0000")
        );
        assert_eq!(comments[0].created_at(), comments[0].updated_at());
    }

    #[test]
    fn test_parent_association_detection() {
        let entry: ChangelogEntry = serde_json::from_value(json!({
            "created": "2024-01-15T10:30:00.000+0000",
            "items": [
                {"field": "status", "from": "1", "to": "3"},
                {"field": "IssueParentAssociation", "from": null, "to": "10000"}
            ]
        }))
        .unwrap();
        assert!(entry.attaches_to_parent("10000"));
        assert!(!entry.attaches_to_parent("3"));
    }

    #[test]
    fn test_child_report_omits_absent_sections() {
        let bare = ChildIssueReport {
            issue_id: "1".to_string(),
            key: "PROJ-1".to_string(),
            changelog: None,
            comments: None,
        };
        let value = serde_json::to_value(&bare).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["issue_id", "key"]);
    }
}

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::error::{PartialResult, TrackerError, TrackerResult};
use crate::models::{
    ChangelogEntry, ChildIssueReport, CommentsTimeline, EpicReport, JiraComment, JiraField,
    JiraIssue, JiraStatus, LongRunningIssue, ProjectReport, ScopeDelta,
};
use crate::pagination::{QueryEngine, DEFAULT_EXPAND};
use crate::utils::{jql_date, whole_days_between, window_start};

const IN_PROGRESS_CATEGORY: &str = "In Progress";
const CHILD_EXPAND: &str = "names,changelog";
const RECENTLY_DONE_EPIC_DAYS: &str = "-10d";

/// Knobs for a single analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub velocity_window_days: i64,
    pub long_running_days: i64,
    pub search_item_cap: usize,
    pub changelog_page_size: usize,
    pub changelog_max_items: usize,
    pub comment_page_size: usize,
    pub comment_max_items: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for AnalysisSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            velocity_window_days: config.velocity_window_days,
            long_running_days: config.long_running_days,
            search_item_cap: config.search_item_cap,
            changelog_page_size: config.changelog_page_size,
            changelog_max_items: config.changelog_max_items,
            comment_page_size: config.comment_page_size,
            comment_max_items: config.comment_max_items,
        }
    }
}

/// Builds velocity and activity reports for epics and projects.
pub struct EpicAnalyzer {
    engine: QueryEngine,
    settings: AnalysisSettings,
}

impl EpicAnalyzer {
    pub fn new(engine: QueryEngine, settings: AnalysisSettings) -> Self {
        Self { engine, settings }
    }

    pub async fn analyze(&self, epic_key: &str, last_checked: DateTime<Utc>) -> TrackerResult<EpicReport> {
        self.analyze_at(epic_key, last_checked, Utc::now()).await
    }

    /// Analyses `epic_key` as of `now`.
    ///
    /// Child changelogs and comments are cut down to entries strictly newer
    /// than `last_checked`. The epic's own changelog, scope changes and the
    /// long-running scan use unfiltered history.
    pub async fn analyze_at(
        &self,
        epic_key: &str,
        last_checked: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TrackerResult<EpicReport> {
        info!("Analysing epic {}", epic_key);
        let client = self.engine.client();
        let mut partial = false;

        let epic = match client.issue(epic_key).await {
            Ok(epic) => Some(epic),
            Err(e @ TrackerError::Auth { .. }) => return Err(e),
            Err(e) => {
                warn!("Could not load epic {}: {}", epic_key, e);
                partial = true;
                None
            }
        };

        let points_fields = client.points_fields().await?;
        let base_jql = format!("parent = {}", epic_key);

        let velocity_jql = velocity_jql(&base_jql, now, self.settings.velocity_window_days);
        let velocity = self.sum_story_points(&velocity_jql, &points_fields, &mut partial).await?;

        let remaining_jql = format!("{} AND status != \"Done\"", base_jql);
        let remaining_points = self.sum_story_points(&remaining_jql, &points_fields, &mut partial).await?;
        let total_points = self.sum_story_points(&base_jql, &points_fields, &mut partial).await?;
        let in_progress_jql = format!("{} AND statusCategory = \"In Progress\"", base_jql);
        let in_progress_points = self.sum_story_points(&in_progress_jql, &points_fields, &mut partial).await?;
        let completed_jql = format!("{} AND statusCategory = \"Done\"", base_jql);
        let completed_points = self.sum_story_points(&completed_jql, &points_fields, &mut partial).await?;

        // Only the first changelog entry is reported for the epic itself.
        let epic_history = self
            .engine
            .changelog(epic_key, self.settings.changelog_page_size, self.settings.changelog_max_items)
            .await;
        let epic_changelog = absorb(epic_history, &mut partial)?.into_iter().next();

        let epic_comments = self
            .engine
            .comments(epic_key, self.settings.comment_page_size, self.settings.comment_max_items)
            .await;
        let epic_comments = split_comments(absorb(epic_comments, &mut partial)?, last_checked);

        let statuses = match client.statuses().await {
            Ok(statuses) => statuses.into_iter().map(|s| (s.id.clone(), s)).collect(),
            Err(e @ TrackerError::Auth { .. }) => return Err(e),
            Err(e) => {
                warn!("Could not load workflow statuses, using embedded categories: {}", e);
                HashMap::new()
            }
        };

        let children = self
            .engine
            .search_with(&base_jql, CHILD_EXPAND, Some("*all"), self.settings.search_item_cap)
            .await;
        let children = absorb(children, &mut partial)?;
        debug!("Epic {} has {} child issues", epic_key, children.len());

        let epic_id = epic.as_ref().map(|e| e.id.as_str());
        let mut child_issues = Vec::with_capacity(children.len());
        let mut long_running = Vec::new();
        let mut scope_deltas = Vec::new();

        for child in &children {
            if !child.has_changelog() {
                child_issues.push(ChildIssueReport {
                    issue_id: child.id.clone(),
                    key: child.key.clone(),
                    changelog: None,
                    comments: None,
                });
                continue;
            }

            let history = self
                .engine
                .changelog(&child.id, self.settings.changelog_page_size, self.settings.changelog_max_items)
                .await;
            let history = absorb(history, &mut partial)?;

            if let Some(issue) =
                detect_long_running(child, &history, &statuses, now, self.settings.long_running_days)
            {
                info!("{} has been in its current status for {} days", issue.key, issue.days_in_status);
                long_running.push(issue);
            }

            if let Some(epic_id) = epic_id {
                scope_deltas.extend(scope_changes(child, &history, epic_id, &points_fields));
            }

            let comments = self
                .engine
                .comments(&child.id, self.settings.comment_page_size, self.settings.comment_max_items)
                .await;
            let comments = absorb(comments, &mut partial)?;

            child_issues.push(ChildIssueReport {
                issue_id: child.id.clone(),
                key: child.key.clone(),
                changelog: Some(changes_since(&history, last_checked)),
                comments: Some(comments_since(comments, last_checked)),
            });
        }

        if partial {
            warn!("Report for {} was built from incomplete data", epic_key);
        }

        Ok(EpicReport {
            report_id: Uuid::new_v4(),
            epic_key: epic_key.to_string(),
            summary: epic.as_ref().and_then(|e| e.field_str(&["summary"])),
            status_name: epic.as_ref().and_then(|e| e.field_str(&["status", "name"])),
            priority: epic.as_ref().and_then(|e| e.field_str(&["priority", "name"])),
            due_date: epic.as_ref().and_then(|e| e.field_str(&["duedate"])),
            assignee: epic.as_ref().and_then(JiraIssue::assignee),
            velocity,
            remaining_points,
            total_points,
            in_progress_points,
            completed_points,
            epic_changelog,
            epic_comments,
            child_issues,
            long_running,
            scope_deltas,
            window_start: last_checked,
            generated_at: now,
            partial,
        })
    }

    /// Points completed under `base_jql` during the trailing velocity window.
    pub async fn calculate_velocity(&self, base_jql: &str, now: DateTime<Utc>) -> TrackerResult<f64> {
        let points_fields = self.engine.client().points_fields().await?;
        let jql = velocity_jql(base_jql, now, self.settings.velocity_window_days);
        let mut partial = false;
        self.sum_story_points(&jql, &points_fields, &mut partial).await
    }

    pub async fn analyze_project(
        &self,
        project_key: &str,
        last_checked: DateTime<Utc>,
    ) -> TrackerResult<ProjectReport> {
        self.analyze_project_at(project_key, last_checked, Utc::now()).await
    }

    /// Analyses every open epic in a project plus those closed in the last
    /// ten days. An epic matched by both queries is analysed once.
    pub async fn analyze_project_at(
        &self,
        project_key: &str,
        last_checked: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TrackerResult<ProjectReport> {
        let mut partial = false;
        let mut epic_keys: Vec<String> = Vec::new();
        for jql in &project_epic_queries(project_key) {
            let found = self.engine.search(jql, self.settings.search_item_cap).await;
            for epic in absorb(found, &mut partial)? {
                if !epic_keys.contains(&epic.key) {
                    epic_keys.push(epic.key);
                }
            }
        }
        info!("Project {} has {} epics to analyse", project_key, epic_keys.len());

        let mut epics = Vec::with_capacity(epic_keys.len());
        for key in &epic_keys {
            epics.push(self.analyze_at(key, last_checked, now).await?);
        }

        let velocity = self
            .calculate_velocity(&format!("project = {}", project_key), now)
            .await?;

        let partial = partial || epics.iter().any(|epic| epic.partial);
        Ok(ProjectReport {
            project_key: project_key.to_string(),
            velocity,
            epics,
            generated_at: now,
            partial,
        })
    }

    async fn sum_story_points(
        &self,
        jql: &str,
        points_fields: &[JiraField],
        partial: &mut bool,
    ) -> TrackerResult<f64> {
        let result = self
            .engine
            .search_with(jql, DEFAULT_EXPAND, None, self.settings.search_item_cap)
            .await;
        let issues = absorb(result, partial)?;
        Ok(sum_points(&issues, points_fields))
    }
}

/// Unwraps a pagination result. Auth failures abort; anything else marks the
/// report partial and keeps what was fetched.
fn absorb<T>(result: PartialResult<T>, partial: &mut bool) -> TrackerResult<Vec<T>> {
    match result.error {
        Some(e @ TrackerError::Auth { .. }) => Err(e),
        Some(_) => {
            *partial = true;
            Ok(result.items)
        }
        None => Ok(result.items),
    }
}

pub fn project_epic_queries(project_key: &str) -> [String; 2] {
    [
        format!("project = {} AND issuetype = Epic AND status != \"Done\"", project_key),
        format!(
            "project = {} AND issuetype = \"Epic\" AND status = \"Done\" AND status changed DURING ({}, now())",
            project_key, RECENTLY_DONE_EPIC_DAYS
        ),
    ]
}

pub fn velocity_jql(base_jql: &str, now: DateTime<Utc>, window_days: i64) -> String {
    format!(
        "{} AND status changed to \"Done\" DURING (\"{}\", \"{}\")",
        base_jql,
        jql_date(window_start(now, window_days)),
        jql_date(now)
    )
}

pub fn sum_points(issues: &[JiraIssue], points_fields: &[JiraField]) -> f64 {
    issues.iter().map(|issue| issue.points(points_fields)).sum()
}

/// Changelog entries created strictly after `since`. Unparseable timestamps are dropped.
pub fn changes_since(entries: &[ChangelogEntry], since: DateTime<Utc>) -> Vec<ChangelogEntry> {
    entries
        .iter()
        .filter(|entry| entry.created_at().map_or(false, |created| created > since))
        .cloned()
        .collect()
}

/// Comments updated strictly after `since`. Unparseable timestamps are dropped.
pub fn comments_since(comments: Vec<JiraComment>, since: DateTime<Utc>) -> Vec<JiraComment> {
    comments
        .into_iter()
        .filter(|comment| comment.updated_at().map_or(false, |updated| updated > since))
        .collect()
}

/// Splits comments around `pivot` by creation time. Unparseable timestamps are dropped.
pub fn split_comments(comments: Vec<JiraComment>, pivot: DateTime<Utc>) -> CommentsTimeline {
    let mut timeline = CommentsTimeline::default();
    for comment in comments {
        match comment.created_at() {
            Some(created) if created < pivot => timeline.before.push(comment),
            Some(created) if created > pivot => timeline.after.push(comment),
            _ => {}
        }
    }
    timeline
}

/// Every change in `history` that attached `issue` to the epic `epic_id`.
pub fn scope_changes(
    issue: &JiraIssue,
    history: &[ChangelogEntry],
    epic_id: &str,
    points_fields: &[JiraField],
) -> Vec<ScopeDelta> {
    history
        .iter()
        .filter(|entry| entry.attaches_to_parent(epic_id))
        .map(|entry| ScopeDelta {
            issue_key: issue.key.clone(),
            story_points: issue.points(points_fields),
            changing_user: entry.author.clone(),
            changed_at: entry.created.clone(),
        })
        .collect()
}

/// Flags `issue` when it sits in an "In Progress" category status and its most
/// recent transition into that status is more than `threshold_days` old.
/// `days_in_status` is reported in whole days.
pub fn detect_long_running(
    issue: &JiraIssue,
    history: &[ChangelogEntry],
    statuses: &HashMap<String, JiraStatus>,
    now: DateTime<Utc>,
    threshold_days: i64,
) -> Option<LongRunningIssue> {
    let status = issue.status()?;
    let category = status
        .status_category
        .as_ref()
        .or_else(|| statuses.get(&status.id).and_then(|s| s.status_category.as_ref()))?;
    if category.name != IN_PROGRESS_CATEGORY {
        return None;
    }

    let entered = history
        .iter()
        .filter(|entry| entry.transitions_to(&status.id))
        .filter_map(ChangelogEntry::created_at)
        .max()?;
    if now - entered <= Duration::days(threshold_days) {
        return None;
    }

    Some(LongRunningIssue {
        id: issue.id.clone(),
        key: issue.key.clone(),
        self_url: issue.self_url.clone(),
        days_in_status: whole_days_between(entered, now),
    })
}

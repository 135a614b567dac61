// crates/server-jobs/src/types.rs
//! Types for the crawl job system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::JobError;

/// Unique identifier for a crawl job. Random v4, never reused.
pub type JobId = Uuid;

const DEFAULT_TARGET_COUNT: u32 = 10;
const DEFAULT_DELAY_EACH_TWEET_SECS: u64 = 3;
const DEFAULT_DELAY_EVERY_100_SECS: u64 = 10;

/// Life-cycle status of a crawl job.
///
/// The only legal path is `Pending -> Running -> {Completed | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/client/src/types/generated/"))]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Whether `self -> next` is a forward step on the life-cycle path.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked crawl job, as stored in the registry and pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/client/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[ts(type = "string")]
    pub id: JobId,
    pub status: JobStatus,
    /// Percentage, 0-100.
    pub progress: u8,
    #[ts(type = "number")]
    pub tweet_count: u64,
    /// Search keywords or thread URL.
    pub label: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

/// Partial patch applied by [`JobRegistry::update`](crate::JobRegistry::update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub tweet_count: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output_file: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            completed_at: Some(at),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(message.into()),
            completed_at: Some(at),
            ..Self::default()
        }
    }
}

/// Ranking mode of the search results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchTab {
    #[default]
    Top,
    Latest,
}

impl SearchTab {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchTab::Top => "TOP",
            SearchTab::Latest => "LATEST",
        }
    }
}

/// Artifact format written by the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Raw submission body for `POST /api/crawl/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlParams {
    pub access_token: Option<String>,
    pub keywords: Option<String>,
    pub thread_url: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub target_count: Option<u32>,
    pub delay_each_tweet: Option<u64>,
    pub delay_every_100: Option<u64>,
    pub search_tab: Option<SearchTab>,
    pub export_format: Option<ExportFormat>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl CrawlParams {
    /// Human-readable job label: keywords, else the thread URL.
    pub fn label(&self) -> Result<String, JobError> {
        non_blank(&self.keywords)
            .or_else(|| non_blank(&self.thread_url))
            .map(str::to_string)
            .ok_or_else(|| JobError::Validation("Keywords or thread URL is required".into()))
    }

    /// Validate the submission and translate it into the request handed to
    /// the crawl operation, with every default applied.
    pub fn to_request(&self) -> Result<CrawlRequest, JobError> {
        let access_token = non_blank(&self.access_token)
            .ok_or_else(|| JobError::Validation("Access token is required".into()))?
            .to_string();

        let target = match (non_blank(&self.keywords), non_blank(&self.thread_url)) {
            (Some(keywords), _) => CrawlTarget::Search {
                keywords: keywords.to_string(),
                from_date: non_blank(&self.from_date).map(str::to_string),
                to_date: non_blank(&self.to_date).map(str::to_string),
            },
            (None, Some(url)) => CrawlTarget::Thread {
                url: url.to_string(),
            },
            (None, None) => {
                return Err(JobError::Validation(
                    "Keywords or thread URL is required".into(),
                ))
            }
        };

        Ok(CrawlRequest {
            access_token,
            target,
            target_count: self
                .target_count
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_TARGET_COUNT),
            delay_each_tweet_secs: self
                .delay_each_tweet
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_DELAY_EACH_TWEET_SECS),
            delay_every_100_secs: self
                .delay_every_100
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_DELAY_EVERY_100_SECS),
            search_tab: self.search_tab.unwrap_or_default(),
            export_format: self.export_format.unwrap_or_default(),
        })
    }
}

/// What the crawl should fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    Search {
        keywords: String,
        from_date: Option<String>,
        to_date: Option<String>,
    },
    Thread {
        url: String,
    },
}

/// Validated, defaulted parameters for one crawl run.
#[derive(Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub access_token: String,
    pub target: CrawlTarget,
    pub target_count: u32,
    pub delay_each_tweet_secs: u64,
    pub delay_every_100_secs: u64,
    pub search_tab: SearchTab,
    pub export_format: ExportFormat,
}

// Hand-written so the credential never ends up in a log line.
impl std::fmt::Debug for CrawlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlRequest")
            .field("access_token", &"<redacted>")
            .field("target", &self.target)
            .field("target_count", &self.target_count)
            .field("delay_each_tweet_secs", &self.delay_each_tweet_secs)
            .field("delay_every_100_secs", &self.delay_every_100_secs)
            .field("search_tab", &self.search_tab)
            .field("export_format", &self.export_format)
            .finish()
    }
}

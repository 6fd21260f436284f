use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use svtplay::{EpisodeTracker, FailureKind};

pub type JobId = Uuid;

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Single,
    Season,
}

impl JobKind {
    fn queued_message(self) -> &'static str {
        match self {
            JobKind::Single => "Queued for download",
            JobKind::Season => "Queued for season download",
        }
    }

    fn running_message(self) -> &'static str {
        match self {
            JobKind::Single => "Downloading...",
            JobKind::Season => "Downloading season...",
        }
    }

    pub fn failed_message(self) -> &'static str {
        match self {
            JobKind::Single => "Download failed",
            JobKind::Season => "Season download failed",
        }
    }
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `queued -> failed` covers a worker that dies before it gets to start.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Downloading)
                | (JobStatus::Queued | JobStatus::Downloading, JobStatus::Failed)
                | (JobStatus::Downloading, JobStatus::Completed)
        )
    }
}

#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Processing,
    Downloading,
    Skipped,
    Completed,
}

impl From<svtplay::EpisodeStatus> for EpisodeStatus {
    fn from(value: svtplay::EpisodeStatus) -> Self {
        match value {
            svtplay::EpisodeStatus::Processing => EpisodeStatus::Processing,
            svtplay::EpisodeStatus::Downloading => EpisodeStatus::Downloading,
            svtplay::EpisodeStatus::Skipped => EpisodeStatus::Skipped,
            svtplay::EpisodeStatus::Completed => EpisodeStatus::Completed,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Episode {
    pub number: u32,
    pub total: u32,
    pub status: EpisodeStatus,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub skipped: bool,
}

impl From<&svtplay::Episode> for Episode {
    fn from(e: &svtplay::Episode) -> Self {
        Self {
            number: e.number,
            total: e.total,
            status: e.status.into(),
            url: e.url.clone(),
            filename: e.filename.clone(),
            skipped: e.skipped,
        }
    }
}

/// Episode bookkeeping of a season job, present once the first episode was announced.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SeasonProgress {
    pub episodes: BTreeMap<u32, Episode>,
    pub total_episodes: u32,
    pub completed_episodes: u32,
    pub skipped_episodes: u32,
    pub current_episode: Option<u32>,
}

#[derive(Serialize, Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub download_dir: PathBuf,
    #[serde(flatten)]
    pub season: Option<SeasonProgress>,
}

impl Job {
    pub fn new(id: JobId, url: impl Into<String>, kind: JobKind, download_dir: PathBuf) -> Self {
        Self {
            id,
            url: url.into(),
            kind,
            status: JobStatus::Queued,
            progress: 0,
            message: kind.queued_message().to_string(),
            error: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
            download_dir,
            season: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn start(&mut self) {
        if self.transition(JobStatus::Downloading) {
            self.message = self.kind.running_message().to_string();
        }
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        if self.transition(JobStatus::Completed) {
            self.progress = 100;
            self.message = message.into();
        }
    }

    pub fn fail(
        &mut self,
        message: impl Into<String>,
        error: impl Into<String>,
        failure: Option<FailureKind>,
    ) {
        if self.transition(JobStatus::Failed) {
            self.message = message.into();
            self.error = Some(error.into());
            self.failure = failure;
        }
    }

    /// Copies the tracker's episode state into the job.
    pub fn record_episodes(&mut self, tracker: &EpisodeTracker) {
        if self.status.is_terminal() {
            return;
        }
        let Some(summary) = tracker.summary() else {
            return;
        };
        self.season = Some(SeasonProgress {
            episodes: tracker
                .episodes()
                .iter()
                .map(|(number, episode)| (*number, episode.into()))
                .collect(),
            total_episodes: summary.total,
            completed_episodes: summary.completed,
            skipped_episodes: summary.skipped,
            current_episode: tracker.current_episode(),
        });
        if let Some(message) = tracker.message() {
            self.message = message.to_string();
        }
    }
}

/// Options accepted by the download endpoints, unset values fall back to the configuration.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct DownloadOptions {
    pub quality: Option<String>,
    pub subtitle: Option<bool>,
    pub download_dir: Option<PathBuf>,
    pub token: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub url: String,
    pub download_dir: String,
    pub quality: String,
    pub subtitle: bool,
    pub download_type: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile ids are the lowercased name with spaces replaced by underscores.
pub fn profile_id(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ProfileInput {
    pub name: Option<String>,
    pub url: Option<String>,
    pub download_dir: Option<String>,
    pub quality: Option<String>,
    pub subtitle: Option<bool>,
    pub download_type: Option<JobKind>,
    pub token: Option<String>,
}

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ahash::AHashMap;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use svtplay::{Action, DownloadRequest, EpisodeTracker, Outcome, Quality, Service, SvtplayDl};

use crate::errors::Error;
use crate::jobs::merge;
use crate::jobs::registry::JobRegistry;
use crate::models::{DownloadOptions, Job, JobId, JobKind};

const PREVIEW_CHARS: usize = 1000;

/// Values used when a request leaves an option unset.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub download_dir: PathBuf,
    pub quality: String,
    pub subtitle: bool,
    pub filename_template: Option<String>,
}

impl Defaults {
    fn request(&self, url: &str, options: DownloadOptions) -> DownloadRequest {
        let quality = options.quality.as_deref().unwrap_or(&self.quality);
        DownloadRequest {
            url: url.to_string(),
            quality: Quality::parse(quality),
            subtitle: options.subtitle.unwrap_or(self.subtitle),
            token: options.token.filter(|t| !t.trim().is_empty()),
            output_dir: options
                .download_dir
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| self.download_dir.clone()),
            filename_template: self.filename_template.clone(),
        }
    }
}

/// Starts download jobs and answers status queries.
///
/// Every job is driven by its own task. The handles are kept so a caller can
/// wait for a job to settle.
#[derive(Debug, Clone)]
pub struct JobEngine {
    registry: JobRegistry,
    downloader: Arc<SvtplayDl>,
    defaults: Arc<Defaults>,
    tasks: Arc<Mutex<AHashMap<JobId, JoinHandle<()>>>>,
}

impl JobEngine {
    pub fn new(registry: JobRegistry, downloader: SvtplayDl, defaults: Defaults) -> Self {
        Self {
            registry,
            downloader: Arc::new(downloader),
            defaults: Arc::new(defaults),
            tasks: Arc::default(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn start_download(&self, url: &str, options: DownloadOptions) -> Result<JobId, Error> {
        self.start(url, options, JobKind::Single)
    }

    pub fn start_season_download(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<JobId, Error> {
        self.start(url, options, JobKind::Season)
    }

    fn start(&self, url: &str, options: DownloadOptions, kind: JobKind) -> Result<JobId, Error> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::UrlRequired);
        }
        let request = self.defaults.request(url, options);
        let id = Uuid::new_v4();
        self.registry
            .insert(Job::new(id, url, kind, request.output_dir.clone()));

        let worker = Worker {
            id,
            kind,
            request,
            registry: self.registry.clone(),
            downloader: self.downloader.clone(),
        };
        let handle = supervise(worker);
        {
            let mut tasks = self.tasks.lock().expect("Mutex should never be poisoned");
            tasks.retain(|_, task| !task.is_finished());
            tasks.insert(id, handle);
        }
        info!(%id, url, ?kind, "queued download");
        Ok(id)
    }

    pub fn get_status(&self, id: &JobId) -> Result<Job, Error> {
        self.registry.get(id).ok_or(Error::DownloadNotFound)
    }

    pub fn get_all(&self) -> Vec<Job> {
        self.registry.all()
    }

    /// Waits for the job's task to finish and returns the settled job.
    pub async fn wait(&self, id: &JobId) -> Option<Job> {
        let handle = self
            .tasks
            .lock()
            .expect("Mutex should never be poisoned")
            .remove(id);
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(%id, "download supervisor failed: {err}");
            }
        }
        self.registry.get(id)
    }

    /// Waits for every job still running.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self
            .tasks
            .lock()
            .expect("Mutex should never be poisoned")
            .drain()
            .collect();
        if !handles.is_empty() {
            info!("waiting for {} downloads to finish", handles.len());
        }
        for (id, handle) in handles {
            if let Err(err) = handle.await {
                error!(%id, "download supervisor failed: {err}");
            }
        }
    }

    pub async fn get_info(&self, url: &str) -> Result<serde_json::Value, Error> {
        let url = non_empty(url)?;
        Ok(self.downloader.get_info(url).await?)
    }

    pub async fn list_episodes(&self, url: &str) -> Result<Vec<String>, Error> {
        let url = non_empty(url)?;
        Ok(self.downloader.list_episodes(url).await?)
    }
}

fn non_empty(url: &str) -> Result<&str, Error> {
    let url = url.trim();
    if url.is_empty() {
        Err(Error::UrlRequired)
    } else {
        Ok(url)
    }
}

/// Runs the worker in its own task so errors and panics both end up in the job record.
fn supervise(worker: Worker) -> JoinHandle<()> {
    let registry = worker.registry.clone();
    let id = worker.id;
    let kind = worker.kind;
    tokio::spawn(async move {
        let error = match tokio::spawn(worker.run()).await {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(err) => join_error_text(err),
        };
        error!(%id, "download worker failed: {error}");
        registry.update(&id, |job| job.fail(kind.failed_message(), error, None));
    })
}

fn join_error_text(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "download worker panicked".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    success: bool,
    stdout: String,
    stderr: String,
}

impl Captured {
    fn push(&mut self, channel: Channel, line: &str) {
        let buffer = match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        };
        buffer.push_str(line);
        buffer.push('\n');
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

struct Worker {
    id: JobId,
    kind: JobKind,
    request: DownloadRequest,
    registry: JobRegistry,
    downloader: Arc<SvtplayDl>,
}

impl Worker {
    #[instrument(skip(self), fields(id = %self.id, url = %self.request.url))]
    async fn run(self) -> Result<()> {
        self.registry.update(&self.id, Job::start);
        tokio::fs::create_dir_all(&self.request.output_dir)
            .await
            .with_context(|| {
                format!("failed to create {}", self.request.output_dir.display())
            })?;

        let action = match self.kind {
            JobKind::Single => Action::Download(self.request.clone()),
            JobKind::Season => Action::DownloadSeason(self.request.clone()),
        };
        debug!(command = %self.downloader.describe(&action), "starting svtplay-dl");
        let started = SystemTime::now();
        let child = self
            .downloader
            .command(&action)
            .spawn()
            .context("failed to start svtplay-dl")?;

        let (captured, tracker) = match self.kind {
            JobKind::Single => (collect(child).await?, None),
            JobKind::Season => {
                let (captured, tracker) = self.stream(child).await?;
                (captured, Some(tracker))
            }
        };
        debug!(
            success = captured.success,
            stdout = %preview(&captured.stdout),
            stderr = %preview(&captured.stderr),
            "svtplay-dl exited"
        );

        match Outcome::evaluate(captured.success, &captured.stdout, &captured.stderr) {
            Outcome::Success => {
                self.merge(started).await;
                let message = completed_message(tracker.as_ref());
                info!("{message}");
                self.registry.update(&self.id, |job| job.complete(message));
            }
            Outcome::Failed(failure) => {
                let message = failure.message().unwrap_or(self.kind.failed_message());
                let explanation = failure.explanation(Service::from_url(&self.request.url));
                warn!(kind = ?failure.kind(), "{message}: {explanation}");
                self.registry.update(&self.id, |job| {
                    job.fail(message, explanation, Some(failure.kind()));
                });
            }
        }
        Ok(())
    }

    /// Feeds stdout and stderr line by line through the episode tracker.
    async fn stream(&self, mut child: Child) -> Result<(Captured, EpisodeTracker)> {
        let stdout = child.stdout.take().context("stdout was not captured")?;
        let stderr = child.stderr.take().context("stderr was not captured")?;
        let stdout = SplitStream::new(BufReader::new(stdout).split(b'\n'))
            .map(|line| (Channel::Stdout, line));
        let stderr = SplitStream::new(BufReader::new(stderr).split(b'\n'))
            .map(|line| (Channel::Stderr, line));
        self.track(child, stdout.merge(stderr)).await
    }

    async fn track<S>(&self, mut child: Child, mut lines: S) -> Result<(Captured, EpisodeTracker)>
    where
        S: Stream<Item = (Channel, io::Result<Vec<u8>>)> + Unpin,
    {
        let mut tracker = EpisodeTracker::new()?;
        let mut captured = Captured::default();
        while let Some((channel, line)) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    // a failed job must not keep writing files
                    if let Err(kill_err) = child.kill().await {
                        warn!("failed to stop svtplay-dl: {kill_err}");
                    }
                    return Err(
                        anyhow::Error::new(err).context("failed to read svtplay-dl output")
                    );
                }
            };
            let line = String::from_utf8_lossy(&line);
            // progress bars redraw with carriage returns
            for segment in line.split('\r').filter(|s| !s.trim().is_empty()) {
                captured.push(channel, segment);
                if tracker.apply_line(segment) {
                    self.registry
                        .update(&self.id, |job| job.record_episodes(&tracker));
                }
            }
        }

        let status = child.wait().await?;
        tracker.finish();
        self.registry
            .update(&self.id, |job| job.record_episodes(&tracker));
        captured.success = status.success();
        Ok((captured, tracker))
    }

    /// Only streams written since `started` belong to this job.
    async fn merge(&self, started: SystemTime) {
        let Some(ffmpeg) = self.downloader.ffmpeg() else {
            info!("ffmpeg not available, skipping audio and video merge");
            return;
        };
        match merge::merge_directory(ffmpeg, &self.request.output_dir, Some(started)).await {
            Ok(0) => {}
            Ok(merged) => info!("merged {merged} audio and video pairs"),
            Err(err) => warn!("failed to merge downloaded streams: {err:#}"),
        }
    }
}

async fn collect(child: Child) -> Result<Captured> {
    let output = child
        .wait_with_output()
        .await
        .context("failed to wait for svtplay-dl")?;
    Ok(Captured {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn completed_message(tracker: Option<&EpisodeTracker>) -> String {
    match tracker {
        None => "Download completed".to_string(),
        Some(tracker) => match tracker.summary() {
            Some(summary) => format!(
                "Season download completed: {} downloaded, {} skipped",
                summary.completed, summary.skipped
            ),
            None => "Season download completed".to_string(),
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use svtplay::{FailureKind, Invocation};

    use super::*;
    use crate::models::{EpisodeStatus, JobStatus};

    fn engine_with(program: Invocation, dir: &Path) -> JobEngine {
        JobEngine::new(
            JobRegistry::new(),
            SvtplayDl::new(program),
            Defaults {
                download_dir: dir.join("downloads"),
                quality: "best".to_string(),
                subtitle: true,
                filename_template: None,
            },
        )
    }

    fn engine(script: &str, dir: &Path) -> JobEngine {
        let program = Invocation::new("sh")
            .arg("-c")
            .arg(script)
            .arg("svtplay-dl");
        engine_with(program, dir)
    }

    #[tokio::test]
    async fn test_single_download_completes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("echo 'INFO: Outfile: rapport.mp4' >&2", dir.path());
        let id = engine
            .start_download("https://www.svtplay.se/video/abc", DownloadOptions::default())
            .unwrap();

        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.message, "Download completed");
        assert!(job.finished_at.is_some());
        assert!(job.season.is_none());
        assert!(dir.path().join("downloads").is_dir());
    }

    #[tokio::test]
    async fn test_token_required_despite_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(
            "echo 'ERROR: This video requires a Token' >&2; exit 0",
            dir.path(),
        );
        let id = engine
            .start_download("https://www.tv4play.se/program/idol", DownloadOptions::default())
            .unwrap();

        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure, Some(FailureKind::TokenRequired));
        assert_eq!(job.message, "Token required or expired");
        assert!(job.error.unwrap().contains("TV4 Play account"));
        assert_eq!(job.progress, 0);
    }

    #[tokio::test]
    async fn test_unknown_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("echo 'something broke' >&2; exit 2", dir.path());
        let id = engine
            .start_download("https://example.com/x", DownloadOptions::default())
            .unwrap();

        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, "Download failed");
        assert_eq!(job.error.as_deref(), Some("something broke"));
        assert_eq!(job.failure, Some(FailureKind::Unknown));
    }

    #[tokio::test]
    async fn test_season_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let script = "printf 'Episode 1 of 3\\ndownloading\\nEpisode 2 of 3\\nalready exists\\n\
                      Episode 3 of 3\\ndownloading\\n' >&2";
        let engine = engine(script, dir.path());
        let id = engine
            .start_season_download("https://www.svtplay.se/agenda", DownloadOptions::default())
            .unwrap();

        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.message,
            "Season download completed: 2 downloaded, 1 skipped"
        );
        let season = job.season.unwrap();
        assert_eq!(season.total_episodes, 3);
        assert_eq!(season.completed_episodes, 2);
        assert_eq!(season.skipped_episodes, 1);
        assert_eq!(season.current_episode, Some(3));
        assert_eq!(season.episodes[&2].status, EpisodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_season_snapshots_keep_counter_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let script = "printf 'Episode 1 of 2\\nalready exists\\nEpisode 2 of 2\\ndownloading\\n'";
        let engine = engine(script, dir.path());
        let mut updates = engine.registry().subscribe();
        let id = engine
            .start_season_download("https://www.svtplay.se/agenda", DownloadOptions::default())
            .unwrap();
        engine.wait(&id).await.unwrap();

        while let Ok(job) = updates.try_recv() {
            if let Some(season) = job.season {
                assert!(
                    season.completed_episodes + season.skipped_episodes <= season.total_episodes
                );
            }
        }
    }

    #[tokio::test]
    async fn test_season_without_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("echo 'INFO: nothing here'", dir.path());
        let id = engine
            .start_season_download("https://www.svtplay.se/agenda", DownloadOptions::default())
            .unwrap();

        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.message, "Season download completed");
        assert!(job.season.is_none());
    }

    #[tokio::test]
    async fn test_options_reach_the_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let script = format!("printf '%s\\n' \"$@\" > '{}'", args_file.display());
        let engine = engine(&script, dir.path());
        let target = dir.path().join("custom");
        let options = DownloadOptions {
            quality: Some("480p".to_string()),
            subtitle: Some(false),
            download_dir: Some(target.clone()),
            token: Some("secret".to_string()),
        };
        let id = engine
            .start_download("https://www.tv4play.se/program/x", options)
            .unwrap();
        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.download_dir, target);

        let args = std::fs::read_to_string(&args_file).unwrap();
        let args: Vec<_> = args.lines().collect();
        let output = format!("{}/", target.display());
        assert_eq!(
            args,
            [
                "-q",
                "480",
                "--token",
                "secret",
                "-o",
                output.as_str(),
                "https://www.tv4play.se/program/x"
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_ends_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Invocation::new("/nonexistent/svtplay-dl"), dir.path());
        let id = engine
            .start_season_download("https://www.svtplay.se/agenda", DownloadOptions::default())
            .unwrap();

        let job = engine.wait(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.message, "Season download failed");
        assert_eq!(job.failure, None);
        assert!(job.error.unwrap().contains("failed to start svtplay-dl"));
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_read_error_stops_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(format!("echo $$ > '{}'; exec sleep 30", pid_file.display()));
        let child = command.spawn().unwrap();
        let pid = loop {
            match std::fs::read_to_string(&pid_file) {
                Ok(pid) if !pid.trim().is_empty() => break pid.trim().to_string(),
                _ => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };

        let engine = engine("true", dir.path());
        let worker = Worker {
            id: Uuid::new_v4(),
            kind: JobKind::Season,
            request: engine
                .defaults()
                .request("https://www.svtplay.se/agenda", DownloadOptions::default()),
            registry: engine.registry().clone(),
            downloader: engine.downloader.clone(),
        };
        let lines = tokio_stream::iter(vec![
            (Channel::Stderr, Ok(b"Episode 1 of 2".to_vec())),
            (Channel::Stdout, Err(io::Error::other("pipe broke"))),
        ]);

        let err = worker.track(child, lines).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to read svtplay-dl output"));
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid])
            .status()
            .unwrap();
        assert!(!alive.success());
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("true", dir.path());
        let err = engine
            .start_download("  ", DownloadOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UrlRequired));
        assert!(engine.get_all().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("true", dir.path());
        let err = engine.get_status(&Uuid::new_v4()).unwrap_err();
        assert_eq!(err.to_string(), "Download not found");
    }

    #[tokio::test]
    async fn test_jobs_listed_in_start_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("true", dir.path());
        let first = engine
            .start_download("https://a.example", DownloadOptions::default())
            .unwrap();
        let second = engine
            .start_season_download("https://b.example", DownloadOptions::default())
            .unwrap();
        engine.shutdown().await;

        let jobs = engine.get_all();
        assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), [first, second]);
        assert!(jobs.iter().all(|j| j.status.is_terminal()));
    }
}

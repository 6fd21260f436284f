use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::resolver::Invocation;
use crate::{Error, Result};

/// Default upper bound for the synchronous metadata and listing calls.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Requested stream quality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Quality {
    /// Let the tool pick, no `-q` flag is passed.
    #[default]
    Best,
    Explicit(String),
}

impl Quality {
    /// TV4 Play rejects `480p` and only accepts `480`, so a trailing `p` is dropped.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("best") {
            return Self::Best;
        }
        match value.strip_suffix('p').unwrap_or(value) {
            "" => Self::Best,
            stripped => Self::Explicit(stripped.to_string()),
        }
    }

    pub fn as_arg(&self) -> Option<&str> {
        match self {
            Self::Best => None,
            Self::Explicit(value) => Some(value.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: Quality,
    pub subtitle: bool,
    pub token: Option<String>,
    pub output_dir: PathBuf,
    pub filename_template: Option<String>,
}

impl DownloadRequest {
    fn push_args(&self, args: &mut Vec<OsString>) {
        if let Some(quality) = self.quality.as_arg() {
            args.push("-q".into());
            args.push(quality.into());
        }
        if self.subtitle {
            args.push("--subtitle".into());
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            args.push("--token".into());
            args.push(token.into());
        }
        if let Some(template) = self.filename_template.as_deref().filter(|t| !t.is_empty()) {
            args.push("--filename".into());
            args.push(template.into());
        }
        args.push("-o".into());
        args.push(output_dir_arg(&self.output_dir));
        args.push(self.url.clone().into());
    }
}

/// The trailing separator makes the tool treat `-o` as a directory and keep
/// its own file naming.
fn output_dir_arg(dir: &Path) -> OsString {
    let mut arg = dir.as_os_str().to_os_string();
    if !dir.as_os_str().to_string_lossy().ends_with(MAIN_SEPARATOR) {
        arg.push(MAIN_SEPARATOR.to_string());
    }
    arg
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    GetInfo { url: String },
    ListEpisodes { url: String },
    Download(DownloadRequest),
    DownloadSeason(DownloadRequest),
}

impl Action {
    pub fn args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        match self {
            Action::GetInfo { url } => {
                args.push("--json-info".into());
                args.push(url.into());
            }
            Action::ListEpisodes { url } => {
                args.push("--list-episodes".into());
                args.push(url.into());
            }
            Action::Download(request) => request.push_args(&mut args),
            Action::DownloadSeason(request) => {
                args.push("--all-episodes".into());
                request.push_args(&mut args);
            }
        }
        args
    }
}

/// Builds and runs `svtplay-dl` processes.
#[derive(Debug, Clone)]
pub struct SvtplayDl {
    invocation: Invocation,
    ffmpeg: Option<PathBuf>,
    timeout: Duration,
}

impl SvtplayDl {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            ffmpeg: None,
            timeout: METADATA_TIMEOUT,
        }
    }

    /// Overrides how long `get_info` and `list_episodes` may run before the tool is killed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ffmpeg(mut self, ffmpeg: Option<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    pub fn ffmpeg(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    /// Full argument vector, base invocation arguments first.
    pub fn argv(&self, action: &Action) -> Vec<OsString> {
        let mut argv = self.invocation.args.clone();
        argv.extend(action.args());
        argv
    }

    /// `PATH` for the child with the directory of the resolved `ffmpeg` in front.
    pub fn search_path(&self) -> Option<OsString> {
        let dir = self.ffmpeg.as_deref()?.parent()?;
        if dir.as_os_str().is_empty() {
            return None;
        }
        let current = std::env::var_os("PATH").unwrap_or_default();
        let dirs = std::iter::once(dir.to_path_buf()).chain(std::env::split_paths(&current));
        std::env::join_paths(dirs).ok()
    }

    /// Command with piped output, ready to spawn.
    pub fn command(&self, action: &Action) -> Command {
        let mut command = Command::new(&self.invocation.program);
        command
            .args(self.argv(action))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = self.search_path() {
            command.env("PATH", path);
        }
        command
    }

    /// Human readable command line for logging.
    pub fn describe(&self, action: &Action) -> String {
        let argv = self.argv(action);
        std::iter::once(self.invocation.program.as_os_str())
            .chain(argv.iter().map(OsString::as_os_str))
            .map(OsStr::to_string_lossy)
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn run_with_timeout(&self, action: &Action) -> Result<std::process::Output> {
        debug!(command = %self.describe(action), "running svtplay-dl");
        let mut command = self.command(action);
        command.kill_on_drop(true);
        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(Error::TimedOut),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_info(&self, url: &str) -> Result<serde_json::Value> {
        let action = Action::GetInfo {
            url: url.to_string(),
        };
        let output = self.run_with_timeout(&action).await?;
        if !output.status.success() {
            return Err(failure(&output.stderr, "Failed to get video information"));
        }
        serde_json::from_slice(&output.stdout).map_err(Error::ParseInfo)
    }

    #[instrument(skip(self))]
    pub async fn list_episodes(&self, url: &str) -> Result<Vec<String>> {
        let action = Action::ListEpisodes {
            url: url.to_string(),
        };
        let output = self.run_with_timeout(&action).await?;
        if !output.status.success() {
            return Err(failure(&output.stderr, "Failed to list episodes"));
        }
        Ok(episode_urls(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn failure(stderr: &[u8], fallback: &str) -> Error {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        Error::Failed(fallback.to_string())
    } else {
        Error::Failed(stderr.to_string())
    }
}

fn episode_urls(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http"))
        .map(ToString::to_string)
        .collect()
}

//! Multiplexing of separately downloaded audio and video streams.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use ahash::AHashSet;
use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

pub const MERGE_TIMEOUT: Duration = Duration::from_secs(300);

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "ts", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "aac", "mp3", "opus"];
const AUDIO_MARKER: &str = ".audio.";
const MERGED_MARKER: &str = ".merged.";
/// File timestamps come from a coarser clock than `SystemTime::now`.
const MTIME_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePair {
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl MergePair {
    /// Temporary output next to the video, renamed over it once ffmpeg succeeds.
    pub fn output(&self) -> PathBuf {
        let stem = self.video.file_stem().unwrap_or_default().to_string_lossy();
        let extension = self.video.extension().unwrap_or_default().to_string_lossy();
        self.video
            .with_file_name(format!("{stem}{MERGED_MARKER}{extension}"))
    }
}

fn split_name(path: &Path) -> Option<(&str, &str)> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.rsplit_once('.')
}

/// Finds `<stem>.<ext>` + `<stem>.audio.<ext>` and video + same-stem audio-only siblings.
pub fn find_pairs(files: &[PathBuf]) -> Vec<MergePair> {
    let present: AHashSet<&Path> = files.iter().map(PathBuf::as_path).collect();
    let mut used = AHashSet::new();
    let mut pairs = Vec::new();

    for video in files.iter().sorted() {
        let Some((stem, extension)) = split_name(video) else {
            continue;
        };
        let name = format!("{stem}.{extension}");
        if name.contains(AUDIO_MARKER) || name.contains(MERGED_MARKER) {
            continue;
        }
        let lower = extension.to_ascii_lowercase();
        if AUDIO_EXTENSIONS.contains(&lower.as_str()) {
            continue;
        }

        let mut candidates = vec![video.with_file_name(format!("{stem}{AUDIO_MARKER}{extension}"))];
        if VIDEO_EXTENSIONS.contains(&lower.as_str()) {
            candidates.extend(
                AUDIO_EXTENSIONS
                    .iter()
                    .map(|audio| video.with_file_name(format!("{stem}.{audio}"))),
            );
        }

        let audio = candidates
            .into_iter()
            .find(|c| present.contains(c.as_path()) && !used.contains(c));
        if let Some(audio) = audio {
            used.insert(audio.clone());
            pairs.push(MergePair {
                video: video.clone(),
                audio,
            });
        }
    }
    pairs
}

/// Regular files in `dir`, limited to those modified at or after `since` when given.
async fn list_files(dir: &Path, since: Option<SystemTime>) -> Result<Vec<PathBuf>> {
    let cutoff = since.map(|t| t.checked_sub(MTIME_SLACK).unwrap_or(t));
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        if let Some(cutoff) = cutoff {
            match metadata.modified() {
                Ok(modified) if modified >= cutoff => {}
                _ => continue,
            }
        }
        files.push(entry.path());
    }
    Ok(files)
}

/// Merges recognised pairs in `dir`. With `since` set, only files written after it are
/// considered, which keeps one job away from another job's half finished streams.
/// Returns the number of merged pairs.
#[instrument(skip(ffmpeg))]
pub async fn merge_directory(
    ffmpeg: &Path,
    dir: &Path,
    since: Option<SystemTime>,
) -> Result<usize> {
    let pairs = find_pairs(&list_files(dir, since).await?);
    if pairs.is_empty() {
        debug!("no separate audio and video streams found");
        return Ok(0);
    }
    let mut merged = 0;
    for pair in pairs {
        match merge_pair(ffmpeg, &pair).await {
            Ok(()) => {
                info!(video = %pair.video.display(), "merged audio into video");
                merged += 1;
            }
            Err(err) => warn!(
                video = %pair.video.display(),
                audio = %pair.audio.display(),
                "failed to merge streams, keeping originals: {err:#}"
            ),
        }
    }
    Ok(merged)
}

async fn merge_pair(ffmpeg: &Path, pair: &MergePair) -> Result<()> {
    let output = pair.output();
    let mut command = Command::new(ffmpeg);
    command
        .args(["-nostdin", "-y", "-i"])
        .arg(&pair.video)
        .arg("-i")
        .arg(&pair.audio)
        .args(["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"])
        .arg(&output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let result = match tokio::time::timeout(MERGE_TIMEOUT, command.output()).await {
        Err(_) => Err(anyhow!("ffmpeg timed out after {}s", MERGE_TIMEOUT.as_secs())),
        Ok(Err(err)) => Err(anyhow::Error::new(err).context("failed to run ffmpeg")),
        Ok(Ok(out)) if !out.status.success() => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail = stderr.lines().rev().take(5).collect::<Vec<_>>();
            Err(anyhow!(
                "ffmpeg exited with {}: {}",
                out.status,
                tail.into_iter().rev().join(" | ")
            ))
        }
        Ok(Ok(_)) => Ok(()),
    };
    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&output).await;
        return Err(err);
    }

    if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
        bail!("ffmpeg did not produce {}", output.display());
    }
    tokio::fs::rename(&output, &pair.video)
        .await
        .with_context(|| format!("failed to replace {}", pair.video.display()))?;
    if let Err(err) = tokio::fs::remove_file(&pair.audio).await {
        warn!(audio = %pair.audio.display(), "merged, but failed to remove audio stream: {err}");
    }
    Ok(())
}

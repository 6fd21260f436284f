//! Incremental reading of the `svtplay-dl` diagnostic stream.
//!
//! The tool announces every episode of a season with `Episode N of M` and
//! follows it with the url, the output file and either a download or an
//! "already exists" notice. There is no completion line, an episode that was
//! downloading when the process exits counts as completed.

use std::collections::BTreeMap;

use regex::Regex;

use crate::Result;

const EPISODE_PATTERN: &str = r"(?i)Episode\s+(\d+)\s+of\s+(\d+)";
const URL_PATTERN: &str = r"(?i)Url:\s+(https?://\S+)";
const OUTFILE_PATTERN: &str = r"(?i)Outfile:\s+(.+)";
const EXISTS_PATTERN: &str = r"(?i)already exists";
const DOWNLOADING_PATTERN: &str = r"(?i)downloading";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeStatus {
    Processing,
    Downloading,
    Skipped,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub number: u32,
    pub total: u32,
    pub status: EpisodeStatus,
    pub url: Option<String>,
    pub filename: Option<String>,
    pub skipped: bool,
}

impl Episode {
    fn new(number: u32, total: u32) -> Self {
        Self {
            number,
            total,
            status: EpisodeStatus::Processing,
            url: None,
            filename: None,
            skipped: false,
        }
    }
}

/// Aggregate counters over the tracked episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: u32,
    pub completed: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone)]
struct Patterns {
    episode: Regex,
    url: Regex,
    outfile: Regex,
    exists: Regex,
    downloading: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            episode: Regex::new(EPISODE_PATTERN)?,
            url: Regex::new(URL_PATTERN)?,
            outfile: Regex::new(OUTFILE_PATTERN)?,
            exists: Regex::new(EXISTS_PATTERN)?,
            downloading: Regex::new(DOWNLOADING_PATTERN)?,
        })
    }
}

/// Episode state built up one line at a time.
#[derive(Debug, Clone)]
pub struct EpisodeTracker {
    patterns: Patterns,
    current: Option<u32>,
    declared_total: u32,
    episodes: BTreeMap<u32, Episode>,
    message: Option<String>,
}

impl EpisodeTracker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: Patterns::new()?,
            current: None,
            declared_total: 0,
            episodes: BTreeMap::new(),
            message: None,
        })
    }

    /// Applies a single output line. Returns `true` when episode state changed.
    pub fn apply_line(&mut self, line: &str) -> bool {
        let line = line.trim();
        let mut changed = false;

        if let Some((number, total)) = self.parse_episode(line) {
            self.declared_total = self.declared_total.max(total);
            self.episodes.insert(number, Episode::new(number, total));
            self.current = Some(number);
            self.message = Some(format!("Processing episode {number} of {total}"));
            changed = true;
        }

        let Some(current) = self.current else {
            return changed;
        };
        let patterns = &self.patterns;
        let Some(episode) = self.episodes.get_mut(&current) else {
            return changed;
        };

        if let Some(url) = patterns.url.captures(line).and_then(|c| c.get(1)) {
            episode.url = Some(url.as_str().to_string());
            changed = true;
        }
        if let Some(outfile) = patterns.outfile.captures(line).and_then(|c| c.get(1)) {
            episode.filename = Some(outfile.as_str().trim().to_string());
            changed = true;
        }
        if patterns.exists.is_match(line) {
            episode.status = EpisodeStatus::Skipped;
            episode.skipped = true;
            changed = true;
        } else if patterns.downloading.is_match(line) && !episode.skipped {
            episode.status = EpisodeStatus::Downloading;
            changed = true;
        }
        changed
    }

    fn parse_episode(&self, line: &str) -> Option<(u32, u32)> {
        let captures = self.patterns.episode.captures(line)?;
        let number = captures.get(1)?.as_str().parse().ok()?;
        let total = captures.get(2)?.as_str().parse().ok()?;
        Some((number, total))
    }

    /// Called once the process has exited.
    pub fn finish(&mut self) {
        for episode in self.episodes.values_mut() {
            if episode.status == EpisodeStatus::Downloading {
                episode.status = EpisodeStatus::Completed;
            }
        }
    }

    pub fn episodes(&self) -> &BTreeMap<u32, Episode> {
        &self.episodes
    }

    pub fn current_episode(&self) -> Option<u32> {
        self.current
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// `None` until the first episode has been announced.
    pub fn summary(&self) -> Option<Summary> {
        if self.episodes.is_empty() {
            return None;
        }
        let count = |status| {
            let n = self.episodes.values().filter(|e| e.status == status).count();
            u32::try_from(n).unwrap_or(u32::MAX)
        };
        let tracked = u32::try_from(self.episodes.len()).unwrap_or(u32::MAX);
        Some(Summary {
            total: self.declared_total.max(tracked),
            completed: count(EpisodeStatus::Completed),
            skipped: count(EpisodeStatus::Skipped),
        })
    }
}

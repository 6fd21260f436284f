//! Thin wrapper around the `svtplay-dl` command line tool.
//!
//! Locates the tool, builds its command lines and interprets what it prints.
//! Job bookkeeping lives with the caller.

pub mod classify;
pub mod command;
pub mod parsers;
pub mod resolver;

pub use classify::{Failure, FailureKind, Outcome, Service};
pub use command::{Action, DownloadRequest, Quality, SvtplayDl};
pub use parsers::{Episode, EpisodeStatus, EpisodeTracker, Summary};
pub use resolver::{FsProbe, Invocation, Probe, Resolution};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request timed out")]
    TimedOut,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to parse video information")]
    ParseInfo(#[source] serde_json::Error),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

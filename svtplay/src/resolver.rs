//! Discovery of the external executables.
//!
//! Every lookup goes through a [`Probe`] so the resolution order can be
//! exercised without touching the real filesystem or environment.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Read-only view of the filesystem and process environment.
pub trait Probe {
    fn is_file(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> Vec<PathBuf>;
    fn var(&self, key: &str) -> Option<OsString>;
}

/// [`Probe`] backed by the real filesystem and environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl Probe for FsProbe {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_dir(&self, path: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(path) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn var(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound,
}

impl Resolution {
    pub fn found(self) -> Option<PathBuf> {
        match self {
            Resolution::Found(path) => Some(path),
            Resolution::NotFound => None,
        }
    }
}

/// A single place an executable may live, checked in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    File(PathBuf),
    /// First file inside `dir` whose name starts with `prefix`.
    Prefixed { dir: PathBuf, prefix: String },
    /// Bare command name looked up on `PATH`.
    SearchPath(String),
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    candidates: Vec<Candidate>,
}

impl Resolver {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn resolve(&self, probe: &impl Probe) -> Resolution {
        for candidate in &self.candidates {
            if let Some(path) = check(candidate, probe) {
                debug!(path = %path.display(), "resolved executable");
                return Resolution::Found(path);
            }
        }
        Resolution::NotFound
    }
}

fn check(candidate: &Candidate, probe: &impl Probe) -> Option<PathBuf> {
    match candidate {
        Candidate::File(path) => probe.is_file(path).then(|| path.clone()),
        Candidate::Prefixed { dir, prefix } => {
            let mut matches: Vec<PathBuf> = probe
                .read_dir(dir)
                .into_iter()
                .filter(|p| file_name_starts_with(p, prefix))
                .filter(|p| probe.is_file(p))
                .collect();
            matches.sort();
            matches.into_iter().next()
        }
        Candidate::SearchPath(name) => {
            let path_var = probe.var("PATH")?;
            std::env::split_paths(&path_var)
                .map(|dir| dir.join(name))
                .find(|p| probe.is_file(p))
        }
    }
}

fn file_name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| name.starts_with(prefix))
}

/// Program plus leading arguments used to start the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(windows)]
const SCRIPTS_DIR: &str = "Scripts";
#[cfg(not(windows))]
const SCRIPTS_DIR: &str = "bin";

#[cfg(windows)]
const LIB_DIR: &str = "Lib";
#[cfg(not(windows))]
const LIB_DIR: &str = "lib";

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Locates `svtplay-dl`: the active virtual environment first, then the
/// environment's python running the module, then the bare command.
pub fn svtplay_dl(probe: &impl Probe) -> Invocation {
    if let Some(venv) = probe.var("VIRTUAL_ENV").map(PathBuf::from) {
        let scripts = venv.join(SCRIPTS_DIR);
        let executable = scripts.join(exe_name("svtplay-dl"));
        if probe.is_file(&executable) {
            return Invocation::new(executable);
        }
        let python = scripts.join(exe_name("python"));
        if probe.is_file(&python) {
            return Invocation::new(python).arg("-m").arg("svtplay_dl");
        }
    }
    Invocation::new("svtplay-dl")
}

/// Candidate list for `ffmpeg`, in resolution order.
pub fn ffmpeg_candidates(probe: &impl Probe, base_dir: &Path) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    if let Some(exe) = probe.var("IMAGEIO_FFMPEG_EXE") {
        candidates.push(Candidate::File(exe.into()));
    }
    if let Some(venv) = probe.var("VIRTUAL_ENV").map(PathBuf::from) {
        for site_packages in site_packages(probe, &venv) {
            candidates.push(Candidate::Prefixed {
                dir: site_packages.join("imageio_ffmpeg").join("binaries"),
                prefix: "ffmpeg".to_string(),
            });
        }
    }
    candidates.push(Candidate::File(base_dir.join("bin").join(exe_name("ffmpeg"))));
    candidates.push(Candidate::SearchPath(exe_name("ffmpeg")));
    candidates
}

fn site_packages(probe: &impl Probe, venv: &Path) -> Vec<PathBuf> {
    let lib = venv.join(LIB_DIR);
    if cfg!(windows) {
        return vec![lib.join("site-packages")];
    }
    let mut dirs: Vec<PathBuf> = probe
        .read_dir(&lib)
        .into_iter()
        .filter(|p| file_name_starts_with(p, "python"))
        .map(|p| p.join("site-packages"))
        .collect();
    dirs.sort();
    dirs
}

/// Resolves `ffmpeg`, logging a warning when nothing was found.
pub fn ffmpeg(probe: &impl Probe, base_dir: &Path) -> Resolution {
    let resolution = Resolver::new(ffmpeg_candidates(probe, base_dir)).resolve(probe);
    if resolution == Resolution::NotFound {
        warn!("ffmpeg not found, audio and video streams will not be merged");
    }
    resolution
}

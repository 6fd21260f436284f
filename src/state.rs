use std::sync::Arc;

use anyhow::Result;
use axum::extract::FromRef;
use tracing::{info, warn};

use svtplay::{resolver, FsProbe, Invocation, SvtplayDl};

use crate::config::Config;
use crate::jobs::engine::{Defaults, JobEngine};
use crate::jobs::registry::JobRegistry;
use crate::profiles::ProfileStore;

#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: JobEngine,
    pub profiles: ProfileStore,
    pub config: Arc<Config>,
}

impl AppState {
    /// Locates the external tools and loads the saved profiles.
    pub async fn new(config: Config) -> Result<Self> {
        config.init()?;
        let downloader = locate_tools(&config)?;
        Ok(Self::with_downloader(config, downloader).await)
    }

    pub async fn with_downloader(config: Config, downloader: SvtplayDl) -> Self {
        let defaults = Defaults {
            download_dir: config.download_dir.clone(),
            quality: config.default_quality.clone(),
            subtitle: config.default_subtitle,
            filename_template: config.filename_template.clone(),
        };
        let engine = JobEngine::new(JobRegistry::new(), downloader, defaults);
        let profiles = ProfileStore::load(config.profiles_file.clone()).await;
        Self {
            engine,
            profiles,
            config: Arc::new(config),
        }
    }
}

fn locate_tools(config: &Config) -> Result<SvtplayDl> {
    let probe = FsProbe;
    let invocation = match &config.svtplay_dl_path {
        Some(path) => Invocation::new(path),
        None => resolver::svtplay_dl(&probe),
    };
    let ffmpeg = match &config.ffmpeg_path {
        Some(path) if path.is_file() => Some(path.clone()),
        Some(path) => {
            warn!(path = %path.display(), "configured ffmpeg does not exist");
            None
        }
        None => resolver::ffmpeg(&probe, &std::env::current_dir()?).found(),
    };
    info!(
        svtplay_dl = ?invocation.program,
        ffmpeg = ?ffmpeg,
        max_concurrent_downloads = config.max_concurrent_downloads,
        "external tools located"
    );
    Ok(SvtplayDl::new(invocation).with_ffmpeg(ffmpeg))
}

impl FromRef<AppState> for JobEngine {
    fn from_ref(input: &AppState) -> Self {
        input.engine.clone()
    }
}

impl FromRef<AppState> for ProfileStore {
    fn from_ref(input: &AppState) -> Self {
        input.profiles.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(input: &AppState) -> Self {
        input.config.clone()
    }
}

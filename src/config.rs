use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

const ENV_PREFIX: &str = "SVTPLAY_WEB_";

/// Server settings, read from `SVTPLAY_WEB_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_quality")]
    pub default_quality: String,
    #[serde(default = "default_true")]
    pub default_subtitle: bool,
    /// Advisory, downloads are not queued against it.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_profiles_file")]
    pub profiles_file: PathBuf,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    pub filename_template: Option<String>,
    pub svtplay_dl_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    5000
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_quality() -> String {
    "best".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_profiles_file() -> PathBuf {
    PathBuf::from("profiles.json")
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            download_dir: default_download_dir(),
            default_quality: default_quality(),
            default_subtitle: true,
            max_concurrent_downloads: default_max_concurrent_downloads(),
            profiles_file: default_profiles_file(),
            static_dir: default_static_dir(),
            filename_template: None,
            svtplay_dl_path: None,
            ffmpeg_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .context("invalid SVTPLAY_WEB_ configuration")
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Creates the download root.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.download_dir)
            .with_context(|| format!("failed to create {}", self.download_dir.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Config {
        let vars = vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), (*v).to_string()));
        envy::prefixed(ENV_PREFIX).from_iter(vars).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.socket_addr(), "0.0.0.0:5000".parse().unwrap());
        assert!(!config.debug);
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.default_quality, "best");
        assert!(config.default_subtitle);
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.profiles_file, PathBuf::from("profiles.json"));
        assert_eq!(config.ffmpeg_path, None);
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DEBUG", "true"),
            ("DEFAULT_SUBTITLE", "false"),
            ("DOWNLOAD_DIR", "/srv/video"),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
        ]);
        assert_eq!(config.socket_addr(), "127.0.0.1:8080".parse().unwrap());
        assert!(config.debug);
        assert!(!config.default_subtitle);
        assert_eq!(config.download_dir, PathBuf::from("/srv/video"));
        assert_eq!(
            config.ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
    }

    #[test]
    fn test_init_creates_download_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: dir.path().join("a").join("b"),
            ..Config::default()
        };
        config.init().unwrap();
        assert!(config.download_dir.is_dir());
    }
}

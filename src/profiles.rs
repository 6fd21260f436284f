//! Saved download profiles, persisted as a single JSON document keyed by id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::Error;
use crate::models::{profile_id, Profile, ProfileInput};

type Profiles = BTreeMap<String, Profile>;

#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: Arc<PathBuf>,
    profiles: Arc<Mutex<Profiles>>,
}

impl ProfileStore {
    /// A missing or unreadable file starts an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles = match read(&path).await {
            Ok(profiles) => {
                debug!(path = %path.display(), "loaded {} profiles", profiles.len());
                profiles
            }
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Profiles::new(),
            Err(err) => {
                warn!(path = %path.display(), "failed to load profiles: {err}");
                Profiles::new()
            }
        };
        Self {
            path: Arc::new(path),
            profiles: Arc::new(Mutex::new(profiles)),
        }
    }

    pub async fn all(&self) -> Vec<Profile> {
        self.profiles.lock().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Result<Profile, Error> {
        self.profiles
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or(Error::ProfileNotFound)
    }

    /// Case-insensitive substring match on the profile name.
    pub async fn search(&self, query: &str) -> Vec<Profile> {
        let query = query.trim().to_lowercase();
        self.profiles
            .lock()
            .await
            .values()
            .filter(|p| p.name.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }

    /// Creates or overwrites the profile derived from `input.name`.
    pub async fn save(&self, input: ProfileInput, default_dir: &Path) -> Result<Profile, Error> {
        let name = input.name.as_deref().map(str::trim).unwrap_or_default();
        let url = input.url.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || url.is_empty() {
            return Err(Error::ProfileFieldsRequired);
        }

        let id = profile_id(name);
        let mut profiles = self.profiles.lock().await;
        let now = Utc::now();
        let created_at = profiles.get(&id).map_or(now, |p| p.created_at);
        let quality = input
            .quality
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| "best".to_string());
        let profile = Profile {
            id: id.clone(),
            name: name.to_string(),
            url: url.to_string(),
            download_dir: input
                .download_dir
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| default_dir.display().to_string()),
            quality,
            subtitle: input.subtitle.unwrap_or(true),
            download_type: input.download_type.unwrap_or_default(),
            token: input.token.filter(|t| !t.trim().is_empty()),
            created_at,
            updated_at: now,
        };

        let mut updated = profiles.clone();
        updated.insert(id.clone(), profile.clone());
        write(&self.path, &updated).await?;
        *profiles = updated;
        info!(%id, "saved profile");
        Ok(profile)
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let mut profiles = self.profiles.lock().await;
        if !profiles.contains_key(id) {
            return Err(Error::ProfileNotFound);
        }
        let mut updated = profiles.clone();
        updated.remove(id);
        write(&self.path, &updated).await?;
        *profiles = updated;
        info!(%id, "deleted profile");
        Ok(())
    }
}

async fn read(path: &Path) -> Result<Profiles, Error> {
    let content = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&content)?)
}

async fn write(path: &Path, profiles: &Profiles) -> Result<(), Error> {
    let content = serde_json::to_vec_pretty(profiles)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobKind;

    fn input(name: &str, url: &str) -> ProfileInput {
        ProfileInput {
            name: Some(name.to_string()),
            url: Some(url.to_string()),
            ..ProfileInput::default()
        }
    }

    #[tokio::test]
    async fn test_same_id_keeps_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json")).await;
        let first = store
            .save(input("My Show", "https://www.svtplay.se/a"), dir.path())
            .await
            .unwrap();
        let second = store
            .save(input("my show", "https://www.svtplay.se/b"), dir.path())
            .await
            .unwrap();

        assert_eq!(first.id, "my_show");
        assert_eq!(second.id, "my_show");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        let all = store.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].url, "https://www.svtplay.se/b");
    }

    #[tokio::test]
    async fn test_defaults_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let store = ProfileStore::load(&path).await;
        let saved = store
            .save(input("Agenda", "https://www.svtplay.se/agenda"), dir.path())
            .await
            .unwrap();
        assert_eq!(saved.quality, "best");
        assert!(saved.subtitle);
        assert_eq!(saved.download_type, JobKind::Single);
        assert_eq!(saved.download_dir, dir.path().display().to_string());

        let reloaded = ProfileStore::load(&path).await;
        assert_eq!(reloaded.get("agenda").await.unwrap(), saved);
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["agenda"]["name"], "Agenda");
        assert!(json["agenda"].get("token").is_none());
    }

    #[tokio::test]
    async fn test_requires_name_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json")).await;
        let err = store
            .save(input(" ", "https://x"), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Name and URL are required");
        let err = store
            .save(
                ProfileInput {
                    name: Some("x".to_string()),
                    ..ProfileInput::default()
                },
                dir.path(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProfileFieldsRequired));
    }

    #[tokio::test]
    async fn test_search_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::load(dir.path().join("profiles.json")).await;
        for name in ["Agenda", "Rapport", "Aktuellt"] {
            store
                .save(input(name, "https://www.svtplay.se/x"), dir.path())
                .await
                .unwrap();
        }
        let found: Vec<_> = store.search("a").await.into_iter().map(|p| p.id).collect();
        assert_eq!(found, ["agenda", "aktuellt", "rapport"]);
        let found: Vec<_> = store.search("RAPP").await.into_iter().map(|p| p.id).collect();
        assert_eq!(found, ["rapport"]);

        store.delete("rapport").await.unwrap();
        assert!(matches!(
            store.get("rapport").await,
            Err(Error::ProfileNotFound)
        ));
        assert!(matches!(
            store.delete("rapport").await,
            Err(Error::ProfileNotFound)
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = ProfileStore::load(&path).await;
        assert!(store.all().await.is_empty());
    }
}

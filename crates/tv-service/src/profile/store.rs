//! TOML-backed profile store
//!
//! Profiles live in a single database file. Importing a profile copies its
//! source file into the cache directory so later edits to the source never
//! affect a running engine until the profile is re-imported.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use tv_core::traits::ProfileStore;
use tv_core::{Profile, ProfileId, ProfileInfo, ProxySelection, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileDatabase {
    #[serde(default)]
    next_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<ProfileId>,

    #[serde(default)]
    profiles: Vec<Profile>,
}

impl ProfileDatabase {
    fn find(&self, id: ProfileId) -> Result<&Profile, StoreError> {
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    fn find_mut(&mut self, id: ProfileId) -> Result<&mut Profile, StoreError> {
        self.profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))
    }
}

/// Profile store persisted as TOML
pub struct FileProfileStore {
    path: PathBuf,
    cache_dir: PathBuf,
    db: Mutex<ProfileDatabase>,
}

impl FileProfileStore {
    /// Open the database at `path`, starting empty if it does not exist
    pub async fn open(
        path: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let cache_dir = cache_dir.into();

        let db = match tokio::fs::read_to_string(&path).await {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProfileDatabase::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = ?path, "Opened profile store");

        Ok(Self {
            path,
            cache_dir,
            db: Mutex::new(db),
        })
    }

    /// Database file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, db: &ProfileDatabase) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(db)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename keeps the database intact if we die mid-write
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn query_active_profile(&self) -> Result<Option<Profile>, StoreError> {
        let db = self.db.lock().await;
        Ok(db.active.and_then(|id| db.find(id).ok()).cloned())
    }

    async fn query_profile_selected_proxies(
        &self,
        id: ProfileId,
    ) -> Result<ProxySelection, StoreError> {
        let db = self.db.lock().await;
        Ok(db.find(id)?.selected.clone())
    }

    async fn set_profile_selected_proxy(
        &self,
        id: ProfileId,
        group: &str,
        proxy: &str,
    ) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        db.find_mut(id)?.selected.select(group, proxy);
        self.persist(&db).await
    }

    async fn remove_proxy_selections(
        &self,
        id: ProfileId,
        groups: &[String],
    ) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        if db.find_mut(id)?.selected.remove_groups(groups) > 0 {
            self.persist(&db).await?;
        }
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileInfo>, StoreError> {
        let db = self.db.lock().await;
        Ok(db
            .profiles
            .iter()
            .map(|p| ProfileInfo {
                id: p.id,
                name: p.name.clone(),
                cache_path: p.cache_path.clone(),
                active: db.active == Some(p.id),
            })
            .collect())
    }

    async fn create_profile(&self, name: &str, source: &Path) -> Result<Profile, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("profile name must not be empty".into()));
        }
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(StoreError::SourceNotFound(source.to_path_buf()));
        }

        let mut db = self.db.lock().await;

        let id = ProfileId(db.next_id + 1);
        let cache_path = self.cache_dir.join(format!("{}.yaml", id));

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        tokio::fs::copy(source, &cache_path).await?;

        let profile = Profile {
            id,
            name: name.to_string(),
            cache_path,
            selected: ProxySelection::new(),
        };

        db.next_id = id.0;
        db.profiles.push(profile.clone());
        // The first profile becomes active
        if db.active.is_none() {
            db.active = Some(id);
        }
        self.persist(&db).await?;

        tracing::info!(profile = %profile.name, id = %id, "Created profile");
        Ok(profile)
    }

    async fn set_active_profile(&self, id: ProfileId) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        db.find(id)?;
        db.active = Some(id);
        self.persist(&db).await
    }

    async fn delete_profile(&self, id: ProfileId) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        let index = db
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;

        let removed = db.profiles.remove(index);
        if db.active == Some(id) {
            db.active = None;
        }
        self.persist(&db).await?;

        match tokio::fs::remove_file(&removed.cache_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove cached profile {:?}: {}", removed.cache_path, e),
        }

        tracing::info!(profile = %removed.name, id = %id, "Deleted profile");
        Ok(())
    }
}

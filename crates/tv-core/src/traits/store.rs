//! Profile store trait

use async_trait::async_trait;
use std::path::Path;

use crate::error::StoreError;
use crate::types::{Profile, ProfileId, ProfileInfo, ProxySelection};

/// Persistent profile database
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The profile the engine should run, if any
    async fn query_active_profile(&self) -> Result<Option<Profile>, StoreError>;

    /// Persisted proxy choices of a profile
    async fn query_profile_selected_proxies(
        &self,
        id: ProfileId,
    ) -> Result<ProxySelection, StoreError>;

    /// Persist a proxy choice for a profile
    async fn set_profile_selected_proxy(
        &self,
        id: ProfileId,
        group: &str,
        proxy: &str,
    ) -> Result<(), StoreError>;

    /// Drop the choices of groups that no longer apply
    async fn remove_proxy_selections(
        &self,
        id: ProfileId,
        groups: &[String],
    ) -> Result<(), StoreError>;

    /// Every stored profile
    async fn list_profiles(&self) -> Result<Vec<ProfileInfo>, StoreError>;

    /// Import the profile file at `source` under `name`
    async fn create_profile(&self, name: &str, source: &Path) -> Result<Profile, StoreError>;

    /// Make a profile the active one
    async fn set_active_profile(&self, id: ProfileId) -> Result<(), StoreError>;

    /// Remove a profile and its cached file
    async fn delete_profile(&self, id: ProfileId) -> Result<(), StoreError>;
}

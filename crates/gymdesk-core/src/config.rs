//! Offline engine configuration
//!
//! One `OfflineConfig` is built at startup and shared by every component.
//! Bumping `cache_version` rolls all four cache namespaces at once.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{GymDeskError, GymDeskResult};
use crate::types::{CacheRole, CacheSet};

/// Offline engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Prefix of every cache namespace
    pub app_name: String,

    /// Version tag shared by all cache namespaces
    pub cache_version: String,

    /// Origin the worker is registered for
    pub origin: Url,

    /// Resources fetched during install
    pub precache: PrecacheManifest,

    /// Age after which a cache-first entry is revalidated
    pub freshness_window_secs: u64,

    /// Entry bounds for runtime caches
    pub eviction: EvictionConfig,

    /// Background sync tags
    pub sync: SyncConfig,

    /// Fallback values for push notifications
    pub notifications: NotificationDefaults,

    /// Platform features available to the worker
    pub capabilities: Capabilities,

    /// Cache database location
    pub storage_path: Option<PathBuf>,
}

/// Install-time manifest, split by destination namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecacheManifest {
    /// Application shell routes, stored in the primary namespace
    pub shell: Vec<String>,

    /// Static assets, stored in the static namespace
    pub static_assets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Maximum entries in the dynamic (API) cache
    pub dynamic_max_entries: Option<usize>,

    /// Maximum entries in the image cache
    pub images_max_entries: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// One-shot background sync tag
    pub tag: String,

    /// Periodic background sync tag
    pub periodic_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub url: String,
    pub vibrate: Vec<u32>,
}

/// Capability checks performed before handlers are registered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capabilities {
    pub push: bool,
    pub background_sync: bool,
    pub periodic_sync: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            app_name: "gymdesk".to_string(),
            cache_version: "v1".to_string(),
            origin: Url::parse("http://localhost:3000/").expect("static origin is valid"),
            precache: PrecacheManifest::default(),
            freshness_window_secs: 60 * 60,
            eviction: EvictionConfig::default(),
            sync: SyncConfig::default(),
            notifications: NotificationDefaults::default(),
            capabilities: Capabilities::default(),
            storage_path: None,
        }
    }
}

impl Default for PrecacheManifest {
    fn default() -> Self {
        Self {
            shell: vec!["/".to_string(), "/home".to_string(), "/login".to_string()],
            static_assets: vec![
                "/logo.png".to_string(),
                "/sounds/notification.mp3".to_string(),
                "/manifest.json".to_string(),
            ],
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            dynamic_max_entries: Some(100),
            images_max_entries: Some(60),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "sync-gym-data".to_string(),
            periodic_tag: "periodic-gym-sync".to_string(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "GymDesk".to_string(),
            body: "You have a new notification".to_string(),
            icon: "/logo.png".to_string(),
            badge: "/logo.png".to_string(),
            url: "/".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            push: true,
            background_sync: true,
            periodic_sync: false,
        }
    }
}

impl OfflineConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> GymDeskResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce ambiguous namespaces.
    pub fn validate(&self) -> GymDeskResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(GymDeskError::config("app_name must not be empty"));
        }
        if self.cache_version.trim().is_empty() {
            return Err(GymDeskError::config("cache_version must not be empty"));
        }
        if self.freshness_window_secs == 0 {
            return Err(GymDeskError::config("freshness_window_secs must be positive"));
        }
        if self.sync.tag == self.sync.periodic_tag {
            return Err(GymDeskError::config("sync tags must differ"));
        }
        Ok(())
    }

    /// Current namespaces for this version.
    pub fn namespaces(&self) -> CacheSet {
        CacheSet::new(&self.app_name, &self.cache_version)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    /// Entry bound for a role; precache roles are never bounded.
    pub fn max_entries(&self, role: CacheRole) -> Option<usize> {
        match role {
            CacheRole::Dynamic => self.eviction.dynamic_max_entries,
            CacheRole::Images => self.eviction.images_max_entries,
            CacheRole::Primary | CacheRole::Static => None,
        }
    }

    /// Resolve a path against the configured origin.
    pub fn resolve(&self, path: &str) -> GymDeskResult<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Database path, defaulting to the platform data directory.
    pub fn storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(&self.app_name)
                .join("offline-cache.sqlite3")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = OfflineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.freshness_window(), Duration::from_secs(3600));
        assert_eq!(config.namespaces().primary.as_str(), "gymdesk-v1");
    }

    #[test]
    fn test_precache_bounds() {
        let config = OfflineConfig::default();
        assert_eq!(config.max_entries(CacheRole::Primary), None);
        assert_eq!(config.max_entries(CacheRole::Static), None);
        assert_eq!(config.max_entries(CacheRole::Dynamic), Some(100));
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cache_version": "v7", "origin": "https://gym.example/"}}"#).unwrap();

        let config = OfflineConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_version, "v7");
        assert_eq!(config.namespaces().images.as_str(), "gymdesk-images-v7");
        assert_eq!(config.precache.shell.len(), 3);
        assert_eq!(
            config.resolve("/login").unwrap().as_str(),
            "https://gym.example/login"
        );
    }

    #[test]
    fn test_load_and_resolve_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = OfflineConfig::load(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(GymDeskError::Io(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(OfflineConfig::load(file.path()), Err(GymDeskError::Json(_))));

        let config = OfflineConfig::default();
        assert!(matches!(config.resolve("http://[::1"), Err(GymDeskError::Url(_))));
    }

    #[test]
    fn test_rejects_empty_version() {
        let config = OfflineConfig {
            cache_version: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GymDeskError::Config(_))));
    }
}

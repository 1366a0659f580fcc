//! Credential storage, kept in a namespace disjoint from the regular config
//! tree so a `config.patch` diff (or a `config:changed` event) can never leak
//! a secret value.
//!
//! The host OS secret store (macOS Keychain, libsecret) is the preferred
//! backend when available; this crate ships only the portable fallback — a
//! file with restricted permissions — behind the same [`SecretBackend`] seam
//! so a native backend can be added later without touching call sites.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A backend capable of storing and retrieving secret strings by key.
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<SecretString>>;
    async fn set(&self, key: &str, value: SecretString) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// File-backed secret store. Secrets are written as a single JSON map at a
/// path with `0o600` permissions on Unix.
pub struct FileSecretBackend {
    path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Default)]
struct OnDisk(HashMap<String, String>);

impl FileSecretBackend {
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let cache = Self::load(&path)?;
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    fn load(path: &Path) -> anyhow::Result<HashMap<String, String>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let on_disk: OnDisk = serde_json::from_str(&raw)?;
        Ok(on_disk.0)
    }

    fn persist(path: &Path, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&OnDisk(entries.clone()))?;
        std::fs::write(path, raw)?;
        restrict_permissions(path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[async_trait::async_trait]
impl SecretBackend for FileSecretBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<SecretString>> {
        let cache = self.cache.read().await;
        Ok(cache.get(key).cloned().map(SecretString::from))
    }

    async fn set(&self, key: &str, value: SecretString) -> anyhow::Result<()> {
        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), value.expose_secret().to_string());
        Self::persist(&self.path, &cache)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut cache = self.cache.write().await;
        cache.remove(key);
        Self::persist(&self.path, &cache)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSecretBackend::new(dir.path().join("secrets.json")).unwrap();
        backend.set("channels.telegram.token", SecretString::from("abc123".to_string())).await.unwrap();
        let got = backend.get("channels.telegram.token").await.unwrap().unwrap();
        assert_eq!(got.expose_secret(), "abc123");
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSecretBackend::new(dir.path().join("secrets.json")).unwrap();
        assert!(backend.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileSecretBackend::new(dir.path().join("secrets.json")).unwrap();
        backend.set("k", SecretString::from("v".to_string())).await.unwrap();
        backend.delete("k").await.unwrap();
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_restricted() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let backend = FileSecretBackend::new(&path).unwrap();
        backend.set("k", SecretString::from("v".to_string())).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

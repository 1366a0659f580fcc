//! The in-memory config tree, guarded by the single-writer discipline
//! required by the concurrency model: the registry has one writer task,
//! readers take an immutable snapshot per operation, and no lock is ever
//! held across an `.await`.

use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    patch::{Diff, apply_patch, get_path},
    schema::ConduitConfig,
};

pub struct ConfigStore {
    tree: RwLock<Value>,
}

impl ConfigStore {
    pub fn new(initial: ConduitConfig) -> Self {
        let tree = serde_json::to_value(initial).unwrap_or(Value::Object(serde_json::Map::new()));
        Self { tree: RwLock::new(tree) }
    }

    /// Fetch the subtree at `path` (dot-separated, case-sensitive). Returns
    /// `None` if the path doesn't exist.
    pub async fn get(&self, path: &str) -> Option<Value> {
        let tree = self.tree.read().await;
        get_path(&tree, path).cloned()
    }

    /// Apply a merge-or-delete-on-null patch at `path`, returning the
    /// structural diff. The write lock is held only for the duration of the
    /// in-memory mutation, never across an `.await`.
    pub async fn patch(&self, path: &str, value: Value) -> Diff {
        let mut tree = self.tree.write().await;
        apply_patch(&mut tree, path, value)
    }

    /// Apply a patch only if `path` does not already exist. The
    /// existence check and the write happen under the same write-lock
    /// guard, so two concurrent callers racing to create the same path
    /// can never both succeed. Returns `Err(())` if `path` was already
    /// occupied.
    pub async fn patch_create_only(&self, path: &str, value: Value) -> std::result::Result<Diff, ()> {
        let mut tree = self.tree.write().await;
        if get_path(&tree, path).is_some() {
            return Err(());
        }
        Ok(apply_patch(&mut tree, path, value))
    }

    /// A full immutable snapshot of the tree, for persistence or diffing.
    pub async fn snapshot(&self) -> Value {
        self.tree.read().await.clone()
    }

    /// The snapshot deserialized into the typed schema. Returns an error if
    /// the tree has drifted into a shape the schema can't represent (e.g. a
    /// patch wrote a scalar where an object was expected).
    pub async fn typed_snapshot(&self) -> anyhow::Result<ConduitConfig> {
        let tree = self.tree.read().await;
        Ok(serde_json::from_value(tree.clone())?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_after_patch_reflects_merge() {
        let store = ConfigStore::new(ConduitConfig::default());
        store.patch("gateway", json!({"port": 9999})).await;
        let gateway = store.get("gateway").await.unwrap();
        assert_eq!(gateway["port"], 9999);
    }

    #[tokio::test]
    async fn concurrent_reads_never_see_torn_state() {
        let store = std::sync::Arc::new(ConfigStore::new(ConduitConfig::default()));
        let writer = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                for port in 1000..1100u16 {
                    store.patch("gateway", json!({"port": port})).await;
                }
            })
        };
        for _ in 0..50 {
            let snapshot = store.get("gateway").await.unwrap();
            assert!(snapshot["port"].is_number());
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_path_returns_none() {
        let store = ConfigStore::new(ConduitConfig::default());
        assert!(store.get("does.not.exist").await.is_none());
    }

    #[tokio::test]
    async fn create_only_rejects_existing_path() {
        let store = ConfigStore::new(ConduitConfig::default());
        assert!(store.patch_create_only("gateway.port", json!(1234)).await.is_err());
    }

    #[tokio::test]
    async fn create_only_accepts_new_path() {
        let store = ConfigStore::new(ConduitConfig::default());
        assert!(store.patch_create_only("channels.newbot", json!({"enabled": true})).await.is_ok());
        let newbot = store.get("channels.newbot").await.unwrap();
        assert_eq!(newbot["enabled"], true);
    }
}

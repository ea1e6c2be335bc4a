//! Flat key-value blob store.
//!
//! Values are JSON documents stored under string keys. There are no
//! transactions: every write replaces the whole value for its key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::errors::NxapiResult;

/// Store keys used by nxapi
pub mod keys {
    /// Session token for a Nintendo Account id
    pub fn nintendo_account_token(na_id: &str) -> String {
        format!("NintendoAccountToken.{}", na_id)
    }

    /// Cached Coral credential for a session token
    pub fn nso_token(session_token: &str) -> String {
        format!("NsoToken.{}", session_token)
    }

    pub const SELECTED_USER: &str = "SelectedUser";

    pub fn proxy_auth_policy(proxy_token: &str) -> String {
        format!("ZncProxyAuthPolicy.{}", proxy_token)
    }

    /// Proxy tokens issued for a Nintendo Account id
    pub fn proxy_auth_policies(na_id: &str) -> String {
        format!("ZncProxyAuthPolicies.{}", na_id)
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_item(&self, key: &str) -> NxapiResult<Option<serde_json::Value>>;
    async fn set_item(&self, key: &str, value: serde_json::Value) -> NxapiResult<()>;
    async fn remove_item(&self, key: &str) -> NxapiResult<()>;
}

/// Typed helpers over any [`Storage`]
#[async_trait]
pub trait StorageExt: Storage {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> NxapiResult<Option<T>> {
        match self.get_item(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> NxapiResult<()> {
        self.set_item(key, serde_json::to_value(value)?).await
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    key: String,
    value: serde_json::Value,
}

/// One JSON file per key inside a data directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> NxapiResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(path = %dir.display(), "Opened file store");

        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(name)
    }
}

#[async_trait]
impl Storage for FileStore {
    async fn get_item(&self, key: &str) -> NxapiResult<Option<serde_json::Value>> {
        let data = match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let item: StoredItem = serde_json::from_slice(&data)?;
        Ok(Some(item.value))
    }

    async fn set_item(&self, key: &str, value: serde_json::Value) -> NxapiResult<()> {
        let path = self.path_for(key);
        let item = StoredItem {
            key: key.to_string(),
            value,
        };
        let data = serde_json::to_vec(&item)?;

        // Readers see either the previous or the new file
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> NxapiResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_item(&self, key: &str) -> NxapiResult<Option<serde_json::Value>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: serde_json::Value) -> NxapiResult<()> {
        self.items.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> NxapiResult<()> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .set_item(keys::SELECTED_USER, json!("a1b2c3"))
            .await
            .unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get_item(keys::SELECTED_USER).await.unwrap(),
            Some(json!("a1b2c3"))
        );
    }

    #[tokio::test]
    async fn test_file_store_overwrites_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let key = keys::nso_token("token");

        store.set_item(&key, json!({"a": 1})).await.unwrap();
        store.set_item(&key, json!({"b": 2})).await.unwrap();
        assert_eq!(store.get_item(&key).await.unwrap(), Some(json!({"b": 2})));

        store.remove_item(&key).await.unwrap();
        assert_eq!(store.get_item(&key).await.unwrap(), None);

        // Removing an absent key is not an error
        store.remove_item(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let store = MemoryStore::new();
        store
            .set(&keys::proxy_auth_policies("user"), &vec!["t1".to_string()])
            .await
            .unwrap();

        let tokens: Option<Vec<String>> =
            store.get(&keys::proxy_auth_policies("user")).await.unwrap();
        assert_eq!(tokens, Some(vec!["t1".to_string()]));
    }
}

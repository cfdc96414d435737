use super::child_path;
use async_trait::async_trait;
use bytes::Bytes;
use common::{Error, Result};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Key-addressed access to a storage root. Keys are relative to the root and
/// use `/` as separator, e.g. `songs_table/year=2000/artist_id=A1/part.parquet`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Bytes>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    async fn check_file_exists(&self, key: &str) -> Result<bool>;
    /// Deletes every object below `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
    fn root(&self) -> &str;
}

/// A directory-like root inside an object store.
#[derive(Clone)]
pub struct StorageLocation {
    root_url: Url,
    prefix: ObjectPath,
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLocation")
            .field("root_url", &self.root_url.as_str())
            .field("prefix", &self.prefix.as_ref())
            .finish()
    }
}

impl StorageLocation {
    pub fn new(root_url: Url, store: Arc<dyn ObjectStore>) -> Result<Self> {
        if !root_url.path().ends_with('/') {
            return Err(Error::InvalidUri(format!(
                "Storage root '{}' must end with '/'",
                root_url
            )));
        }
        let prefix = ObjectPath::from_url_path(root_url.path())?;
        Ok(Self {
            root_url,
            prefix,
            store,
        })
    }

    pub fn root_url(&self) -> &Url {
        &self.root_url
    }

    pub fn prefix(&self) -> &ObjectPath {
        &self.prefix
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Full URL for a key below the root. Directory keys keep their trailing `/`.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}{}", self.root_url, key.trim_start_matches('/'))
    }

    /// Directory URL for a table, always ending with `/` so the engine writes a
    /// directory of files rather than a single file.
    pub fn table_url(&self, table: &str) -> String {
        self.object_url(&format!("{}/", table.trim_matches('/')))
    }

    pub fn object_path(&self, key: &str) -> ObjectPath {
        child_path(&self.prefix, key)
    }

    fn relative_key(&self, location: &ObjectPath) -> String {
        let full = location.as_ref();
        let prefix = self.prefix.as_ref();
        full.strip_prefix(prefix)
            .unwrap_or(full)
            .trim_start_matches('/')
            .to_string()
    }
}

#[async_trait]
impl ObjectStorage for StorageLocation {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(key);
        self.store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path, e)))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key);
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                Error::Storage(format!("Object {} not found under {}", key, self.root_url))
            }
            e => Error::ObjectStore(e),
        })?;
        Ok(result.bytes().await?)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let path = self.object_path(prefix);
        let objects: Vec<_> = self.store.list(Some(&path)).try_collect().await?;

        Ok(objects
            .into_iter()
            .map(|meta| self.relative_key(&meta.location))
            .collect())
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::ObjectStore(e)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let path = self.object_path(prefix);
        if path.as_ref() == self.prefix.as_ref() {
            return Err(Error::InvalidInput(format!(
                "Refusing to delete the whole storage root {}",
                self.root_url
            )));
        }

        let objects: Vec<_> = self.store.list(Some(&path)).try_collect().await?;
        for meta in &objects {
            self.store.delete(&meta.location).await?;
        }
        debug!(prefix = %path, deleted = objects.len(), "Cleared prefix");
        Ok(objects.len())
    }

    fn root(&self) -> &str {
        self.root_url.as_str()
    }
}

pub mod location;

pub use location::{ObjectStorage, StorageLocation};

use common::config::AwsConfig;
use common::{Error, Result};
use dashmap::DashMap;
use datafusion::execution::context::SessionContext;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

const LOCAL_STORE_KEY: &str = "file://";

#[derive(Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl From<&AwsConfig> for S3Config {
    fn from(aws: &AwsConfig) -> Self {
        Self {
            endpoint: aws.endpoint.clone(),
            region: aws.region.clone(),
            access_key: aws.aws_access_key_id.clone(),
            secret_key: aws.aws_secret_access_key.clone(),
        }
    }
}

/// Builds and caches object stores for the roots the pipeline reads and writes.
#[derive(Clone)]
pub struct S3Manager {
    pub config: S3Config,
    object_store_cache: Arc<DashMap<String, Arc<dyn ObjectStore>>>,
}

impl S3Manager {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            object_store_cache: Arc::new(DashMap::new()),
        }
    }

    pub fn get_object_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self.object_store_cache.get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_access_key_id(&self.config.access_key)
            .with_secret_access_key(&self.config.secret_key);

        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
        self.object_store_cache
            .insert(bucket.to_string(), store.clone());
        debug!(bucket, "Created S3 object store");
        Ok(store)
    }

    fn local_store(&self) -> Arc<dyn ObjectStore> {
        self.object_store_cache
            .entry(LOCAL_STORE_KEY.to_string())
            .or_insert_with(|| Arc::new(LocalFileSystem::new()))
            .clone()
    }

    /// Resolves a root such as `s3://bucket/prefix/`, `s3a://bucket/` or a local
    /// directory into a storage location rooted at that prefix.
    pub fn resolve(&self, root: &str) -> Result<StorageLocation> {
        let root = root.trim();
        if root.is_empty() {
            return Err(Error::InvalidInput("Storage root must not be empty".into()));
        }

        if let Some(rest) = root
            .strip_prefix("s3://")
            .or_else(|| root.strip_prefix("s3a://"))
        {
            let (bucket, key_prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(Error::InvalidUri(format!(
                    "S3 root '{}' does not name a bucket",
                    root
                )));
            }
            let key_prefix = key_prefix.trim_matches('/');
            let url = if key_prefix.is_empty() {
                Url::parse(&format!("s3://{}/", bucket))?
            } else {
                Url::parse(&format!("s3://{}/{}/", bucket, key_prefix))?
            };
            let store = self.get_object_store(bucket)?;
            return StorageLocation::new(url, store);
        }

        if root.contains("://") {
            return Err(Error::InvalidUri(format!(
                "Unsupported storage scheme in '{}'",
                root
            )));
        }

        let absolute = std::path::absolute(root)?;
        let url = Url::from_directory_path(&absolute).map_err(|_| {
            Error::InvalidUri(format!(
                "Cannot convert '{}' into a file URL",
                absolute.display()
            ))
        })?;
        StorageLocation::new(url, self.local_store())
    }

    /// Makes the location's store visible to DataFusion under its URL scheme and host.
    pub fn register_object_store(
        &self,
        ctx: &SessionContext,
        location: &StorageLocation,
    ) -> Result<()> {
        let url = location.root_url();
        if url.scheme() == "file" {
            // DataFusion ships with a local filesystem store.
            return Ok(());
        }

        let bucket = url
            .host_str()
            .ok_or_else(|| Error::InvalidUri(format!("No bucket in {}", url)))?;
        let store_url = Url::parse(&format!("{}://{}", url.scheme(), bucket))?;
        ctx.runtime_env()
            .register_object_store(&store_url, self.get_object_store(bucket)?);
        info!(bucket, "Registered object store with session");
        Ok(())
    }
}

#[derive(Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub pattern: Option<regex::Regex>,
}

impl ListOptions {
    pub fn matches(&self, key: &str) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(key))
    }
}

/// Lists keys below `location` that pass the filters, returned as full URLs
/// readable by the session (`s3://…` or `file:///…`), in lexical order.
pub async fn list_files(location: &StorageLocation, options: ListOptions) -> Result<Vec<String>> {
    let keys = list_keys(location, options).await?;
    Ok(keys.iter().map(|key| location.object_url(key)).collect())
}

/// Same as [`list_files`], returning keys relative to `location`.
pub async fn list_keys(location: &StorageLocation, options: ListOptions) -> Result<Vec<String>> {
    let prefix = options.prefix.clone().unwrap_or_default();
    let mut keys: Vec<String> = location
        .list_objects(&prefix)
        .await?
        .into_iter()
        .filter(|key| options.matches(key))
        .collect();
    keys.sort();

    if keys.is_empty() {
        debug!(root = %location.root(), prefix, "No files found");
    } else {
        info!(root = %location.root(), prefix, count = keys.len(), "Found files");
    }

    Ok(keys)
}

pub(crate) fn child_path(base: &ObjectPath, key: &str) -> ObjectPath {
    key.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base.clone(), |path, segment| path.child(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> S3Manager {
        S3Manager::new(S3Config {
            endpoint: None,
            region: "us-west-2".to_string(),
            access_key: "key".to_string(),
            secret_key: "secret".to_string(),
        })
    }

    #[test]
    fn test_resolve_s3_root() {
        let location = manager().resolve("s3a://udacity-dend/").unwrap();
        assert_eq!(location.root(), "s3://udacity-dend/");
        assert_eq!(
            location.object_url("log_data/2018-11-01-events.json"),
            "s3://udacity-dend/log_data/2018-11-01-events.json"
        );

        let location = manager().resolve("s3://sparkify-output/tables").unwrap();
        assert_eq!(location.root(), "s3://sparkify-output/tables/");
        assert_eq!(location.prefix().as_ref(), "tables");
    }

    #[test]
    fn test_resolve_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let location = manager().resolve(dir.path().to_str().unwrap()).unwrap();
        assert!(location.root().starts_with("file:///"));
        assert!(location.root().ends_with('/'));
        assert!(location.object_url("songs_table/").ends_with("/songs_table/"));
    }

    #[test]
    fn test_resolve_rejects_unknown_scheme() {
        assert!(manager().resolve("gs://bucket/path").is_err());
        assert!(manager().resolve("s3://").is_err());
        assert!(manager().resolve("  ").is_err());
    }

    #[test]
    fn test_list_options_matching() {
        let options = ListOptions {
            pattern: Some(regex::Regex::new(r"^log_data/[^/]*\.json$").unwrap()),
            ..Default::default()
        };
        assert!(ListOptions::default().matches("anything/at/all.txt"));
        assert!(options.matches("log_data/2018-11-01-events.json"));
        assert!(!options.matches("log_data/nested/2018-11-01-events.json"));
        assert!(!options.matches("log_data/readme.txt"));
    }
}

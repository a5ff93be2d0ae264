//! Object-store driver and the client seam it delegates to.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use surround_core::{ErrorInfo, SurroundError};
use tracing::warn;

use crate::driver::{already_exists, join_key, normalize_key, not_found, source_bytes, PushSource, StorageDriver};

/// Minimal blob operations of a remote object store.
pub trait ObjectClient: Send + Sync {
    /// Object bytes, or `None` when absent.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, SurroundError>;
    /// Creates or replaces an object.
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), SurroundError>;
    /// Deletes an object, reporting whether it existed.
    fn delete(&self, bucket: &str, key: &str) -> Result<bool, SurroundError>;
    /// Keys starting with `prefix`, sorted.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, SurroundError>;
    /// Whether the object exists.
    fn head(&self, bucket: &str, key: &str) -> Result<bool, SurroundError>;
}

/// Parsed `scheme://bucket/prefix` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUrl {
    /// URL scheme, lowercase.
    pub scheme: String,
    /// Bucket name.
    pub bucket: String,
    /// Key prefix inside the bucket, without surrounding slashes.
    pub prefix: String,
}

impl ObjectUrl {
    /// Parses an object-store URL. Bucket names are limited to lowercase
    /// letters, digits, `-`, `_` and `.`.
    pub fn parse(url: &str) -> Result<Self, SurroundError> {
        let invalid = |message: &str| {
            SurroundError::Storage(
                ErrorInfo::new("surround.store.url", message)
                    .with_context("url", url)
                    .with_hint("expected scheme://bucket/prefix"),
            )
        };
        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("missing scheme"));
        }
        let rest = rest.replace('\\', "/");
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest.as_str(), ""));
        let valid_bucket = !bucket.is_empty()
            && bucket
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
        if !valid_bucket {
            return Err(invalid("invalid bucket name"));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            bucket: bucket.to_string(),
            prefix: normalize_key(prefix)?,
        })
    }
}

/// Driver over an [`ObjectClient`]. Deletes cascade over prefixes.
pub struct ObjectStoreDriver {
    url: String,
    location: ObjectUrl,
    credentials: Option<PathBuf>,
    client: Arc<dyn ObjectClient>,
}

impl ObjectStoreDriver {
    /// Opens `url` through `client`.
    pub fn new(url: &str, client: Arc<dyn ObjectClient>) -> Result<Self, SurroundError> {
        Ok(Self {
            url: url.to_string(),
            location: ObjectUrl::parse(url)?,
            credentials: None,
            client,
        })
    }

    /// Records the credentials file the client was built with.
    pub fn with_credentials(mut self, credentials: Option<PathBuf>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Parsed location.
    pub fn location(&self) -> &ObjectUrl {
        &self.location
    }

    /// Credentials file, when one was resolved.
    pub fn credentials(&self) -> Option<&Path> {
        self.credentials.as_deref()
    }

    fn key(&self, remote: &str) -> Result<String, SurroundError> {
        Ok(join_key(&self.location.prefix, &normalize_key(remote)?))
    }

    fn children(&self, key: &str) -> Result<Vec<String>, SurroundError> {
        let prefix = if key.is_empty() { String::new() } else { format!("{key}/") };
        self.client.list(&self.location.bucket, &prefix)
    }
}

impl fmt::Debug for ObjectStoreDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreDriver")
            .field("url", &self.url)
            .field("location", &self.location)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl StorageDriver for ObjectStoreDriver {
    fn url(&self) -> &str {
        &self.url
    }

    fn pull(&self, remote: &str) -> Result<Vec<u8>, SurroundError> {
        let key = self.key(remote)?;
        self.client
            .get(&self.location.bucket, &key)?
            .ok_or_else(|| not_found("surround.store.pull", remote))
    }

    fn push(&self, remote: &str, source: PushSource<'_>, override_ok: bool) -> Result<(), SurroundError> {
        let key = self.key(remote)?;
        if !override_ok && self.client.head(&self.location.bucket, &key)? {
            return Err(already_exists("surround.store.push", remote));
        }
        let bytes = source_bytes(source)?;
        self.client.put(&self.location.bucket, &key, &bytes)
    }

    fn delete(&self, remote: &str) -> Result<(), SurroundError> {
        let key = self.key(remote)?;
        if !key.is_empty() && self.client.delete(&self.location.bucket, &key)? {
            return Ok(());
        }
        let children = self.children(&key)?;
        if children.is_empty() {
            return Err(not_found("surround.store.delete", remote));
        }
        for child in children {
            self.client.delete(&self.location.bucket, &child)?;
        }
        Ok(())
    }

    fn exists(&self, remote: &str) -> bool {
        let probe = || -> Result<bool, SurroundError> {
            let key = self.key(remote)?;
            if !key.is_empty() && self.client.head(&self.location.bucket, &key)? {
                return Ok(true);
            }
            Ok(!self.children(&key)?.is_empty())
        };
        probe().unwrap_or_else(|err| {
            warn!(key = remote, error = %err, "existence probe failed");
            false
        })
    }

    fn get_files(&self, base: Option<&str>) -> Result<Vec<String>, SurroundError> {
        let key = self.key(base.unwrap_or(""))?;
        let prefix = if key.is_empty() { String::new() } else { format!("{key}/") };
        let mut files: Vec<String> = self
            .children(&key)?
            .into_iter()
            .filter_map(|child| child.strip_prefix(&prefix).map(str::to_string))
            .filter(|child| !child.is_empty())
            .collect();
        files.sort();
        Ok(files)
    }

    fn is_cloud(&self) -> bool {
        true
    }
}

/// Process-local [`ObjectClient`] keeping every bucket in memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectClient {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

fn poisoned() -> SurroundError {
    SurroundError::Storage(ErrorInfo::new("surround.store.memory_lock", "in-memory store lock poisoned"))
}

impl InMemoryObjectClient {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all buckets.
    pub fn object_count(&self) -> usize {
        self.buckets
            .read()
            .map(|buckets| buckets.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }
}

impl ObjectClient for InMemoryObjectClient {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, SurroundError> {
        let buckets = self.buckets.read().map_err(|_| poisoned())?;
        Ok(buckets.get(bucket).and_then(|objects| objects.get(key)).cloned())
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), SurroundError> {
        let mut buckets = self.buckets.write().map_err(|_| poisoned())?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<bool, SurroundError> {
        let mut buckets = self.buckets.write().map_err(|_| poisoned())?;
        Ok(buckets
            .get_mut(bucket)
            .and_then(|objects| objects.remove(key))
            .is_some())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, SurroundError> {
        let buckets = self.buckets.read().map_err(|_| poisoned())?;
        Ok(buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, SurroundError> {
        let buckets = self.buckets.read().map_err(|_| poisoned())?;
        Ok(buckets
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key)))
    }
}

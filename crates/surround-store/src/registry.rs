//! Selects a storage driver from a URL.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use surround_core::{Config, ErrorInfo, SurroundError};
use tracing::debug;

use crate::driver::StorageDriver;
use crate::local::LocalDriver;
use crate::object::{InMemoryObjectClient, ObjectClient, ObjectStoreDriver, ObjectUrl};

/// Environment variable consulted when no credentials are configured.
pub const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Builds an [`ObjectClient`] for a parsed URL and optional credentials file.
pub type ClientFactory =
    Arc<dyn Fn(&ObjectUrl, Option<&Path>) -> Result<Arc<dyn ObjectClient>, SurroundError> + Send + Sync>;

/// Maps URL schemes to object-store client factories.
///
/// `mem://` is always available and backed by one [`InMemoryObjectClient`]
/// shared by every driver the registry opens. `file://` URLs and plain paths
/// open a [`LocalDriver`].
///
/// Network object stores are registered by the application. The factory
/// receives the parsed URL and the resolved credentials file:
///
/// ```
/// use std::sync::Arc;
///
/// use surround_store::{DriverRegistry, InMemoryObjectClient, ObjectClient, StorageDriver};
///
/// let mut registry = DriverRegistry::new();
/// registry.register("gs", |url, credentials| {
///     // Build the vendor client for `url.bucket` with `credentials` here.
///     let _ = (&url.bucket, credentials);
///     let client: Arc<dyn ObjectClient> = Arc::new(InMemoryObjectClient::new());
///     Ok(client)
/// });
///
/// let driver = registry.open("gs://team-models/runs", None)?;
/// assert!(driver.is_cloud());
/// assert!(registry.schemes().contains(&"gs"));
/// # Ok::<(), surround_core::SurroundError>(())
/// ```
#[derive(Clone)]
pub struct DriverRegistry {
    factories: BTreeMap<String, ClientFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let memory: Arc<InMemoryObjectClient> = Arc::new(InMemoryObjectClient::new());
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("mem", move |_url, _credentials| {
            let client: Arc<dyn ObjectClient> = memory.clone();
            Ok(client)
        });
        registry
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("schemes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Registry with the built-in schemes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the factory for `scheme`.
    pub fn register<F>(&mut self, scheme: &str, factory: F) -> &mut Self
    where
        F: Fn(&ObjectUrl, Option<&Path>) -> Result<Arc<dyn ObjectClient>, SurroundError> + Send + Sync + 'static,
    {
        self.factories.insert(scheme.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Opens the driver for `url`. Credentials for object stores come from
    /// `experiment.credentials.<scheme>` in `config`, then the
    /// `GOOGLE_APPLICATION_CREDENTIALS` environment variable.
    pub fn open(&self, url: &str, config: Option<&Config>) -> Result<Arc<dyn StorageDriver>, SurroundError> {
        let Some((scheme, rest)) = url.split_once("://") else {
            return Ok(Arc::new(LocalDriver::new(url)?));
        };
        if scheme.eq_ignore_ascii_case("file") {
            return Ok(Arc::new(LocalDriver::new(rest)?));
        }
        let location = ObjectUrl::parse(url)?;
        let factory = self.factories.get(&location.scheme).ok_or_else(|| {
            SurroundError::Storage(
                ErrorInfo::new("surround.store.scheme", format!("no driver registered for '{scheme}'"))
                    .with_context("url", url)
                    .with_hint("register a client factory for the scheme"),
            )
        })?;
        let credentials = resolve_credentials(&location.scheme, config);
        debug!(scheme = %location.scheme, bucket = %location.bucket, "opening object store");
        let client = (factory.as_ref())(&location, credentials.as_deref())?;
        Ok(Arc::new(ObjectStoreDriver::new(url, client)?.with_credentials(credentials)))
    }
}

/// Credentials file for `scheme`, from configuration or the environment.
pub fn resolve_credentials(scheme: &str, config: Option<&Config>) -> Option<PathBuf> {
    let configured = config
        .and_then(|config| config.get_path(&format!("experiment.credentials.{scheme}")))
        .and_then(|value| value.as_str())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    configured.or_else(|| {
        std::env::var_os(CREDENTIALS_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}

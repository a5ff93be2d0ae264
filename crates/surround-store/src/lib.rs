#![deny(missing_docs)]
#![doc = "Storage drivers backing Surround experiment tracking."]

pub mod driver;
mod local;
pub mod object;
pub mod registry;

pub use driver::{join_key, normalize_key, PushSource, StorageDriver};
pub use local::LocalDriver;
pub use object::{InMemoryObjectClient, ObjectClient, ObjectStoreDriver, ObjectUrl};
pub use registry::{resolve_credentials, ClientFactory, DriverRegistry, CREDENTIALS_ENV_VAR};

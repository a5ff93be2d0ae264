#![deny(missing_docs)]
#![doc = "Core state, configuration and error types shared by Surround pipelines and experiment tracking."]

pub mod config;
pub mod errors;
mod metrics;
mod mode;
pub mod state;

pub use config::{find_project_root, merge_into, Config, ENV_VAR_PREFIX};
pub use errors::{ErrorInfo, ErrorKind, SurroundError};
pub use metrics::MetricValue;
pub use mode::RunMode;
pub use state::{StageRecord, State};

pub use serde_json;
pub use serde_yaml;

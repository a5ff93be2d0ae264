#![deny(missing_docs)]
#![doc = "Experiment tracking for Surround pipelines: code and model snapshots, logs, metrics and results kept in a storage driver."]

pub mod archive;
pub mod layout;
pub mod log_stream;
mod reader;
mod records;
pub mod serde;
pub mod template;
mod writer;

pub use log_stream::{LogCapture, LogSink, LogStreamLayer};
pub use reader::{ExperimentReader, ReplicateTarget};
pub use records::{Author, ExecutionInfo, ExperimentRecord, ExperimentResults, ExperimentStatus, ProjectMeta};
pub use writer::ExperimentWriter;

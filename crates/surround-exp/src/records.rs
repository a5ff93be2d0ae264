//! JSON documents persisted in the experiment layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surround_core::Config;

/// `project.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Project name, equal to its directory name.
    pub project_name: String,
    /// Free-form description.
    #[serde(default)]
    pub project_description: String,
    /// Last time the project or one of its experiments changed.
    pub last_time_updated: String,
}

/// Who ran an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// `user.name`, `Unknown` when unset.
    pub name: String,
    /// `user.email`.
    #[serde(default)]
    pub email: Option<String>,
}

impl Author {
    /// Reads `user.name` and `user.email`.
    pub fn from_config(config: &Config) -> Self {
        let text = |path: &str| {
            config
                .get_path(path)
                .and_then(|value| value.as_str())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            name: text("user.name").unwrap_or_else(|| "Unknown".to_string()),
            email: text("user.email"),
        }
    }
}

/// `execution_info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Who started the experiment.
    pub author: Author,
    /// Arguments the experiment was started with.
    #[serde(default)]
    pub arguments: Value,
    /// Hash of the packaged models, absent when there were none.
    #[serde(default)]
    pub model_hash: Option<String>,
    /// Experiment key.
    pub start_time: String,
    /// Notes given at start.
    #[serde(default)]
    pub notes: Vec<String>,
    /// Files under the project's `input` directory, relative to the root.
    #[serde(default)]
    pub input_files: Vec<String>,
}

/// `results.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    /// Who ran the experiment.
    pub author: Author,
    /// Arguments the experiment was started with.
    #[serde(default)]
    pub arguments: Value,
    /// Experiment key.
    pub start_time: String,
    /// Stop time, formatted like `start_time`.
    pub end_time: String,
    /// Final metrics; repeated samples appear as arrays.
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    /// Notes given at stop, or at start when none were given.
    #[serde(default)]
    pub notes: Vec<String>,
    /// Hash of the packaged models.
    #[serde(default)]
    pub model_hash: Option<String>,
}

/// Everything the reader parses out of one experiment directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRecord {
    /// Parsed `execution_info.json`.
    pub execution_info: ExecutionInfo,
    /// Lines of `log.txt`; empty while running or when nothing was logged.
    pub logs: Vec<String>,
    /// Parsed `results.json`, absent until the experiment stops.
    pub results: Option<ExperimentResults>,
}

/// Contents of `status.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentStatus {
    /// Started and not yet stopped.
    Running,
    /// Stopped.
    Complete,
}

impl ExperimentStatus {
    /// Text written to `status.txt`.
    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Complete => "COMPLETE",
        }
    }

    /// Parses the contents of `status.txt`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "RUNNING" => Some(ExperimentStatus::Running),
            "COMPLETE" => Some(ExperimentStatus::Complete),
            _ => None,
        }
    }
}

//! Structured error types shared across Surround crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`SurroundError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, stage names, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Discriminant of a [`SurroundError`], convenient for matching without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`SurroundError::ConfigLoad`].
    ConfigLoad,
    /// See [`SurroundError::ConfigType`].
    ConfigType,
    /// See [`SurroundError::FrozenAttribute`].
    FrozenAttribute,
    /// See [`SurroundError::AssemblerConfig`].
    AssemblerConfig,
    /// See [`SurroundError::AssemblerRun`].
    AssemblerRun,
    /// See [`SurroundError::Stage`].
    Stage,
    /// See [`SurroundError::ExperimentState`].
    ExperimentState,
    /// See [`SurroundError::ProjectMissing`].
    ProjectMissing,
    /// See [`SurroundError::NotFound`].
    NotFound,
    /// See [`SurroundError::AlreadyExists`].
    AlreadyExists,
    /// See [`SurroundError::Storage`].
    Storage,
    /// See [`SurroundError::Serde`].
    Serde,
}

/// Canonical error type for Surround pipelines and experiment tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum SurroundError {
    /// A configuration file could not be read or parsed.
    #[error("config load error: {0}")]
    ConfigLoad(ErrorInfo),
    /// A configuration value or path was misused.
    #[error("config type error: {0}")]
    ConfigType(ErrorInfo),
    /// A new attribute was assigned to a frozen state.
    #[error("frozen attribute error: {0}")]
    FrozenAttribute(ErrorInfo),
    /// An assembler was configured with invalid stages.
    #[error("assembler config error: {0}")]
    AssemblerConfig(ErrorInfo),
    /// An assembler run was requested with missing prerequisites.
    #[error("assembler run error: {0}")]
    AssemblerRun(ErrorInfo),
    /// A stage failed while operating on the state.
    #[error("stage error: {0}")]
    Stage(ErrorInfo),
    /// The experiment writer was driven out of order.
    #[error("experiment state error: {0}")]
    ExperimentState(ErrorInfo),
    /// An experiment was started for a project that is not registered.
    #[error("project missing: {0}")]
    ProjectMissing(ErrorInfo),
    /// A storage key or local file does not exist.
    #[error("not found: {0}")]
    NotFound(ErrorInfo),
    /// A storage key or local file exists and overriding was not permitted.
    #[error("already exists: {0}")]
    AlreadyExists(ErrorInfo),
    /// Any other storage or filesystem failure.
    #[error("storage error: {0}")]
    Storage(ErrorInfo),
    /// Serialization, archive and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl SurroundError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SurroundError::ConfigLoad(info)
            | SurroundError::ConfigType(info)
            | SurroundError::FrozenAttribute(info)
            | SurroundError::AssemblerConfig(info)
            | SurroundError::AssemblerRun(info)
            | SurroundError::Stage(info)
            | SurroundError::ExperimentState(info)
            | SurroundError::ProjectMissing(info)
            | SurroundError::NotFound(info)
            | SurroundError::AlreadyExists(info)
            | SurroundError::Storage(info)
            | SurroundError::Serde(info) => info,
        }
    }

    /// Returns the family of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SurroundError::ConfigLoad(_) => ErrorKind::ConfigLoad,
            SurroundError::ConfigType(_) => ErrorKind::ConfigType,
            SurroundError::FrozenAttribute(_) => ErrorKind::FrozenAttribute,
            SurroundError::AssemblerConfig(_) => ErrorKind::AssemblerConfig,
            SurroundError::AssemblerRun(_) => ErrorKind::AssemblerRun,
            SurroundError::Stage(_) => ErrorKind::Stage,
            SurroundError::ExperimentState(_) => ErrorKind::ExperimentState,
            SurroundError::ProjectMissing(_) => ErrorKind::ProjectMissing,
            SurroundError::NotFound(_) => ErrorKind::NotFound,
            SurroundError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SurroundError::Storage(_) => ErrorKind::Storage,
            SurroundError::Serde(_) => ErrorKind::Serde,
        }
    }

    /// Shorthand for a stage failure raised from user stage code.
    pub fn stage(message: impl Into<String>) -> Self {
        SurroundError::Stage(ErrorInfo::new("surround.stage", message))
    }

    /// Message used when the error is recorded into a state's error list.
    pub fn message(&self) -> &str {
        &self.info().message
    }
}

//! Registry pairing named runners with named assemblers.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use surround_core::{Config, ErrorInfo, RunMode, State, SurroundError};
use tracing::error;

use crate::assembler::Assembler;
use crate::runner::Runner;

/// A project's runners and assemblers, sharing one configuration.
pub struct Surround {
    project_name: String,
    project_description: String,
    project_root: Option<PathBuf>,
    config: Option<Config>,
    runners: Vec<Box<dyn Runner>>,
    assemblers: Vec<Assembler>,
}

impl Surround {
    /// Creates an empty registry.
    pub fn new(project_name: impl Into<String>, project_description: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            project_description: project_description.into(),
            project_root: None,
            config: None,
            runners: Vec::new(),
            assemblers: Vec::new(),
        }
    }

    /// Records the project root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Project name.
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Project description.
    pub fn project_description(&self) -> &str {
        &self.project_description
    }

    /// Project root, when known.
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Applies `config` to every registered and future assembler.
    pub fn set_config(&mut self, config: Config) -> &mut Self {
        for assembler in &mut self.assemblers {
            assembler.set_config(config.clone());
        }
        self.config = Some(config);
        self
    }

    /// Registers a runner.
    pub fn add_runner(&mut self, runner: impl Runner + 'static) -> &mut Self {
        self.runners.push(Box::new(runner));
        self
    }

    /// Registers an assembler, applying the shared configuration when set.
    pub fn add_assembler(&mut self, mut assembler: Assembler) -> &mut Self {
        if let Some(config) = &self.config {
            assembler.set_config(config.clone());
        }
        self.assemblers.push(assembler);
        self
    }

    /// Assembler names in registration order.
    pub fn list_assemblies(&self) -> Vec<&str> {
        self.assemblers.iter().map(Assembler::name).collect()
    }

    /// Runner names in registration order.
    pub fn list_runners(&self) -> Vec<&str> {
        self.runners.iter().map(|runner| runner.name()).collect()
    }

    /// Numbered listing of assemblies and runners.
    pub fn info(&self) -> String {
        let mut out = String::from("Available assemblies:\n");
        for (index, name) in self.list_assemblies().into_iter().enumerate() {
            let _ = writeln!(out, "{index}. {name}");
        }
        out.push_str("\nAvailable runners:\n");
        for (index, name) in self.list_runners().into_iter().enumerate() {
            let _ = writeln!(out, "{index}. {name}");
        }
        out
    }

    /// Resolves a runner and an assembler by index or case-insensitive name
    /// and runs them under the mode named by `mode` (`train`, `batch`, or
    /// anything else for predict). Returns the final states.
    pub fn run(
        &mut self,
        runner_key: &str,
        assembler_key: &str,
        mode: &str,
    ) -> Result<Vec<State>, SurroundError> {
        let runner_index = resolve(runner_key, self.list_runners())
            .ok_or_else(|| missing("runner", runner_key))?;
        let assembler_index = resolve(assembler_key, self.list_assemblies())
            .ok_or_else(|| missing("assembler", assembler_key))?;
        let mode = RunMode::from_label(mode);

        let runner = &mut self.runners[runner_index];
        let assembler = &mut self.assemblers[assembler_index];
        runner.run(assembler, mode)
    }

    /// Borrows a registered assembler by index or name.
    pub fn assembler(&self, key: &str) -> Option<&Assembler> {
        resolve(key, self.list_assemblies()).map(|index| &self.assemblers[index])
    }
}

fn missing(kind: &str, key: &str) -> SurroundError {
    error!(kind, key, "registry lookup failed");
    SurroundError::NotFound(
        ErrorInfo::new("surround.registry.missing", format!("failed to find {kind} '{key}'"))
            .with_context(kind, key),
    )
}

fn resolve(key: &str, names: Vec<&str>) -> Option<usize> {
    if let Ok(index) = key.trim().parse::<usize>() {
        if index < names.len() {
            return Some(index);
        }
    }
    names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(key))
}

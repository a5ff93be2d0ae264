//! Runners prepare input state and drive an assembler.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use surround_core::{Config, ErrorInfo, RunMode, State, SurroundError};
use tracing::info;

use crate::assembler::Assembler;

/// Feeds data into an [`Assembler`] under a chosen [`RunMode`].
///
/// The assembler is borrowed for the duration of a run so one registry can
/// pair any runner with any assembler.
pub trait Runner: Send {
    /// Name used to select the runner.
    fn name(&self) -> &str;

    /// Produces a fresh, thawed state for one run.
    fn load_data(&mut self, mode: RunMode, config: &Config) -> Result<State, SurroundError>;

    /// Initialises the assembler, loads one state and runs it.
    fn run(&mut self, assembler: &mut Assembler, mode: RunMode) -> Result<Vec<State>, SurroundError> {
        prepare(assembler)?;
        let mut state = load_fresh(self, assembler, mode)?;
        assembler.run(&mut state, mode)?;
        Ok(vec![state])
    }
}

/// Initialises `assembler`, failing when initialisation reports failure.
pub fn prepare(assembler: &mut Assembler) -> Result<(), SurroundError> {
    if assembler.init_assembler()? {
        Ok(())
    } else {
        Err(SurroundError::AssemblerRun(
            ErrorInfo::new("surround.runner.init", "assembler failed to initialise")
                .with_context("assembler", assembler.name()),
        ))
    }
}

/// Calls [`Runner::load_data`] with the assembler's configuration and
/// rejects a state that is already frozen.
pub fn load_fresh<R: Runner + ?Sized>(
    runner: &mut R,
    assembler: &Assembler,
    mode: RunMode,
) -> Result<State, SurroundError> {
    let state = runner.load_data(mode, assembler_config(assembler)?)?;
    if state.is_frozen() {
        return Err(SurroundError::AssemblerConfig(
            ErrorInfo::new("surround.runner.frozen_state", "load_data returned a frozen state")
                .with_context("runner", runner.name())
                .with_hint("return a new State from load_data"),
        ));
    }
    Ok(state)
}

fn assembler_config(assembler: &Assembler) -> Result<&Config, SurroundError> {
    assembler.config().ok_or_else(|| {
        SurroundError::AssemblerConfig(
            ErrorInfo::new("surround.runner.config", "assembler has no configuration")
                .with_context("assembler", assembler.name()),
        )
    })
}

/// Runs the assembler once per line of an input file.
///
/// The file defaults to `<data_path>/input.txt` and can be overridden with
/// `batch.input_file` or [`BatchRunner::with_input_file`]. Every line gets a
/// clone of the template state with its `input` attribute set to the line.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    name: String,
    input_file: Option<PathBuf>,
    template: State,
}

impl BatchRunner {
    /// Creates a batch runner with an empty template state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_file: None,
            template: State::new(),
        }
    }

    /// Reads lines from `path` instead of the configured location.
    pub fn with_input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_file = Some(path.into());
        self
    }

    /// Declares the attributes every per-line state starts with.
    pub fn with_template(mut self, template: State) -> Self {
        self.template = template;
        self
    }

    fn input_path(&self, config: &Config) -> Result<PathBuf, SurroundError> {
        if let Some(path) = &self.input_file {
            return Ok(path.clone());
        }
        if let Some(path) = config.get_str("batch.input_file")? {
            return Ok(PathBuf::from(path));
        }
        match config.get_str("data_path")? {
            Some(data) => Ok(PathBuf::from(data).join("input.txt")),
            None => Err(SurroundError::AssemblerConfig(
                ErrorInfo::new("surround.runner.input", "no batch input file configured")
                    .with_hint("set batch.input_file or load a project configuration"),
            )),
        }
    }
}

impl Runner for BatchRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_data(&mut self, _mode: RunMode, _config: &Config) -> Result<State, SurroundError> {
        let mut state = self.template.clone();
        state.thaw();
        if !state.contains("input") {
            state.set("input", Value::Null)?;
        }
        Ok(state)
    }

    fn run(&mut self, assembler: &mut Assembler, mode: RunMode) -> Result<Vec<State>, SurroundError> {
        prepare(assembler)?;
        let path = self.input_path(assembler_config(assembler)?)?;
        let contents = fs::read_to_string(&path).map_err(|err| {
            let info = ErrorInfo::new("surround.runner.read_input", err.to_string())
                .with_context("path", path.display().to_string());
            if err.kind() == std::io::ErrorKind::NotFound {
                SurroundError::NotFound(info)
            } else {
                SurroundError::Storage(info)
            }
        })?;

        let mut states = Vec::new();
        for line in contents.lines() {
            let mut state = load_fresh(self, assembler, mode)?;
            state.set("input", line.trim_end())?;
            assembler.run(&mut state, mode)?;
            states.push(state);
        }
        info!(runner = %self.name, records = states.len(), "batch run complete");
        Ok(states)
    }
}

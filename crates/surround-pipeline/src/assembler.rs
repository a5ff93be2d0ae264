//! The engine that composes stages and executes a run.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use surround_core::{Config, ErrorInfo, RunMode, State, SurroundError};
use tracing::{error, info, warn};

use crate::stage::{panic_message, Filter, PipelineStage, StageRole, Visualiser};

fn config_error(code: &str, message: impl Into<String>) -> SurroundError {
    SurroundError::AssemblerConfig(ErrorInfo::new(code, message))
}

fn run_error(code: &str, message: impl Into<String>) -> SurroundError {
    SurroundError::AssemblerRun(ErrorInfo::new(code, message))
}

/// Lifecycle of an [`Assembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblerStatus {
    /// Created with a name only.
    Constructed,
    /// Stages or configuration were set since the last initialisation.
    Configured,
    /// Every stage initialised but there is nothing to run.
    Initialised,
    /// Initialised with at least one stage.
    Runnable,
    /// A run is in progress.
    Running,
    /// The last run returned.
    Idle,
}

/// Flags read from `surround.*` once per run.
#[derive(Debug, Clone, Copy)]
struct RunPolicy {
    surface_exceptions: bool,
    dump_output: bool,
    metrics_in_predict: bool,
}

impl RunPolicy {
    fn from_config(config: &Config) -> Self {
        Self {
            surface_exceptions: config.flag("surround.surface_exceptions"),
            dump_output: config.flag("surround.enable_stage_output_dump"),
            metrics_in_predict: config.flag("surround.metrics_in_predict"),
        }
    }
}

/// Composes validators, filters and at most one estimator, plus the optional
/// metrics, finaliser and visualiser hooks, and runs them over a [`State`].
///
/// ```no_run
/// # use surround_pipeline::{Assembler, PipelineStage};
/// # use surround_core::{RunMode, State};
/// # fn stages() -> Vec<PipelineStage> { Vec::new() }
/// let mut assembler = Assembler::new("example");
/// assembler.set_stages(stages())?;
/// assembler.init_assembler()?;
/// let mut state = State::new();
/// assembler.run(&mut state, RunMode::Predict)?;
/// # Ok::<(), surround_core::SurroundError>(())
/// ```
pub struct Assembler {
    name: String,
    config: Option<Config>,
    stages: Vec<PipelineStage>,
    finaliser: Option<Box<dyn Filter>>,
    metrics: Option<Box<dyn Filter>>,
    visualiser: Option<Box<dyn Visualiser>>,
    status: AssemblerStatus,
}

impl Assembler {
    /// Creates an assembler with no stages. The configuration defaults to
    /// [`Config::new`] when none is set before initialisation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            stages: Vec::new(),
            finaliser: None,
            metrics: None,
            visualiser: None,
            status: AssemblerStatus::Constructed,
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle status.
    pub fn status(&self) -> AssemblerStatus {
        self.status
    }

    /// The configuration, once set or defaulted.
    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// Names of the ordered stages.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(PipelineStage::name).collect()
    }

    /// Whether the ordered stages include an estimator.
    pub fn has_estimator(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.role() == StageRole::Estimator)
    }

    /// Replaces the ordered stages.
    ///
    /// Stages run in list order. At most one estimator is allowed and
    /// visualisers belong in [`Assembler::set_visualiser`]. Any violation is an
    /// [`SurroundError::AssemblerConfig`] and leaves the assembler unchanged.
    pub fn set_stages(&mut self, stages: Vec<PipelineStage>) -> Result<&mut Self, SurroundError> {
        let mut estimators = 0usize;
        for (index, stage) in stages.iter().enumerate() {
            match stage.role() {
                StageRole::Visualiser => {
                    return Err(config_error(
                        "surround.assembler.visualiser_stage",
                        format!("stage '{}' is a visualiser", stage.name()),
                    )
                    .with_stage_context(index)
                    .with_hint_text("register visualisers with set_visualiser"));
                }
                StageRole::Validator | StageRole::Filter => {}
                StageRole::Estimator => {
                    estimators += 1;
                    if estimators > 1 {
                        return Err(config_error(
                            "surround.assembler.estimators",
                            "stages can only have one estimator",
                        )
                        .with_stage_context(index));
                    }
                }
            }
        }
        self.stages = stages;
        self.status = AssemblerStatus::Configured;
        Ok(self)
    }

    /// Sets the stage that runs on every exit path of [`Assembler::run`].
    pub fn set_finaliser(&mut self, finaliser: impl Filter + 'static) -> &mut Self {
        self.finaliser = Some(Box::new(finaliser));
        self.status = AssemblerStatus::Configured;
        self
    }

    /// Sets the metrics stage, run in batch and training modes.
    pub fn set_metrics(&mut self, metrics: impl Filter + 'static) -> &mut Self {
        self.metrics = Some(Box::new(metrics));
        self.status = AssemblerStatus::Configured;
        self
    }

    /// Sets the visualiser, run after successful batch and training runs.
    pub fn set_visualiser(&mut self, visualiser: impl Visualiser + 'static) -> &mut Self {
        self.visualiser = Some(Box::new(visualiser));
        self.status = AssemblerStatus::Configured;
        self
    }

    /// Replaces the configuration.
    pub fn set_config(&mut self, config: Config) -> &mut Self {
        self.config = Some(config);
        self.status = AssemblerStatus::Configured;
        self
    }

    /// Loads the configuration of the project rooted at `root` and creates
    /// its output directory.
    pub fn load_project_config(&mut self, root: impl AsRef<Path>) -> Result<&mut Self, SurroundError> {
        let config = Config::for_project(root)?;
        if let Some(output) = config.get_str("output_path")? {
            fs::create_dir_all(output).map_err(|err| {
                SurroundError::Storage(
                    ErrorInfo::new("surround.assembler.output_dir", err.to_string())
                        .with_context("path", output),
                )
            })?;
        }
        Ok(self.set_config(config))
    }

    /// Initialises every stage, then the finaliser, metrics and visualiser.
    ///
    /// Returns `Ok(false)` when a stage fails, after logging the failure, or
    /// the failure itself when `surround.surface_exceptions` is set. Calling
    /// it again after a success does nothing.
    pub fn init_assembler(&mut self) -> Result<bool, SurroundError> {
        if matches!(
            self.status,
            AssemblerStatus::Initialised | AssemblerStatus::Runnable | AssemblerStatus::Idle
        ) {
            return Ok(true);
        }
        let config = ensure_config(&mut self.config)?;
        let outcome = initialise_all(
            config,
            &mut self.stages,
            [&mut self.finaliser, &mut self.metrics],
            &mut self.visualiser,
        );
        match outcome {
            Ok(()) => {
                self.status = if self.stages.is_empty() {
                    AssemblerStatus::Initialised
                } else {
                    AssemblerStatus::Runnable
                };
                info!(assembler = %self.name, stages = self.stages.len(), "assembler initialised");
                Ok(true)
            }
            Err(err) if config.flag("surround.surface_exceptions") => Err(err),
            Err(err) => {
                error!(assembler = %self.name, error = %err, "assembler initialisation failed");
                Ok(false)
            }
        }
    }

    /// Runs the pipeline over `state`.
    ///
    /// The state is frozen for the duration of the run. Stages execute in
    /// order until one records an error; the metrics stage runs outside
    /// [`RunMode::Predict`], the finaliser always runs, and the visualiser
    /// runs outside predict mode when no errors were recorded. The state is
    /// thawed on every exit path.
    pub fn run(&mut self, state: &mut State, mode: RunMode) -> Result<(), SurroundError> {
        if self.stages.is_empty() {
            return Err(run_error("surround.assembler.no_stages", "there are no stages to run")
                .with_assembler_context(&self.name));
        }
        if mode == RunMode::Train && !self.has_estimator() {
            return Err(run_error(
                "surround.assembler.no_estimator",
                "training requires an estimator stage",
            )
            .with_assembler_context(&self.name));
        }
        ensure_config(&mut self.config)?;
        info!(assembler = %self.name, mode = %mode, "starting assembler");
        self.status = AssemblerStatus::Running;

        let Self {
            config,
            stages,
            finaliser,
            metrics,
            visualiser,
            ..
        } = self;
        let config = config
            .as_ref()
            .ok_or_else(|| run_error("surround.assembler.config", "configuration unavailable"))?;
        let policy = RunPolicy::from_config(config);

        let mut ticket = RunTicket::acquire(state, config, policy, mode, finaliser.as_mut());
        let outcome = ticket
            .run_stages(stages)
            .and_then(|()| ticket.run_metrics(metrics.as_mut()));
        let result = match outcome {
            Ok(()) => ticket.release(visualiser.as_mut()),
            Err(err) => {
                drop(ticket);
                Err(err)
            }
        };

        if !state.errors.is_empty() {
            error!(assembler = %self.name, errors = ?state.errors, "run finished with errors");
        }
        self.status = AssemblerStatus::Idle;
        result
    }
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("status", &self.status)
            .finish()
    }
}

trait ErrorContext {
    fn with_stage_context(self, index: usize) -> Self;
    fn with_assembler_context(self, name: &str) -> Self;
    fn with_hint_text(self, hint: &str) -> Self;
}

impl ErrorContext for SurroundError {
    fn with_stage_context(self, index: usize) -> Self {
        map_info(self, |info| info.with_context("index", index.to_string()))
    }

    fn with_assembler_context(self, name: &str) -> Self {
        map_info(self, |info| info.with_context("assembler", name))
    }

    fn with_hint_text(self, hint: &str) -> Self {
        map_info(self, |info| info.with_hint(hint))
    }
}

fn map_info(err: SurroundError, apply: impl FnOnce(ErrorInfo) -> ErrorInfo) -> SurroundError {
    match err {
        SurroundError::AssemblerConfig(info) => SurroundError::AssemblerConfig(apply(info)),
        SurroundError::AssemblerRun(info) => SurroundError::AssemblerRun(apply(info)),
        other => other,
    }
}

fn ensure_config(slot: &mut Option<Config>) -> Result<&Config, SurroundError> {
    if slot.is_none() {
        *slot = Some(Config::new()?);
    }
    slot.as_ref()
        .ok_or_else(|| config_error("surround.assembler.config", "configuration unavailable"))
}

fn initialise_all(
    config: &Config,
    stages: &mut [PipelineStage],
    hooks: [&mut Option<Box<dyn Filter>>; 2],
    visualiser: &mut Option<Box<dyn Visualiser>>,
) -> Result<(), SurroundError> {
    for stage in stages.iter_mut() {
        let name = stage.name();
        guarded(&name, || stage.initialise(config))?;
    }
    for hook in hooks.into_iter().flatten() {
        let name = hook.name();
        guarded(&name, || hook.initialise(config))?;
    }
    if let Some(visualiser) = visualiser {
        let name = visualiser.name();
        guarded(&name, || visualiser.initialise(config))?;
    }
    Ok(())
}

/// Runs `call`, converting a panic into a stage error.
fn guarded(name: &str, call: impl FnOnce() -> Result<(), SurroundError>) -> Result<(), SurroundError> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(SurroundError::Stage(
            ErrorInfo::new(
                "surround.stage.panic",
                format!("stage '{name}' panicked: {}", panic_message(payload.as_ref())),
            )
            .with_context("stage", name),
        ))
    })
}

/// Scoped hold on a frozen state for one run.
///
/// [`RunTicket::release`] runs the finaliser and the visualiser before
/// thawing; dropping an unreleased ticket still runs the finaliser and thaws.
struct RunTicket<'a> {
    state: &'a mut State,
    config: &'a Config,
    policy: RunPolicy,
    mode: RunMode,
    finaliser: Option<&'a mut Box<dyn Filter>>,
    released: bool,
}

impl<'a> RunTicket<'a> {
    fn acquire(
        state: &'a mut State,
        config: &'a Config,
        policy: RunPolicy,
        mode: RunMode,
        finaliser: Option<&'a mut Box<dyn Filter>>,
    ) -> Self {
        state.freeze();
        Self {
            state,
            config,
            policy,
            mode,
            finaliser,
            released: false,
        }
    }

    fn run_stages(&mut self, stages: &mut [PipelineStage]) -> Result<(), SurroundError> {
        let (config, mode, dump) = (self.config, self.mode, self.policy.dump_output);
        for stage in stages.iter_mut() {
            let name = stage.name();
            self.timed(&name, |state| {
                stage.execute(state, config, mode)?;
                if dump {
                    stage.dump_output(state, config)?;
                }
                Ok(())
            })?;
            if !self.state.errors.is_empty() {
                warn!(stage = %name, "stopping after stage error");
                break;
            }
        }
        Ok(())
    }

    fn run_metrics(&mut self, metrics: Option<&mut Box<dyn Filter>>) -> Result<(), SurroundError> {
        let Some(metrics) = metrics else {
            return Ok(());
        };
        if self.mode == RunMode::Predict && !self.policy.metrics_in_predict {
            return Ok(());
        }
        let (config, dump) = (self.config, self.policy.dump_output);
        let name = metrics.name();
        self.timed(&name, |state| {
            metrics.operate(state, config)?;
            if dump {
                metrics.dump_output(state, config)?;
            }
            Ok(())
        })
    }

    fn run_finaliser(&mut self) -> Result<(), SurroundError> {
        let Some(finaliser) = self.finaliser.as_mut() else {
            return Ok(());
        };
        let (config, dump) = (self.config, self.policy.dump_output);
        let name = finaliser.name();
        execute_timed(self.state, &name, self.policy, |state| {
            finaliser.operate(state, config)?;
            if dump {
                finaliser.dump_output(state, config)?;
            }
            Ok(())
        })
    }

    fn release(mut self, visualiser: Option<&mut Box<dyn Visualiser>>) -> Result<(), SurroundError> {
        self.released = true;
        let mut result = self.run_finaliser();
        if result.is_ok() && self.mode != RunMode::Predict && self.state.errors.is_empty() {
            if let Some(visualiser) = visualiser {
                let (config, dump) = (self.config, self.policy.dump_output);
                let name = visualiser.name();
                result = self.timed(&name, |state| {
                    visualiser.visualise(state, config)?;
                    if dump {
                        visualiser.dump_output(state, config)?;
                    }
                    Ok(())
                });
            }
        }
        self.state.thaw();
        result
    }

    fn timed(
        &mut self,
        name: &str,
        call: impl FnOnce(&mut State) -> Result<(), SurroundError>,
    ) -> Result<(), SurroundError> {
        execute_timed(self.state, name, self.policy, call)
    }
}

impl Drop for RunTicket<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.run_finaliser() {
            error!(error = %err, "finaliser failed while unwinding a run");
            self.state.push_error(err.message());
        }
        self.state.thaw();
    }
}

/// Runs one stage call under the timing and exception policy.
fn execute_timed(
    state: &mut State,
    name: &str,
    policy: RunPolicy,
    call: impl FnOnce(&mut State) -> Result<(), SurroundError>,
) -> Result<(), SurroundError> {
    let started = Instant::now();
    let outcome = guarded(name, || call(&mut *state));
    let seconds = started.elapsed().as_secs_f64();
    state.record_timing(name, seconds);
    info!(stage = %name, seconds, "stage finished");
    match outcome {
        Ok(()) => Ok(()),
        Err(err) if policy.surface_exceptions => Err(err),
        Err(err) => {
            error!(stage = %name, error = %err, "stage failed");
            state.push_error(err.message());
            Ok(())
        }
    }
}

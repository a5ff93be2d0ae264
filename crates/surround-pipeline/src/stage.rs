//! Stage contracts and the tagged stage wrapper the assembler dispatches on.

use std::any::Any;

use surround_core::{Config, RunMode, State, SurroundError};

/// Behaviour shared by every pipeline stage.
pub trait Stage: Send {
    /// Name used for timing records and logs. Defaults to the type name.
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }

    /// One-time setup, called by [`crate::Assembler::init_assembler`].
    fn initialise(&mut self, _config: &Config) -> Result<(), SurroundError> {
        Ok(())
    }

    /// Side-effect hook invoked after the stage succeeds when
    /// `surround.enable_stage_output_dump` is set.
    fn dump_output(&self, _state: &State, _config: &Config) -> Result<(), SurroundError> {
        Ok(())
    }
}

/// Checks the incoming state before any other stage runs.
pub trait Validator: Stage {
    /// Records problems in `state.errors` or returns an error.
    fn validate(&mut self, state: &mut State, config: &Config) -> Result<(), SurroundError>;
}

/// Plain transformation; also the contract of finalisers and metrics stages.
pub trait Filter: Stage {
    /// Transforms the state in place.
    fn operate(&mut self, state: &mut State, config: &Config) -> Result<(), SurroundError>;
}

/// The single predict/train stage of a pipeline.
pub trait Estimator: Stage {
    /// Inference, used in every mode except [`RunMode::Train`].
    fn estimate(&mut self, state: &mut State, config: &Config) -> Result<(), SurroundError>;

    /// Training, used in [`RunMode::Train`]. Does nothing unless overridden.
    fn fit(&mut self, _state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        Ok(())
    }
}

/// Renders results after a successful batch or training run.
pub trait Visualiser: Stage {
    /// Produces a report from the final state.
    fn visualise(&mut self, state: &State, config: &Config) -> Result<(), SurroundError>;
}

/// Role tag of a [`PipelineStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    /// Input validation.
    Validator,
    /// Pre or post filter.
    Filter,
    /// Estimator.
    Estimator,
    /// Visualiser.
    Visualiser,
}

/// A stage paired with the role that selects its dispatch.
pub enum PipelineStage {
    /// Runs `validate`.
    Validator(Box<dyn Validator>),
    /// Runs `operate`.
    Filter(Box<dyn Filter>),
    /// Runs `estimate` or `fit` depending on the mode.
    Estimator(Box<dyn Estimator>),
    /// Runs `visualise`. Rejected in an assembler's ordered stage list.
    Visualiser(Box<dyn Visualiser>),
}

impl PipelineStage {
    /// Wraps a validator.
    pub fn validator(stage: impl Validator + 'static) -> Self {
        PipelineStage::Validator(Box::new(stage))
    }

    /// Wraps a filter.
    pub fn filter(stage: impl Filter + 'static) -> Self {
        PipelineStage::Filter(Box::new(stage))
    }

    /// Wraps an estimator.
    pub fn estimator(stage: impl Estimator + 'static) -> Self {
        PipelineStage::Estimator(Box::new(stage))
    }

    /// Wraps a visualiser.
    pub fn visualiser(stage: impl Visualiser + 'static) -> Self {
        PipelineStage::Visualiser(Box::new(stage))
    }

    /// The role tag.
    pub fn role(&self) -> StageRole {
        match self {
            PipelineStage::Validator(_) => StageRole::Validator,
            PipelineStage::Filter(_) => StageRole::Filter,
            PipelineStage::Estimator(_) => StageRole::Estimator,
            PipelineStage::Visualiser(_) => StageRole::Visualiser,
        }
    }

    /// Name reported by the wrapped stage.
    pub fn name(&self) -> String {
        match self {
            PipelineStage::Validator(stage) => stage.name(),
            PipelineStage::Filter(stage) => stage.name(),
            PipelineStage::Estimator(stage) => stage.name(),
            PipelineStage::Visualiser(stage) => stage.name(),
        }
    }

    pub(crate) fn initialise(&mut self, config: &Config) -> Result<(), SurroundError> {
        match self {
            PipelineStage::Validator(stage) => stage.initialise(config),
            PipelineStage::Filter(stage) => stage.initialise(config),
            PipelineStage::Estimator(stage) => stage.initialise(config),
            PipelineStage::Visualiser(stage) => stage.initialise(config),
        }
    }

    pub(crate) fn execute(
        &mut self,
        state: &mut State,
        config: &Config,
        mode: RunMode,
    ) -> Result<(), SurroundError> {
        match self {
            PipelineStage::Validator(stage) => stage.validate(state, config),
            PipelineStage::Filter(stage) => stage.operate(state, config),
            PipelineStage::Estimator(stage) if mode == RunMode::Train => stage.fit(state, config),
            PipelineStage::Estimator(stage) => stage.estimate(state, config),
            PipelineStage::Visualiser(stage) => stage.visualise(state, config),
        }
    }

    pub(crate) fn dump_output(&self, state: &State, config: &Config) -> Result<(), SurroundError> {
        match self {
            PipelineStage::Validator(stage) => stage.dump_output(state, config),
            PipelineStage::Filter(stage) => stage.dump_output(state, config),
            PipelineStage::Estimator(stage) => stage.dump_output(state, config),
            PipelineStage::Visualiser(stage) => stage.dump_output(state, config),
        }
    }
}

impl std::fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStage")
            .field("role", &self.role())
            .field("name", &self.name())
            .finish()
    }
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Renders a caught panic payload as a message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#![deny(missing_docs)]
#![doc = "Stage contracts, the assembler engine and runners for Surround pipelines."]

mod assembler;
mod runner;
pub mod stage;
mod surround;

pub use assembler::{Assembler, AssemblerStatus};
pub use runner::{load_fresh, prepare, BatchRunner, Runner};
pub use stage::{Estimator, Filter, PipelineStage, Stage, StageRole, Validator, Visualiser};
pub use surround::Surround;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Selects which stage method an assembler run dispatches to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    /// Single record inference; estimators `estimate`.
    #[default]
    Predict,
    /// Inference over a batch; metrics and visualisers run.
    BatchPredict,
    /// Training; estimators `fit`.
    Train,
}

impl RunMode {
    /// Maps a command label to a mode: `train`, `batch`, anything else predicts.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "train" => RunMode::Train,
            "batch" => RunMode::BatchPredict,
            _ => RunMode::Predict,
        }
    }

    /// Stable identifier used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Predict => "PREDICT",
            RunMode::BatchPredict => "BATCH_PREDICT",
            RunMode::Train => "TRAIN",
        }
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

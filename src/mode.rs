use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Execution mode of the classifier.
///
/// The mode is fixed for a whole call: it selects which outputs are computed
/// and whether the model parameters are updated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Loss with dropout active, followed by one optimizer step.
    Train,
    /// Loss and accuracy, parameters untouched.
    Eval,
    /// Class predictions and probabilities only, labels are never read.
    Predict,
}

impl Mode {
    pub fn requires_labels(&self) -> bool {
        match self {
            Mode::Train | Mode::Eval => true,
            Mode::Predict => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Eval => "eval",
            Mode::Predict => "predict",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "train" => Ok(Mode::Train),
            "eval" => Ok(Mode::Eval),
            "predict" => Ok(Mode::Predict),
            _ => Err(Error::UnsupportedMode(value.to_string())),
        }
    }
}

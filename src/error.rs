use std::path::PathBuf;

use burn::config::ConfigError;
use burn::record::RecorderError;
use burn::tensor::DataError;

use crate::idx::IdxError;
use crate::mode::Mode;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading data, running the model or persisting it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An input file is missing, unreadable or not a valid IDX array.
    #[error("dataset load failure for `{}`: {source}", path.display())]
    DatasetLoad {
        path: PathBuf,
        #[source]
        source: IdxError,
    },

    /// Arrays or tensors do not have the shape an operation expects.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    #[error("unsupported execution mode `{0}`, expected one of train, eval or predict")]
    UnsupportedMode(String),

    /// Train and eval compute a loss, so their batches must carry labels.
    #[error("labels are required in {0} mode")]
    MissingLabels(Mode),

    #[error("no trained model found in `{}`", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RecorderError> for Error {
    fn from(error: RecorderError) -> Self {
        Error::Checkpoint(format!("{error:?}"))
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Error::Config(format!("{error:?}"))
    }
}

impl From<DataError> for Error {
    fn from(error: DataError) -> Self {
        Error::TensorData(format!("{error:?}"))
    }
}

use std::path::PathBuf;

use burn::config::Config;
use clap::Parser;

use crate::error::Result;
use crate::mode::Mode;
use crate::training::TrainingConfig;

/// Train, evaluate or run a LeNet classifier on MNIST IDX files.
#[derive(Parser, Debug)]
#[command(name = "lenet-mnist", version)]
pub struct Cli {
    /// Modes to run, in order: train, eval or predict.
    #[arg(default_values_t = [Mode::Train, Mode::Eval])]
    pub modes: Vec<Mode>,

    /// JSON training configuration, as saved in the model directory.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the IDX files.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Directory of the checkpoint.
    #[arg(long)]
    pub model_dir: Option<String>,

    /// Number of training steps.
    #[arg(long)]
    pub steps: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of test images classified in predict mode.
    #[arg(long, default_value = "10")]
    pub predict_count: usize,
}

impl Cli {
    /// Loads the configuration file if any, then applies the flags on top.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.dataset.data_dir = data_dir.clone();
        }
        if let Some(model_dir) = &self.model_dir {
            config.model_dir = model_dir.clone();
        }
        if let Some(steps) = self.steps {
            config.num_steps = steps;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

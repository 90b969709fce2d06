use std::fmt;
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    optim::{Optimizer, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{images_to_tensor, load_images, MnistBatch, MnistBatcher, MnistDataset};
use crate::error::Error;
use crate::estimator::Estimator;
use crate::mode::Mode;
use crate::model::{Lenet, LenetConfig};

/// Locations of the four IDX files.
#[derive(Config, Debug)]
pub struct DatasetConfig {
    #[config(default = "String::from(\".\")")]
    pub data_dir: String,
    #[config(default = "String::from(\"train-images.idx3-ubyte\")")]
    pub train_images: String,
    #[config(default = "String::from(\"train-labels.idx1-ubyte\")")]
    pub train_labels: String,
    #[config(default = "String::from(\"t10k-images.idx3-ubyte\")")]
    pub test_images: String,
    #[config(default = "String::from(\"t10k-labels.idx1-ubyte\")")]
    pub test_labels: String,
}

impl DatasetConfig {
    fn path(&self, file: &str) -> PathBuf {
        Path::new(&self.data_dir).join(file)
    }

    pub fn train(&self) -> crate::Result<MnistDataset> {
        MnistDataset::load(self.path(&self.train_images), self.path(&self.train_labels))
    }

    pub fn test(&self) -> crate::Result<MnistDataset> {
        MnistDataset::load(self.path(&self.test_images), self.path(&self.test_labels))
    }

    pub fn test_images_path(&self) -> PathBuf {
        self.path(&self.test_images)
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    pub model: LenetConfig,
    pub optimizer: SgdConfig,
    pub dataset: DatasetConfig,
    /// Directory holding the checkpoint and the saved configuration.
    #[config(default = "String::from(\"/tmp/mnist_convnet_model\")")]
    pub model_dir: String,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 100)]
    pub batch_size: usize,
    #[config(default = 128)]
    pub eval_batch_size: usize,
    /// Optimizer steps of one training run, on top of the restored global step.
    #[config(default = 20_000)]
    pub num_steps: usize,
    #[config(default = 50)]
    pub log_every: usize,
    #[config(default = 1_000)]
    pub checkpoint_every: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(LenetConfig::new(), SgdConfig::new(), DatasetConfig::new())
    }
}

impl TrainingConfig {
    /// Rejects settings that cannot drive a data loader.
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("`batch_size` must be at least 1".to_string()));
        }
        if self.eval_batch_size == 0 {
            return Err(Error::Config(
                "`eval_batch_size` must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainSummary {
    pub global_step: usize,
    pub loss: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalSummary {
    pub loss: f32,
    pub accuracy: f32,
    pub global_step: usize,
    pub num_examples: usize,
}

impl fmt::Display for EvalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy = {:.4}, loss = {:.4}, global_step = {}, examples = {}",
            self.accuracy, self.loss, self.global_step, self.num_examples
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PredictionRecord {
    pub index: usize,
    pub class: usize,
    pub probability: f32,
}

fn create_estimator<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> Estimator<B, impl Optimizer<Lenet<B>, B>> {
    let model = config.model.init::<B>(&device);
    let optim = config.optimizer.init::<B, Lenet<B>>();

    log::debug!("Model with {} parameters\n{}", model.num_params(), model);
    Estimator::new(model, optim, config.learning_rate, device)
}

/// Trains for `num_steps` batches sampled from the shuffled training set.
///
/// Training resumes from the checkpoint in `model_dir` when there is one, and
/// checkpoints are written every `checkpoint_every` steps and at the end.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> crate::Result<TrainSummary> {
    config.validate()?;
    std::fs::create_dir_all(&config.model_dir)?;
    config.save(Path::new(&config.model_dir).join("config.json"))?;

    let dataset = config.dataset.train()?;
    if dataset.is_empty() {
        return Err(Error::EmptyDataset(format!(
            "`{}` holds no training images",
            config.dataset.train_images
        )));
    }

    let mut estimator = create_estimator::<B>(config, device.clone());
    estimator.restore_checkpoint(&config.model_dir)?;

    let seed = shuffle_seed(config.seed, estimator.global_step());
    B::seed(seed);
    let dataloader = DataLoaderBuilder::new(MnistBatcher::<B>::new(device))
        .batch_size(config.batch_size)
        .shuffle(seed)
        .build(dataset);

    log::info!(
        "Training from step {} to step {}",
        estimator.global_step(),
        estimator.global_step() + config.num_steps
    );

    let batches = std::iter::repeat_with(|| dataloader.iter()).flatten();
    let loss = fit(&mut estimator, batches, config)?;
    estimator.save_checkpoint(&config.model_dir)?;
    log::info!("Loss for final step: {loss:.4}");

    Ok(TrainSummary {
        global_step: estimator.global_step(),
        loss,
    })
}

/// Seed of a run starting at `global_step`, so that a resumed run draws a new
/// batch order.
fn shuffle_seed(seed: u64, global_step: usize) -> u64 {
    seed.wrapping_add(global_step as u64)
}

/// Applies one optimizer step per batch, for at most `num_steps` batches.
///
/// Returns the loss of the last step, `NaN` when no step ran.
fn fit<B, O, I>(
    estimator: &mut Estimator<B, O>,
    batches: I,
    config: &TrainingConfig,
) -> crate::Result<f32>
where
    B: AutodiffBackend,
    O: Optimizer<Lenet<B>, B>,
    I: Iterator<Item = MnistBatch<B>>,
{
    let mut loss = f32::NAN;
    for batch in batches.take(config.num_steps) {
        let output = estimator.train(batch)?;
        loss = output.loss;
        let step = estimator.global_step();

        if config.log_every > 0 && step % config.log_every == 0 {
            log::info!(
                "step = {step}, loss = {loss:.4}, probabilities = {}",
                output.predictions.probabilities
            );
        }
        if config.checkpoint_every > 0 && step % config.checkpoint_every == 0 {
            estimator.save_checkpoint(&config.model_dir)?;
        }
    }

    Ok(loss)
}

fn restore_trained<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> crate::Result<Estimator<B, impl Optimizer<Lenet<B>, B>>> {
    let mut estimator = create_estimator::<B>(config, device);
    if !estimator.restore_checkpoint(&config.model_dir)? {
        return Err(Error::MissingCheckpoint(PathBuf::from(&config.model_dir)));
    }

    Ok(estimator)
}

/// Evaluates the restored model once over the whole test set, in file order.
pub fn evaluate<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> crate::Result<EvalSummary> {
    config.validate()?;
    let dataset = config.dataset.test()?;
    if dataset.is_empty() {
        return Err(Error::EmptyDataset(format!(
            "`{}` holds no evaluation images",
            config.dataset.test_images
        )));
    }

    let estimator = restore_trained::<B>(config, device.clone())?;
    let dataloader = DataLoaderBuilder::new(MnistBatcher::<B>::new(device))
        .batch_size(config.eval_batch_size)
        .build(dataset);

    let mut loss_sum = 0.0;
    let mut correct = 0;
    let mut total = 0;
    for batch in dataloader.iter() {
        let output = estimator.evaluate(batch)?;
        loss_sum += output.loss as f64 * output.total as f64;
        correct += output.correct;
        total += output.total;
    }

    let summary = EvalSummary {
        loss: (loss_sum / total as f64) as f32,
        accuracy: correct as f32 / total as f32,
        global_step: estimator.global_step(),
        num_examples: total,
    };
    log::info!("Evaluation results: {summary}");

    Ok(summary)
}

/// Classifies the first `count` test images. The labels file is never opened.
pub fn predict<B: AutodiffBackend>(
    config: &TrainingConfig,
    count: usize,
    device: B::Device,
) -> crate::Result<Vec<PredictionRecord>> {
    config.validate()?;
    let images = load_images(config.dataset.test_images_path())?;
    let count = count.min(images.len());
    if count == 0 {
        return Err(Error::EmptyDataset(format!(
            "no images to classify in `{}`",
            config.dataset.test_images
        )));
    }

    let estimator = restore_trained::<B>(config, device)?;
    let mut records = Vec::with_capacity(count);
    for (chunk_index, chunk) in images[..count].chunks(config.eval_batch_size).enumerate() {
        let batch = MnistBatch::unlabeled(images_to_tensor(chunk, estimator.device()));
        let predictions = estimator.predict(batch)?;
        let classes = predictions
            .classes
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()?;
        let probabilities = predictions
            .probabilities
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()?;
        let num_classes = probabilities.len() / classes.len();

        for (offset, class) in classes.into_iter().enumerate() {
            let record = PredictionRecord {
                index: chunk_index * config.eval_batch_size + offset,
                class: class as usize,
                probability: probabilities[offset * num_classes + class as usize],
            };
            log::info!(
                "image {}: predicted {} with probability {:.4}",
                record.index,
                record.class,
                record.probability
            );
            records.push(record);
        }
    }

    Ok(records)
}

/// Runs the requested modes in order.
pub fn execute<B: AutodiffBackend>(
    config: &TrainingConfig,
    modes: &[Mode],
    predict_count: usize,
    device: B::Device,
) -> crate::Result<()> {
    for mode in modes {
        match mode {
            Mode::Train => {
                train::<B>(config, device.clone())?;
            }
            Mode::Eval => {
                let summary = evaluate::<B>(config, device.clone())?;
                println!("{summary}");
            }
            Mode::Predict => {
                for record in predict::<B>(config, predict_count, device.clone())? {
                    println!(
                        "{}\t{}\t{:.4}",
                        record.index, record.class, record.probability
                    );
                }
            }
        }
    }

    Ok(())
}

//! Mode dispatch over a [Lenet] model and the state that training mutates.

use std::path::Path;

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::data::{MnistBatch, PADDED_SIDE};
use crate::error::Error;
use crate::mode::Mode;
use crate::model::{Lenet, Predictions};

const MODEL_FILE: &str = "model";
const STATE_FILE: &str = "checkpoint.json";

type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Training progress stored next to the model parameters.
#[derive(Config, Debug)]
pub struct CheckpointState {
    pub global_step: usize,
}

/// Result of one optimizer step.
#[derive(Clone, Debug)]
pub struct TrainStepOutput<B: Backend> {
    /// Loss of the batch before the update.
    pub loss: f32,
    /// Predictions of the batch with dropout active.
    pub predictions: Predictions<B>,
}

/// Loss and accuracy of one batch, without any update.
#[derive(Clone, Debug)]
pub struct EvalStepOutput<B: Backend> {
    pub loss: f32,
    pub correct: usize,
    pub total: usize,
    pub predictions: Predictions<B>,
}

impl<B: Backend> EvalStepOutput<B> {
    pub fn accuracy(&self) -> f32 {
        self.correct as f32 / self.total as f32
    }
}

/// What a call computed, depending on its [Mode].
#[derive(Clone, Debug)]
pub enum ModeOutput<B: Backend> {
    Train(TrainStepOutput<B>),
    Eval(EvalStepOutput<B>),
    Predict(Predictions<B>),
}

/// Owns the model parameters, the optimizer and the global step.
///
/// Only [Mode::Train] mutates the parameters; evaluation and prediction run on
/// the inner backend with autodiff disabled.
pub struct Estimator<B: AutodiffBackend, O> {
    model: Lenet<B>,
    optim: O,
    learning_rate: f64,
    global_step: usize,
    device: B::Device,
}

impl<B, O> Estimator<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<Lenet<B>, B>,
{
    pub fn new(model: Lenet<B>, optim: O, learning_rate: f64, device: B::Device) -> Self {
        Self {
            model,
            optim,
            learning_rate,
            global_step: 0,
            device,
        }
    }

    /// Number of optimizer steps applied to the parameters so far.
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Runs the batch in the given mode.
    pub fn run(&mut self, batch: MnistBatch<B>, mode: Mode) -> crate::Result<ModeOutput<B::InnerBackend>> {
        match mode {
            Mode::Train => self.train(batch).map(ModeOutput::Train),
            Mode::Eval => self.evaluate(batch).map(ModeOutput::Eval),
            Mode::Predict => self.predict(batch).map(ModeOutput::Predict),
        }
    }

    /// Computes the loss with dropout active and applies one gradient descent step.
    pub fn train(&mut self, batch: MnistBatch<B>) -> crate::Result<TrainStepOutput<B::InnerBackend>> {
        check_batch(&batch, Mode::Train)?;
        let targets = batch.targets.ok_or(Error::MissingLabels(Mode::Train))?;

        let output = self
            .model
            .forward_classification(batch.images, targets, Mode::Train);
        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optim
            .step(self.learning_rate, self.model.clone(), grads);
        self.global_step += 1;

        Ok(TrainStepOutput {
            loss: output.loss.into_scalar().elem::<f32>(),
            predictions: Predictions::from_logits(output.output.inner()),
        })
    }

    pub fn evaluate(&self, batch: MnistBatch<B>) -> crate::Result<EvalStepOutput<B::InnerBackend>> {
        check_batch(&batch, Mode::Eval)?;
        let total = batch.batch_size();
        let targets = batch.targets.ok_or(Error::MissingLabels(Mode::Eval))?;

        let model = self.model.valid();
        let output = model.forward_classification(batch.images.inner(), targets.inner(), Mode::Eval);
        let predictions = Predictions::from_logits(output.output);
        let correct = predictions.num_correct(output.targets);

        Ok(EvalStepOutput {
            loss: output.loss.into_scalar().elem::<f32>(),
            correct,
            total,
            predictions,
        })
    }

    /// Class predictions for the batch. Labels, when present, are ignored.
    pub fn predict(&self, batch: MnistBatch<B>) -> crate::Result<Predictions<B::InnerBackend>> {
        check_batch(&batch, Mode::Predict)?;

        let logits = self.model.valid().forward(batch.images.inner(), Mode::Predict);

        Ok(Predictions::from_logits(logits))
    }

    /// Saves the parameters and the global step in `directory`.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, directory: P) -> crate::Result<()> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;

        self.model
            .clone()
            .save_file(directory.join(MODEL_FILE), &CheckpointRecorder::default())?;
        CheckpointState::new(self.global_step).save(directory.join(STATE_FILE))?;

        log::info!(
            "Saved checkpoint for step {} in {}",
            self.global_step,
            directory.display()
        );
        Ok(())
    }

    /// Restores the parameters and the global step saved in `directory`.
    ///
    /// Returns `false`, leaving the estimator untouched, when the directory
    /// holds no checkpoint.
    pub fn restore_checkpoint<P: AsRef<Path>>(&mut self, directory: P) -> crate::Result<bool> {
        let directory = directory.as_ref();
        let state_path = directory.join(STATE_FILE);
        if !state_path.exists() {
            return Ok(false);
        }

        let state = CheckpointState::load(&state_path)?;
        let model_path = directory.join(MODEL_FILE);
        if !model_path.with_extension("mpk").exists() {
            return Err(Error::Checkpoint(format!(
                "`{}` has no parameters file",
                directory.display()
            )));
        }

        self.model = self.model.clone().load_file(
            model_path,
            &CheckpointRecorder::default(),
            &self.device,
        )?;
        self.global_step = state.global_step;

        log::info!(
            "Restored checkpoint for step {} from {}",
            self.global_step,
            directory.display()
        );
        Ok(true)
    }
}

fn check_batch<B: Backend>(batch: &MnistBatch<B>, mode: Mode) -> crate::Result<()> {
    let [batch_size, channels, height, width] = batch.images.dims();
    if batch_size == 0 || channels != 1 || height != PADDED_SIDE || width != PADDED_SIDE {
        return Err(Error::ShapeMismatch(format!(
            "expected images of shape [N, 1, {PADDED_SIDE}, {PADDED_SIDE}] with N >= 1, found {:?}",
            [batch_size, channels, height, width]
        )));
    }

    if !mode.requires_labels() {
        return Ok(());
    }
    let [num_targets] = batch
        .targets
        .as_ref()
        .ok_or(Error::MissingLabels(mode))?
        .dims();
    if num_targets != batch_size {
        return Err(Error::ShapeMismatch(format!(
            "{batch_size} images but {num_targets} labels"
        )));
    }

    Ok(())
}

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::{activation::softmax, ElementConversion},
    train::ClassificationOutput,
};

use crate::mode::Mode;

#[derive(Config, Debug)]
pub struct LenetConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    /// Fraction of the dense activations dropped while training.
    #[config(default = 0.4)]
    pub dropout: f64,
}

/// LeNet-5 style network for 32x32 single channel images.
#[derive(Module, Debug)]
pub struct Lenet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    dense1: Linear<B>,
    dense2: Linear<B>,
    dropout: Dropout,
    logits: Linear<B>,
    activation: Relu,
}

impl LenetConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Lenet<B> {
        Lenet {
            conv1: Conv2dConfig::new([1, 6], [5, 5]).init(device),
            conv2: Conv2dConfig::new([6, 16], [5, 5]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dense1: LinearConfig::new(16 * 5 * 5, 120).init(device),
            dense2: LinearConfig::new(120, 84).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            logits: LinearConfig::new(84, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Lenet<B> {
    /// # Shapes
    ///   - Images [batch_size, 1, 32, 32]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>, mode: Mode) -> Tensor<B, 2> {
        let x = self.conv1.forward(images); // [batch_size, 6, 28, 28]
        let x = self.activation.forward(x);
        let x = self.pool.forward(x); // [batch_size, 6, 14, 14]
        let x = self.conv2.forward(x); // [batch_size, 16, 10, 10]
        let x = self.activation.forward(x);
        let x = self.pool.forward(x); // [batch_size, 16, 5, 5]

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.activation.forward(self.dense1.forward(x));
        let x = self.activation.forward(self.dense2.forward(x));
        let x = match mode {
            Mode::Train => self.dropout.forward(x),
            Mode::Eval | Mode::Predict => x,
        };

        self.logits.forward(x)
    }

    /// Softmax cross entropy between the logits and the one-hot encoded targets,
    /// averaged over the batch.
    pub fn loss(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
        mode: Mode,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images, mode);
        let loss = self.loss(output.clone(), targets.clone());

        ClassificationOutput {
            loss,
            output,
            targets,
        }
    }
}

/// Per batch outputs derived from the logits.
#[derive(Clone, Debug)]
pub struct Predictions<B: Backend> {
    /// Index of the highest score of every row, `[batch_size]`.
    pub classes: Tensor<B, 1, Int>,
    /// Softmax of the logits, `[batch_size, num_classes]`.
    pub probabilities: Tensor<B, 2>,
}

impl<B: Backend> Predictions<B> {
    pub fn from_logits(logits: Tensor<B, 2>) -> Self {
        let classes = logits.clone().argmax(1).squeeze(1);
        let probabilities = softmax(logits, 1);

        Self {
            classes,
            probabilities,
        }
    }

    /// Number of predictions equal to the targets.
    pub fn num_correct(&self, targets: Tensor<B, 1, Int>) -> usize {
        let correct = self
            .classes
            .clone()
            .equal(targets)
            .int()
            .sum()
            .into_scalar();

        correct.elem::<i64>() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{images_to_tensor, NUM_CLASSES, PADDED_SIDE};
    use crate::{TestAutodiffBackend, TestBackend};
    use burn::tensor::Distribution;

    fn random_images<B: Backend>(batch_size: usize, device: &B::Device) -> Tensor<B, 4> {
        Tensor::random(
            [batch_size, 1, PADDED_SIDE, PADDED_SIDE],
            Distribution::Uniform(0.0, 255.0),
            device,
        )
    }

    #[test]
    fn forward_should_produce_one_logit_per_class() {
        let device = Default::default();
        let model = LenetConfig::new().init::<TestBackend>(&device);

        for batch_size in [1, 3, 8] {
            let logits = model.forward(random_images(batch_size, &device), Mode::Eval);
            assert_eq!(logits.dims(), [batch_size, NUM_CLASSES]);
        }
    }

    #[test]
    fn probabilities_should_sum_to_one() {
        // Dropout is only active on an autodiff backend.
        let device = Default::default();
        let model = LenetConfig::new().init::<TestAutodiffBackend>(&device);

        for mode in [Mode::Train, Mode::Eval, Mode::Predict] {
            let logits = model.forward(random_images(4, &device), mode);
            let sums = Predictions::from_logits(logits)
                .probabilities
                .sum_dim(1)
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .unwrap();

            for sum in sums {
                assert!((sum - 1.0).abs() < 1e-4, "{mode}: row sums to {sum}");
            }
        }
    }

    #[test]
    fn eval_forward_should_be_deterministic() {
        let device = Default::default();
        let model = LenetConfig::new().init::<TestAutodiffBackend>(&device);
        let images = random_images::<TestAutodiffBackend>(5, &device);

        let first = model.forward(images.clone(), Mode::Eval).into_data();
        let second = model.forward(images, Mode::Eval).into_data();

        assert_eq!(first, second);
    }

    #[test]
    fn dropout_should_only_apply_in_train_mode() {
        let device = Default::default();
        let model = LenetConfig::new()
            .with_dropout(0.9)
            .init::<TestAutodiffBackend>(&device);
        let images = random_images::<TestAutodiffBackend>(16, &device);

        let eval = model.forward(images.clone(), Mode::Eval).into_data();
        let predict = model.forward(images.clone(), Mode::Predict).into_data();
        let train = model.forward(images, Mode::Train).into_data();

        assert_eq!(eval, predict);
        assert_ne!(eval, train);
    }

    #[test]
    fn classes_should_match_highest_probability() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 2.0, -1.0], [3.0, 0.0, 1.0]],
            &device,
        );

        let predictions = Predictions::from_logits(logits);
        let classes = predictions
            .classes
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();

        assert_eq!(classes, vec![1, 0]);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2], &device);
        assert_eq!(predictions.num_correct(targets), 1);
    }

    #[test]
    fn loss_should_favor_correct_logits() {
        let device = Default::default();
        let model = LenetConfig::new().init::<TestBackend>(&device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device);
        let good = Tensor::<TestBackend, 2>::from_floats(
            [
                [9.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 9.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            ],
            &device,
        );
        let uniform = Tensor::<TestBackend, 2>::zeros([2, 10], &device);

        let good = model.loss(good, targets.clone()).into_scalar().elem::<f32>();
        let uniform = model.loss(uniform, targets).into_scalar().elem::<f32>();

        assert!((uniform - 10f32.ln()).abs() < 1e-4);
        assert!(good < uniform);
    }

    #[test]
    fn should_accept_padded_images() {
        let device = Default::default();
        let model = LenetConfig::new().init::<TestBackend>(&device);
        let images = images_to_tensor::<TestBackend>(&[[[0.0; PADDED_SIDE]; PADDED_SIDE]; 2], &device);

        let logits = model.forward(images, Mode::Predict);

        assert_eq!(logits.dims(), [2, 10]);
    }
}

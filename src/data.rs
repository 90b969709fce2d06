use std::path::Path;

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{Dataset, InMemDataset},
    },
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::idx::IdxArray;

/// Side of a raw MNIST image.
pub const MNIST_SIDE: usize = 28;
/// Zero border added on every side of an image.
pub const PADDING: usize = 2;
/// Side of a padded image, as expected by the first convolution.
pub const PADDED_SIDE: usize = MNIST_SIDE + 2 * PADDING;
pub const NUM_CLASSES: usize = 10;

/// A single channel 32x32 image.
pub type PaddedImage = [[f32; PADDED_SIDE]; PADDED_SIDE];

/// Embeds every 28x28 image at offset (2, 2) of a 32x32 zero canvas.
///
/// Pixels are cast to `f32` without any scaling and sample order is kept.
pub fn pad_zeros(images: &IdxArray) -> Result<Vec<PaddedImage>> {
    let pixels = images
        .as_u8()
        .map_err(|err| Error::ShapeMismatch(format!("images: {err}")))?;
    if images.dims().len() != 3 || images.dims()[1..] != [MNIST_SIDE, MNIST_SIDE] {
        return Err(Error::ShapeMismatch(format!(
            "expected images of shape [N, {MNIST_SIDE}, {MNIST_SIDE}], found {:?}",
            images.dims()
        )));
    }

    let padded: Vec<PaddedImage> = pixels
        .chunks_exact(MNIST_SIDE * MNIST_SIDE)
        .map(|raw| {
            let mut image = [[0f32; PADDED_SIDE]; PADDED_SIDE];
            for (y, row) in raw.chunks_exact(MNIST_SIDE).enumerate() {
                for (x, pixel) in row.iter().enumerate() {
                    image[y + PADDING][x + PADDING] = *pixel as f32;
                }
            }
            image
        })
        .collect();

    log::info!(
        "Padded images to shape [{}, {PADDED_SIDE}, {PADDED_SIDE}]",
        padded.len()
    );
    Ok(padded)
}

/// Validates a label array and returns the class of every sample.
pub fn read_labels(labels: &IdxArray) -> Result<Vec<u8>> {
    let values = labels
        .as_u8()
        .map_err(|err| Error::ShapeMismatch(format!("labels: {err}")))?;
    if labels.dims().len() != 1 {
        return Err(Error::ShapeMismatch(format!(
            "expected labels of shape [N], found {:?}",
            labels.dims()
        )));
    }
    if let Some(label) = values.iter().find(|label| **label as usize >= NUM_CLASSES) {
        return Err(Error::ShapeMismatch(format!(
            "label {label} is outside of [0, {}]",
            NUM_CLASSES - 1
        )));
    }

    Ok(values.to_vec())
}

/// Reads an image file and pads its images, without touching any label file.
pub fn load_images<P: AsRef<Path>>(path: P) -> Result<Vec<PaddedImage>> {
    pad_zeros(&IdxArray::read(path)?)
}

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Padded image as a 2D array of floats.
    pub image: PaddedImage,

    /// Label of the image.
    pub label: u8,
}

/// Padded MNIST images paired with their labels, kept in memory.
pub struct MnistDataset {
    dataset: InMemDataset<MnistItem>,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Pairs images with labels, sample `i` of one with sample `i` of the other.
    pub fn new(images: Vec<PaddedImage>, labels: Vec<u8>) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }

        let items = images
            .into_iter()
            .zip(labels)
            .map(|(image, label)| MnistItem { image, label })
            .collect();

        Ok(Self {
            dataset: InMemDataset::new(items),
        })
    }

    /// Loads an images file and its matching labels file.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(images_path: P, labels_path: Q) -> Result<Self> {
        let images = IdxArray::read(images_path.as_ref())?;
        let labels = IdxArray::read(labels_path.as_ref())?;
        if images.len() != labels.len() {
            return Err(Error::ShapeMismatch(format!(
                "`{}` holds {} images but `{}` holds {} labels",
                images_path.as_ref().display(),
                images.len(),
                labels_path.as_ref().display(),
                labels.len()
            )));
        }

        let dataset = Self::new(pad_zeros(&images)?, read_labels(&labels)?)?;
        log::info!(
            "Loaded {} samples from {}",
            dataset.len(),
            images_path.as_ref().display()
        );
        Ok(dataset)
    }
}

/// Stacks padded images into a `[N, 1, 32, 32]` tensor.
pub fn images_to_tensor<B: Backend>(images: &[PaddedImage], device: &B::Device) -> Tensor<B, 4> {
    let pixels: Vec<f32> = images
        .iter()
        .flat_map(|image| image.iter().flatten().copied())
        .collect();
    let data = TensorData::new(pixels, [images.len(), 1, PADDED_SIDE, PADDED_SIDE]);

    Tensor::from_data(data, device)
}

pub fn labels_to_tensor<B: Backend>(labels: &[u8], device: &B::Device) -> Tensor<B, 1, Int> {
    let num_labels = labels.len();
    let labels: Vec<i64> = labels.iter().map(|label| *label as i64).collect();
    let data = TensorData::new(labels, [num_labels]);

    Tensor::from_data(data, device)
}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// Images with shape `[batch_size, 1, 32, 32]`.
    pub images: Tensor<B, 4>,
    /// Class of every image, absent for prediction batches.
    pub targets: Option<Tensor<B, 1, Int>>,
}

impl<B: Backend> MnistBatch<B> {
    pub fn unlabeled(images: Tensor<B, 4>) -> Self {
        Self {
            images,
            targets: None,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

#[derive(Clone, Debug)]
pub struct MnistBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<MnistItem, MnistBatch<B>> for MnistBatcher<B> {
    fn batch(&self, items: Vec<MnistItem>) -> MnistBatch<B> {
        let images: Vec<PaddedImage> = items.iter().map(|item| item.image).collect();
        let labels: Vec<u8> = items.iter().map(|item| item.label).collect();

        MnistBatch {
            images: images_to_tensor(&images, &self.device),
            targets: Some(labels_to_tensor(&labels, &self.device)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn raw_images(count: usize) -> IdxArray {
        let data = (0..count * MNIST_SIDE * MNIST_SIDE)
            .map(|i| (i % 251) as u8 + 1)
            .collect();
        IdxArray::from_u8(vec![count, MNIST_SIDE, MNIST_SIDE], data).unwrap()
    }

    #[test]
    fn pad_zeros_should_keep_pixels_and_zero_the_border() {
        let raw = raw_images(3);
        let pixels = raw.as_u8().unwrap();

        let padded = pad_zeros(&raw).unwrap();

        assert_eq!(padded.len(), 3);
        for (n, image) in padded.iter().enumerate() {
            for y in 0..PADDED_SIDE {
                for x in 0..PADDED_SIDE {
                    let inside = (PADDING..PADDING + MNIST_SIDE).contains(&y)
                        && (PADDING..PADDING + MNIST_SIDE).contains(&x);
                    let expected = if inside {
                        let offset = n * MNIST_SIDE * MNIST_SIDE
                            + (y - PADDING) * MNIST_SIDE
                            + (x - PADDING);
                        pixels[offset] as f32
                    } else {
                        0.0
                    };
                    assert_eq!(image[y][x], expected, "image {n} at ({y}, {x})");
                }
            }
        }
    }

    #[test]
    fn pad_zeros_should_not_normalize() {
        let raw = IdxArray::from_u8(vec![1, MNIST_SIDE, MNIST_SIDE], vec![255; 784]).unwrap();

        let padded = pad_zeros(&raw).unwrap();

        assert_eq!(padded[0][PADDING][PADDING], 255.0);
        assert_eq!(padded[0][PADDED_SIDE - 1][PADDED_SIDE - 1], 0.0);
    }

    #[test]
    fn pad_zeros_should_reject_wrong_shape() {
        let raw = IdxArray::from_u8(vec![2, 32, 32], vec![0; 2 * 32 * 32]).unwrap();

        let err = pad_zeros(&raw).unwrap_err();

        assert!(matches!(err, Error::ShapeMismatch(_)));
        assert!(err.to_string().contains("[2, 32, 32]"));
    }

    #[test]
    fn read_labels_should_reject_out_of_range_classes() {
        let labels = IdxArray::from_u8(vec![3], vec![1, 10, 2]).unwrap();

        assert!(matches!(read_labels(&labels), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn dataset_should_reject_count_mismatch() {
        let images = pad_zeros(&raw_images(2)).unwrap();

        let result = MnistDataset::new(images, vec![1, 2, 3]);

        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn dataset_should_keep_sample_order() {
        let images = pad_zeros(&raw_images(3)).unwrap();
        let dataset = MnistDataset::new(images.clone(), vec![4, 5, 6]).unwrap();

        assert_eq!(dataset.len(), 3);
        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 5);
        assert_eq!(item.image, images[1]);
    }

    #[test]
    fn batcher_should_build_channel_first_batch() {
        let images = pad_zeros(&raw_images(2)).unwrap();
        let items = images
            .iter()
            .zip([7, 3])
            .map(|(image, label)| MnistItem {
                image: *image,
                label,
            })
            .collect();

        let batch = MnistBatcher::<TestBackend>::new(Default::default()).batch(items);

        assert_eq!(batch.images.dims(), [2, 1, PADDED_SIDE, PADDED_SIDE]);
        assert_eq!(batch.batch_size(), 2);
        let targets = batch
            .targets
            .unwrap()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(targets, vec![7, 3]);
        let pixels = batch
            .images
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(pixels[PADDING * PADDED_SIDE + PADDING], images[0][PADDING][PADDING]);
    }
}

use std::io::{BufRead, Seek};

use candle_core::{Device, Tensor};

use crate::{
    batch_generator::{Batch, BatchGenerator},
    error::Result,
    feature_source::FeatureSource,
};

impl Batch {
    pub fn to_tensors(&self, dev: &Device) -> candle_core::Result<(Tensor, Tensor)> {
        let features = Tensor::from_vec(
            self.features.iter().copied().collect::<Vec<f32>>(),
            self.features.dim(),
            dev,
        );
        let targets = Tensor::from_vec(
            self.targets.iter().copied().collect::<Vec<f32>>(),
            self.targets.dim(),
            dev,
        );
        candle_core::error::zip(features, targets)
    }
}

/// Endless `(features, targets)` tensor pairs for a candle training loop.
pub struct TensorBatches<F, R> {
    generator: BatchGenerator<F, R>,
    device: Device,
}

impl<F: FeatureSource, R: BufRead + Seek> TensorBatches<F, R> {
    pub fn new(generator: BatchGenerator<F, R>, device: Device) -> Self {
        Self { generator, device }
    }

    pub fn into_inner(self) -> BatchGenerator<F, R> {
        self.generator
    }
}

impl<F: FeatureSource, R: BufRead + Seek> Iterator for TensorBatches<F, R> {
    type Item = Result<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = match self.generator.next_batch() {
            Ok(batch) => batch,
            Err(e) => return Some(Err(e)),
        };
        Some(batch.to_tensors(&self.device).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn batch_to_tensors_keeps_shape_and_values() {
        let batch = Batch {
            features: array![[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]],
            targets: array![[0.0_f32, 1.5], [1.25, 0.0], [0.5, 0.5]],
        };
        let (xs, ys) = batch.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(xs.dims(), &[3, 2]);
        assert_eq!(ys.dims(), &[3, 2]);
        assert_eq!(
            xs.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]
        );
        assert_eq!(ys.to_vec2::<f32>().unwrap()[1], vec![1.25, 0.0]);
    }

    #[test]
    fn empty_batch_converts() {
        let batch = Batch {
            features: ndarray::Array2::zeros((0, 4)),
            targets: ndarray::Array2::zeros((0, 2)),
        };
        let (xs, ys) = batch.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(xs.dims(), &[0, 4]);
        assert_eq!(ys.dims(), &[0, 2]);
    }
}

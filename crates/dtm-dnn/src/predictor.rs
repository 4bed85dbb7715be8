use std::path::PathBuf;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use dtm_image::{DepthGrid, IntensityGrid};

use crate::{
    checkpoint::{load_state_dict, strip_key_prefix, TRAINING_PREFIX_LEN},
    error::DnnError,
    glpdepth::{GlpDepth, GlpDepthConfig},
};

/// Trait for models that estimate an elevation grid from an intensity grid.
///
/// Implementations are immutable once built and can be shared between threads.
pub trait DepthPredictor: Send + Sync {
    /// Estimate the depth of every pixel of the image.
    ///
    /// # Arguments
    ///
    /// * `image` - The intensity grid with values in `[0, 1]`.
    ///
    /// # Returns
    ///
    /// A depth grid with the same size as the image.
    fn predict(&self, image: &IntensityGrid) -> Result<DepthGrid, DnnError>;
}

/// Builder for the GLPDepth predictor.
pub struct GlpDepthPredictorBuilder {
    /// Path to the trained weights.
    pub weights_path: PathBuf,
    /// The network hyper-parameters.
    pub config: GlpDepthConfig,
    /// The device to run on. Picks CUDA when available if unset.
    pub device: Option<Device>,
}

impl GlpDepthPredictorBuilder {
    /// Creates a new `GlpDepthPredictorBuilder` with the MiT-b4 configuration.
    ///
    /// # Arguments
    ///
    /// * `weights_path` - Path to a PyTorch checkpoint or a safetensors file.
    pub fn new(weights_path: impl Into<PathBuf>) -> Self {
        Self {
            weights_path: weights_path.into(),
            config: GlpDepthConfig::default(),
            device: None,
        }
    }

    /// Sets the network hyper-parameters.
    pub fn with_config(mut self, config: GlpDepthConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the device to run the network on.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Loads the weights and builds the predictor.
    ///
    /// The first characters of every parameter name are dropped to remove the
    /// prefix added at training time.
    ///
    /// # Errors
    ///
    /// Fails if the weights cannot be read or do not match the configuration.
    pub fn build(self) -> Result<GlpDepthPredictor, DnnError> {
        let device = match self.device {
            Some(device) => device,
            None => match Device::cuda_if_available(0) {
                Ok(device) => device,
                Err(e) => {
                    log::warn!("Failed to use CUDA, using CPU instead: {}", e);
                    Device::Cpu
                }
            },
        };

        let tensors = load_state_dict(&self.weights_path, &device)?;
        let tensors = strip_key_prefix(tensors, TRAINING_PREFIX_LEN)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let model = GlpDepth::new(&self.config, vb)?;

        log::info!(
            "Loaded GLPDepth weights from {} on {:?}",
            self.weights_path.display(),
            device
        );

        Ok(GlpDepthPredictor { model, device })
    }
}

/// Depth predictor backed by a GLPDepth network.
pub struct GlpDepthPredictor {
    model: GlpDepth,
    device: Device,
}

impl GlpDepthPredictor {
    /// Creates a predictor from an already built network.
    pub fn new(model: GlpDepth, device: Device) -> Self {
        Self { model, device }
    }

    /// The device the network runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl DepthPredictor for GlpDepthPredictor {
    fn predict(&self, image: &IntensityGrid) -> Result<DepthGrid, DnnError> {
        let (rows, cols) = (image.height(), image.width());

        // (1, 1, h, w) in [0, 1], no normalization
        let input = Tensor::from_slice(image.as_slice(), (1, 1, rows, cols), &self.device)?;
        let output = self.model.forward(&input)?;

        let dims = output.dims().to_vec();
        if dims.iter().product::<usize>() != rows * cols || dims.last() != Some(&cols) {
            return Err(DnnError::OutputShape {
                expected_rows: rows,
                expected_cols: cols,
                actual: dims,
            });
        }

        let data = output
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;

        Ok(DepthGrid::new(image.size(), data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use dtm_image::ImageSize;
    use std::collections::HashMap;

    fn tiny_config() -> GlpDepthConfig {
        GlpDepthConfig {
            in_channels: 1,
            embed_dims: [8, 16, 24, 32],
            num_heads: [1, 1, 2, 2],
            depths: [1, 1, 1, 1],
            sr_ratios: [8, 4, 2, 1],
            mlp_ratio: 4,
            max_depth: 700.0,
        }
    }

    fn test_image() -> IntensityGrid {
        IntensityGrid::from_fn(
            ImageSize {
                width: 64,
                height: 64,
            },
            |row, col| ((row * 64 + col) % 255) as f32 / 255.0,
        )
    }

    #[test]
    fn test_predict_shape_and_range() -> Result<(), DnnError> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let predictor = GlpDepthPredictor::new(GlpDepth::new(&tiny_config(), vb)?, Device::Cpu);

        let depth = predictor.predict(&test_image())?;
        assert_eq!(depth.size(), test_image().size());
        assert!(depth.as_slice().iter().all(|d| (0.0..=700.0).contains(d)));
        Ok(())
    }

    #[test]
    fn test_predict_rejects_unaligned_size() -> Result<(), DnnError> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let predictor = GlpDepthPredictor::new(GlpDepth::new(&tiny_config(), vb)?, Device::Cpu);

        // the skip connections no longer line up when the size is not a multiple of 32
        let image = IntensityGrid::from_size_val(
            ImageSize {
                width: 40,
                height: 40,
            },
            0.5,
        );
        assert!(predictor.predict(&image).is_err());
        Ok(())
    }

    #[test]
    fn test_builder_loads_prefixed_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let reference = GlpDepthPredictor::new(GlpDepth::new(&tiny_config(), vb)?, Device::Cpu);

        // store the parameters the way the training code names them
        let tensors = {
            let data = varmap
                .data()
                .lock()
                .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
            data.iter()
                .map(|(name, var)| (format!("model.{name}"), var.as_tensor().clone()))
                .collect::<HashMap<_, _>>()
        };
        assert!(tensors.keys().all(|k| k.len() > TRAINING_PREFIX_LEN));

        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("best_model.safetensors");
        candle_core::safetensors::save(&tensors, &path)?;

        let predictor = GlpDepthPredictorBuilder::new(&path)
            .with_config(tiny_config())
            .with_device(Device::Cpu)
            .build()?;

        let image = test_image();
        let expected = reference.predict(&image)?;
        let actual = predictor.predict(&image)?;
        for (a, e) in actual.as_slice().iter().zip(expected.as_slice()) {
            approx::assert_relative_eq!(*a, *e, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_builder_missing_weights() {
        let res = GlpDepthPredictorBuilder::new("pretrained/missing.ckpt")
            .with_config(tiny_config())
            .with_device(Device::Cpu)
            .build();
        assert!(matches!(res, Err(DnnError::WeightsNotFound(_))));
    }
}

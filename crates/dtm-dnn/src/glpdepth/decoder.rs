use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, VarBuilder};

fn conv3x3(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    candle_nn::conv2d(in_channels, out_channels, 3, cfg, vb)
}

fn conv1x1(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv2d> {
    candle_nn::conv2d(in_channels, out_channels, 1, Default::default(), vb)
}

// the (2n, n) matrix of a bilinear x2 resampling with half pixel centers
fn upsample_matrix(n: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; 2 * n * n];
    for dst in 0..2 * n {
        let src = ((dst as f32 + 0.5) / 2.0 - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(n - 1);
        let i1 = (i0 + 1).min(n - 1);
        let lambda = src - i0 as f32;
        data[dst * n + i0] += 1.0 - lambda;
        data[dst * n + i1] += lambda;
    }
    Tensor::from_vec(data, (2 * n, n), device)
}

/// Upsample a `(b, c, h, w)` tensor by two with bilinear interpolation.
///
/// Matches the `align_corners = false` convention: output pixel centers are
/// mapped back to the input grid and clamped at the borders.
pub fn upsample_bilinear2x(xs: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = xs.dims4()?;
    let device = xs.device();
    let rows = upsample_matrix(h, device)?.to_dtype(xs.dtype())?;
    let cols = upsample_matrix(w, device)?.to_dtype(xs.dtype())?.t()?;
    let xs = xs.contiguous()?.broadcast_matmul(&cols.contiguous()?)?;
    rows.broadcast_matmul(&xs)
}

// gated sum of a skip connection and the upsampled coarse features
struct SelectiveFeatureFusion {
    conv1: (Conv2d, BatchNorm),
    conv2: (Conv2d, BatchNorm),
    conv3: Conv2d,
}

impl SelectiveFeatureFusion {
    fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let half = channels / 2;
        let vb1 = vb.pp("conv1");
        let vb2 = vb.pp("conv2");
        Ok(Self {
            conv1: (
                conv3x3(channels * 2, channels, vb1.pp(0))?,
                candle_nn::batch_norm(channels, 1e-5, vb1.pp(1))?,
            ),
            conv2: (
                conv3x3(channels, half, vb2.pp(0))?,
                candle_nn::batch_norm(half, 1e-5, vb2.pp(1))?,
            ),
            conv3: conv3x3(half, 2, vb.pp("conv3"))?,
        })
    }

    fn forward(&self, local: &Tensor, global: &Tensor) -> Result<Tensor> {
        let xs = Tensor::cat(&[local, global], 1)?;
        let xs = self.conv1.0.forward(&xs)?.apply_t(&self.conv1.1, false)?.relu()?;
        let xs = self.conv2.0.forward(&xs)?.apply_t(&self.conv2.1, false)?.relu()?;
        let attn = candle_nn::ops::sigmoid(&self.conv3.forward(&xs)?)?;

        let local_weight = attn.narrow(1, 0, 1)?;
        let global_weight = attn.narrow(1, 1, 1)?;
        local.broadcast_mul(&local_weight)? + global.broadcast_mul(&global_weight)?
    }
}

/// The GLPDepth decoder.
///
/// The coarsest features are projected and progressively upsampled, fused
/// with the skip connections of the finer stages, and brought back to the
/// input resolution.
pub struct Decoder {
    bot_conv: Conv2d,
    skip_conv1: Conv2d,
    skip_conv2: Conv2d,
    fusion1: SelectiveFeatureFusion,
    fusion2: SelectiveFeatureFusion,
    fusion3: SelectiveFeatureFusion,
}

impl Decoder {
    /// Build the decoder.
    ///
    /// # Arguments
    ///
    /// * `in_channels` - The channels of the fourth, third and second encoder stages.
    /// * `out_channels` - The channels of the decoder, equal to those of the first stage.
    /// * `vb` - The parameters of the decoder.
    pub fn new(in_channels: [usize; 3], out_channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            bot_conv: conv1x1(in_channels[0], out_channels, vb.pp("bot_conv"))?,
            skip_conv1: conv1x1(in_channels[1], out_channels, vb.pp("skip_conv1"))?,
            skip_conv2: conv1x1(in_channels[2], out_channels, vb.pp("skip_conv2"))?,
            fusion1: SelectiveFeatureFusion::new(out_channels, vb.pp("fusion1"))?,
            fusion2: SelectiveFeatureFusion::new(out_channels, vb.pp("fusion2"))?,
            fusion3: SelectiveFeatureFusion::new(out_channels, vb.pp("fusion3"))?,
        })
    }

    /// Decode the four encoder feature maps, from the finest to the coarsest.
    pub fn forward(&self, x1: &Tensor, x2: &Tensor, x3: &Tensor, x4: &Tensor) -> Result<Tensor> {
        let out = upsample_bilinear2x(&self.bot_conv.forward(x4)?)?;
        let out = self.fusion1.forward(&self.skip_conv1.forward(x3)?, &out)?;
        let out = upsample_bilinear2x(&out)?;
        let out = self.fusion2.forward(&self.skip_conv2.forward(x2)?, &out)?;
        let out = upsample_bilinear2x(&out)?;
        let out = self.fusion3.forward(x1, &out)?;
        let out = upsample_bilinear2x(&out)?;
        upsample_bilinear2x(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::DType;

    #[test]
    fn test_upsample_constant() -> Result<()> {
        let xs = Tensor::ones((1, 2, 3, 4), DType::F32, &Device::Cpu)?;
        let up = upsample_bilinear2x(&xs)?;
        assert_eq!(up.dims4()?, (1, 2, 6, 8));
        for v in up.flatten_all()?.to_vec1::<f32>()? {
            assert_relative_eq!(v, 1.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_upsample_half_pixel_centers() -> Result<()> {
        // a single row [0, 1] upsamples to [0, 0.25, 0.75, 1]
        let xs = Tensor::new(&[0f32, 1.0], &Device::Cpu)?.reshape((1, 1, 1, 2))?;
        let up = upsample_bilinear2x(&xs)?;
        assert_eq!(up.dims4()?, (1, 1, 2, 4));
        let values = up.flatten_all()?.to_vec1::<f32>()?;
        let expected = [0.0, 0.25, 0.75, 1.0, 0.0, 0.25, 0.75, 1.0];
        for (v, e) in values.iter().zip(expected) {
            assert_relative_eq!(*v, e, epsilon = 1e-6);
        }
        Ok(())
    }
}

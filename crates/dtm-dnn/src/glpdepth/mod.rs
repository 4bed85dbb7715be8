//! # GLPDepth
//!
//! Global-Local Path network for monocular depth estimation with a Mix
//! Transformer encoder. The head maps the decoded features to a depth in
//! `(0, max_depth)` through a sigmoid.

mod decoder;
mod encoder;

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use serde::{Deserialize, Serialize};

pub use decoder::{upsample_bilinear2x, Decoder};
pub use encoder::MixTransformer;

/// The hyper-parameters of a GLPDepth network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlpDepthConfig {
    /// The number of channels of the input image.
    pub in_channels: usize,
    /// The channels of the four encoder stages.
    pub embed_dims: [usize; 4],
    /// The number of attention heads of each stage.
    pub num_heads: [usize; 4],
    /// The number of transformer blocks of each stage.
    pub depths: [usize; 4],
    /// The spatial reduction of the keys and values of each stage.
    pub sr_ratios: [usize; 4],
    /// The ratio between the hidden and the embedding size of the feed forward layers.
    pub mlp_ratio: usize,
    /// The largest depth the network can predict.
    pub max_depth: f64,
}

impl GlpDepthConfig {
    /// The MiT-b4 encoder on single channel images with depths up to 700.
    pub fn mit_b4() -> Self {
        Self {
            in_channels: 1,
            embed_dims: [64, 128, 320, 512],
            num_heads: [1, 2, 5, 8],
            depths: [3, 8, 27, 3],
            sr_ratios: [8, 4, 2, 1],
            mlp_ratio: 4,
            max_depth: 700.0,
        }
    }
}

impl Default for GlpDepthConfig {
    fn default() -> Self {
        Self::mit_b4()
    }
}

/// The GLPDepth network.
pub struct GlpDepth {
    encoder: MixTransformer,
    decoder: Decoder,
    head: (Conv2d, Conv2d),
    max_depth: f64,
}

impl GlpDepth {
    /// Build the network from the parameters under `vb`.
    ///
    /// Parameters are looked up with the names of the reference implementation,
    /// for example `encoder.block1.0.attn.q.weight` or `decoder.fusion1.conv1.0.weight`.
    ///
    /// # Errors
    ///
    /// Fails if a parameter is missing or has an unexpected shape.
    pub fn new(config: &GlpDepthConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = MixTransformer::new(config, vb.pp("encoder"))?;

        let [c1, c2, c3, c4] = config.embed_dims;
        let decoder = Decoder::new([c4, c3, c2], c1, vb.pp("decoder"))?;

        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let vb_head = vb.pp("last_layer_depth");
        let head = (
            candle_nn::conv2d(c1, c1, 3, cfg, vb_head.pp(0))?,
            candle_nn::conv2d(c1, 1, 3, cfg, vb_head.pp(2))?,
        );

        Ok(Self {
            encoder,
            decoder,
            head,
            max_depth: config.max_depth,
        })
    }

    /// The largest depth the network can predict.
    pub fn max_depth(&self) -> f64 {
        self.max_depth
    }
}

impl Module for GlpDepth {
    /// Predict a `(b, 1, h, w)` depth map from a `(b, c, h, w)` image.
    ///
    /// The height and the width must be multiples of 32.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.encoder.forward(xs)?;
        let [x1, x2, x3, x4] = features.as_slice() else {
            candle_core::bail!("expected 4 encoder stages, got {}", features.len())
        };

        let out = self.decoder.forward(x1, x2, x3, x4)?;
        let out = self.head.0.forward(&out)?.relu()?;
        let out = self.head.1.forward(&out)?;

        candle_nn::ops::sigmoid(&out)? * self.max_depth
    }
}

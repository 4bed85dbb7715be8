use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, LayerNorm, Linear, VarBuilder};

use super::GlpDepthConfig;

// overlapping strided convolution followed by a layer norm over the channels
struct OverlapPatchEmbed {
    proj: Conv2d,
    norm: LayerNorm,
}

impl OverlapPatchEmbed {
    fn new(
        in_channels: usize,
        embed_dim: usize,
        patch_size: usize,
        stride: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: patch_size / 2,
            stride,
            ..Default::default()
        };
        Ok(Self {
            proj: candle_nn::conv2d(in_channels, embed_dim, patch_size, cfg, vb.pp("proj"))?,
            norm: candle_nn::layer_norm(embed_dim, 1e-5, vb.pp("norm"))?,
        })
    }

    // returns the tokens (b, h * w, c) and the spatial size of the patch grid
    fn forward(&self, xs: &Tensor) -> Result<(Tensor, usize, usize)> {
        let xs = self.proj.forward(xs)?;
        let (_, _, h, w) = xs.dims4()?;
        let xs = xs.flatten_from(2)?.transpose(1, 2)?;
        Ok((self.norm.forward(&xs)?, h, w))
    }
}

// multi-head attention with the keys and values taken from a spatially reduced sequence
struct EfficientSelfAttention {
    num_heads: usize,
    scale: f64,
    q: Linear,
    kv: Linear,
    proj: Linear,
    sr: Option<(Conv2d, LayerNorm)>,
}

impl EfficientSelfAttention {
    fn new(dim: usize, num_heads: usize, sr_ratio: usize, vb: VarBuilder) -> Result<Self> {
        let sr = if sr_ratio > 1 {
            let cfg = Conv2dConfig {
                stride: sr_ratio,
                ..Default::default()
            };
            Some((
                candle_nn::conv2d(dim, dim, sr_ratio, cfg, vb.pp("sr"))?,
                candle_nn::layer_norm(dim, 1e-5, vb.pp("norm"))?,
            ))
        } else {
            None
        };

        let head_dim = dim / num_heads;
        Ok(Self {
            num_heads,
            scale: (head_dim as f64).powf(-0.5),
            q: candle_nn::linear(dim, dim, vb.pp("q"))?,
            kv: candle_nn::linear(dim, dim * 2, vb.pp("kv"))?,
            proj: candle_nn::linear(dim, dim, vb.pp("proj"))?,
            sr,
        })
    }

    fn forward(&self, xs: &Tensor, h: usize, w: usize) -> Result<Tensor> {
        let (b, n, c) = xs.dims3()?;
        let head_dim = c / self.num_heads;

        let q = self
            .q
            .forward(xs)?
            .reshape((b, n, self.num_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let reduced = match &self.sr {
            Some((sr, norm)) => {
                let x = xs.transpose(1, 2)?.reshape((b, c, h, w))?;
                let x = sr.forward(&x)?.flatten_from(2)?.transpose(1, 2)?;
                norm.forward(&x)?
            }
            None => xs.clone(),
        };

        // (b, m, 2, heads, head_dim) -> (2, b, heads, m, head_dim)
        let kv = self
            .kv
            .forward(&reduced)?
            .reshape((b, (), 2, self.num_heads, head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let k = kv.get(0)?.contiguous()?;
        let v = kv.get(1)?.contiguous()?;

        let attn = (q.matmul(&k.t()?)? * self.scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;
        let xs = attn.matmul(&v)?.transpose(1, 2)?.reshape((b, n, c))?;

        self.proj.forward(&xs)
    }
}

// feed forward with a depth-wise convolution between the two projections
struct MixFfn {
    fc1: Linear,
    dwconv: Conv2d,
    fc2: Linear,
}

impl MixFfn {
    fn new(dim: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            groups: hidden,
            ..Default::default()
        };
        Ok(Self {
            fc1: candle_nn::linear(dim, hidden, vb.pp("fc1"))?,
            dwconv: candle_nn::conv2d(hidden, hidden, 3, cfg, vb.pp("dwconv").pp("dwconv"))?,
            fc2: candle_nn::linear(hidden, dim, vb.pp("fc2"))?,
        })
    }

    fn forward(&self, xs: &Tensor, h: usize, w: usize) -> Result<Tensor> {
        let xs = self.fc1.forward(xs)?;
        let (b, _, c) = xs.dims3()?;
        let xs = xs.transpose(1, 2)?.reshape((b, c, h, w))?;
        let xs = self.dwconv.forward(&xs)?.flatten_from(2)?.transpose(1, 2)?;
        self.fc2.forward(&xs.gelu_erf()?)
    }
}

struct Block {
    norm1: LayerNorm,
    attn: EfficientSelfAttention,
    norm2: LayerNorm,
    mlp: MixFfn,
}

impl Block {
    fn new(
        dim: usize,
        num_heads: usize,
        mlp_ratio: usize,
        sr_ratio: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            norm1: candle_nn::layer_norm(dim, 1e-6, vb.pp("norm1"))?,
            attn: EfficientSelfAttention::new(dim, num_heads, sr_ratio, vb.pp("attn"))?,
            norm2: candle_nn::layer_norm(dim, 1e-6, vb.pp("norm2"))?,
            mlp: MixFfn::new(dim, dim * mlp_ratio, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor, h: usize, w: usize) -> Result<Tensor> {
        let residual = xs;
        let xs = (residual + self.attn.forward(&self.norm1.forward(xs)?, h, w)?)?;
        let residual = &xs;
        residual + self.mlp.forward(&self.norm2.forward(&xs)?, h, w)?
    }
}

struct Stage {
    patch_embed: OverlapPatchEmbed,
    blocks: Vec<Block>,
    norm: LayerNorm,
}

impl Stage {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (mut tokens, h, w) = self.patch_embed.forward(xs)?;
        for block in &self.blocks {
            tokens = block.forward(&tokens, h, w)?;
        }
        let tokens = self.norm.forward(&tokens)?;
        let (b, _, c) = tokens.dims3()?;
        tokens.transpose(1, 2)?.reshape((b, c, h, w))
    }
}

/// The Mix Transformer encoder.
///
/// Four stages reduce the input resolution by 4, 8, 16 and 32 and return one
/// feature map per stage.
pub struct MixTransformer {
    stages: Vec<Stage>,
}

impl MixTransformer {
    /// Build the encoder from the parameters under `vb`.
    pub fn new(config: &GlpDepthConfig, vb: VarBuilder) -> Result<Self> {
        let mut stages = Vec::with_capacity(4);
        let mut in_channels = config.in_channels;

        for i in 0..4 {
            let dim = config.embed_dims[i];
            let (patch_size, stride) = if i == 0 { (7, 4) } else { (3, 2) };
            let patch_embed = OverlapPatchEmbed::new(
                in_channels,
                dim,
                patch_size,
                stride,
                vb.pp(format!("patch_embed{}", i + 1)),
            )?;

            let vb_blocks = vb.pp(format!("block{}", i + 1));
            let blocks = (0..config.depths[i])
                .map(|j| {
                    Block::new(
                        dim,
                        config.num_heads[i],
                        config.mlp_ratio,
                        config.sr_ratios[i],
                        vb_blocks.pp(j),
                    )
                })
                .collect::<Result<Vec<_>>>()?;

            let norm = candle_nn::layer_norm(dim, 1e-6, vb.pp(format!("norm{}", i + 1)))?;

            stages.push(Stage {
                patch_embed,
                blocks,
                norm,
            });
            in_channels = dim;
        }

        Ok(Self { stages })
    }

    /// Compute the feature maps of the four stages, from the finest to the coarsest.
    pub fn forward(&self, xs: &Tensor) -> Result<Vec<Tensor>> {
        let mut features = Vec::with_capacity(self.stages.len());
        let mut xs = xs.clone();
        for stage in &self.stages {
            xs = stage.forward(&xs)?;
            features.push(xs.clone());
        }
        Ok(features)
    }
}

//! Conditioning embedders
//!
//! Turn raw diffusion timesteps, class labels and image-size conditions into
//! fixed-width vectors, one per batch element. The adaptive norm layers only
//! depend on the declared output width of these modules.
//!
//! - [`Timesteps`] - sinusoidal timestep projection (no parameters)
//! - [`TimestepEmbedding`] - two-layer MLP over the projection
//! - [`LabelEmbedding`] - class label table with an extra "null" row for
//!   classifier-free guidance
//! - [`CombinedTimestepLabelEmbeddings`] - timestep + class (DiT)
//! - [`CombinedTimestepSizeEmbeddings`] - timestep + resolution/aspect ratio
//!   (PixArt-α)

use burn::module::Ignored;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::{DType, ElementConversion};

use crate::activation::silu;
use crate::error::NormError;

/// Width of the sinusoidal projection fed to the timestep MLPs
pub const TIMESTEP_PROJ_DIM: usize = 256;

/// Sinusoidal timestep projection
///
/// ```text
/// freq_i = exp(-ln(max_period) * i / (half - downscale_freq_shift))
/// emb = [sin(t * freq), cos(t * freq)]    (or [cos, sin] when flipped)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timesteps {
    pub num_channels: usize,
    pub flip_sin_to_cos: bool,
    pub downscale_freq_shift: f64,
    pub scale: f64,
    pub max_period: f64,
}

impl Timesteps {
    pub fn new(num_channels: usize, flip_sin_to_cos: bool, downscale_freq_shift: f64) -> Self {
        Self {
            num_channels,
            flip_sin_to_cos,
            downscale_freq_shift,
            scale: 1.0,
            max_period: 10000.0,
        }
    }

    /// Projects timesteps [batch] to [batch, num_channels]
    pub fn forward<B: Backend>(&self, timesteps: Tensor<B, 1>) -> Tensor<B, 2> {
        let device = timesteps.device();
        let [batch] = timesteps.dims();
        let half = self.num_channels / 2;

        let denom = half as f64 - self.downscale_freq_shift;
        let freqs: Vec<f32> = (0..half)
            .map(|i| (-self.max_period.ln() * i as f64 / denom).exp() as f32)
            .collect();
        let freqs = Tensor::<B, 1>::from_floats(freqs.as_slice(), &device);

        // [batch, half]
        let args = timesteps.unsqueeze_dim::<2>(1) * freqs.unsqueeze_dim(0) * self.scale;
        let (sin, cos) = (args.clone().sin(), args.cos());

        let mut parts = if self.flip_sin_to_cos {
            vec![cos, sin]
        } else {
            vec![sin, cos]
        };
        if self.num_channels % 2 == 1 {
            parts.push(Tensor::zeros([batch, 1], &device));
        }
        Tensor::cat(parts, 1)
    }
}

/// Two-layer MLP applied to a sinusoidal projection: linear -> SiLU -> linear
#[derive(Module, Debug)]
pub struct TimestepEmbedding<B: Backend> {
    pub linear_1: Linear<B>,
    pub linear_2: Linear<B>,
}

impl<B: Backend> TimestepEmbedding<B> {
    pub fn new(in_channels: usize, time_embed_dim: usize, device: &B::Device) -> Self {
        Self {
            linear_1: LinearConfig::new(in_channels, time_embed_dim).init(device),
            linear_2: LinearConfig::new(time_embed_dim, time_embed_dim).init(device),
        }
    }

    pub fn forward(&self, sample: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = silu(self.linear_1.forward(sample));
        self.linear_2.forward(x)
    }
}

/// Class label embedding table
///
/// With a positive dropout probability the table gets one extra row at
/// index `num_classes`, used as the unconditional label.
#[derive(Module, Debug)]
pub struct LabelEmbedding<B: Backend> {
    pub embedding_table: Embedding<B>,
    pub num_classes: usize,
    pub dropout_prob: f64,
}

impl<B: Backend> LabelEmbedding<B> {
    pub fn new(num_classes: usize, hidden_size: usize, dropout_prob: f64, device: &B::Device) -> Self {
        let use_cfg_embedding = usize::from(dropout_prob > 0.0);
        Self {
            embedding_table: EmbeddingConfig::new(num_classes + use_cfg_embedding, hidden_size)
                .init(device),
            num_classes,
            dropout_prob,
        }
    }

    /// Number of rows in the table, including the unconditional row
    pub fn table_size(&self) -> usize {
        self.num_classes + usize::from(self.dropout_prob > 0.0)
    }

    /// Embeds labels [batch] to [batch, hidden_size]
    pub fn forward(&self, labels: Tensor<B, 1, Int>) -> Result<Tensor<B, 2>, NormError> {
        check_indices(&labels, self.table_size())?;
        Ok(lookup(&self.embedding_table, labels))
    }

    /// Embeds labels, replacing those flagged in `drop_ids` with the
    /// unconditional row
    pub fn forward_with_drop(
        &self,
        labels: Tensor<B, 1, Int>,
        drop_ids: Tensor<B, 1, Bool>,
    ) -> Result<Tensor<B, 2>, NormError> {
        if self.dropout_prob <= 0.0 {
            return Err(NormError::InvalidDimension {
                name: "LabelEmbedding",
                reason: "no unconditional row without a positive dropout probability".into(),
            });
        }
        let labels = labels.mask_fill(drop_ids, self.num_classes as i64);
        self.forward(labels)
    }
}

/// Configuration for [`CombinedTimestepLabelEmbeddings`]
#[derive(Config, Debug)]
pub struct CombinedTimestepLabelEmbeddingsConfig {
    /// Number of class labels
    pub num_classes: usize,
    /// Output embedding width
    pub embedding_dim: usize,
    /// Label dropout used for classifier-free guidance
    #[config(default = 0.1)]
    pub class_dropout_prob: f64,
}

impl CombinedTimestepLabelEmbeddingsConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CombinedTimestepLabelEmbeddings<B> {
        CombinedTimestepLabelEmbeddings {
            time_proj: Ignored(Timesteps::new(TIMESTEP_PROJ_DIM, true, 1.0)),
            timestep_embedder: TimestepEmbedding::new(TIMESTEP_PROJ_DIM, self.embedding_dim, device),
            class_embedder: LabelEmbedding::new(
                self.num_classes,
                self.embedding_dim,
                self.class_dropout_prob,
                device,
            ),
        }
    }
}

/// Timestep + class label conditioning, summed (DiT)
#[derive(Module, Debug)]
pub struct CombinedTimestepLabelEmbeddings<B: Backend> {
    pub time_proj: Ignored<Timesteps>,
    pub timestep_embedder: TimestepEmbedding<B>,
    pub class_embedder: LabelEmbedding<B>,
}

impl<B: Backend> CombinedTimestepLabelEmbeddings<B> {
    /// # Arguments
    ///
    /// * `timestep` - Diffusion timesteps [batch]
    /// * `class_labels` - Class indices [batch]
    /// * `hidden_dtype` - Precision the projection is cast to before the MLP
    ///
    /// # Returns
    ///
    /// Conditioning [batch, embedding_dim]
    pub fn forward(
        &self,
        timestep: Tensor<B, 1>,
        class_labels: Tensor<B, 1, Int>,
        hidden_dtype: Option<DType>,
    ) -> Result<Tensor<B, 2>, NormError> {
        let timesteps_proj = cast_to(self.time_proj.forward(timestep), hidden_dtype);
        let timesteps_emb = self.timestep_embedder.forward(timesteps_proj);
        let class_emb = self.class_embedder.forward(class_labels)?;

        Ok(timesteps_emb + class_emb)
    }
}

/// Optional size conditions for [`CombinedTimestepSizeEmbeddings`]
#[derive(Debug, Clone)]
pub struct AddedConditions<B: Backend> {
    /// Image height and width [batch, 2]
    pub resolution: Option<Tensor<B, 2>>,
    /// Aspect ratio [batch, 1]
    pub aspect_ratio: Option<Tensor<B, 2>>,
}

impl<B: Backend> AddedConditions<B> {
    pub fn new(resolution: Tensor<B, 2>, aspect_ratio: Tensor<B, 2>) -> Self {
        Self {
            resolution: Some(resolution),
            aspect_ratio: Some(aspect_ratio),
        }
    }
}

impl<B: Backend> Default for AddedConditions<B> {
    fn default() -> Self {
        Self {
            resolution: None,
            aspect_ratio: None,
        }
    }
}

/// Configuration for [`CombinedTimestepSizeEmbeddings`]
#[derive(Config, Debug)]
pub struct CombinedTimestepSizeEmbeddingsConfig {
    /// Output embedding width
    pub embedding_dim: usize,
    /// Width of each size embedding (resolution gets two, aspect ratio one)
    pub size_emb_dim: usize,
    /// Whether resolution and aspect ratio are embedded
    #[config(default = false)]
    pub use_additional_conditions: bool,
}

impl CombinedTimestepSizeEmbeddingsConfig {
    /// Fails if additional conditions are enabled and
    /// `3 * size_emb_dim != embedding_dim`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<CombinedTimestepSizeEmbeddings<B>, NormError> {
        if self.use_additional_conditions && 3 * self.size_emb_dim != self.embedding_dim {
            return Err(NormError::InvalidDimension {
                name: "CombinedTimestepSizeEmbeddings",
                reason: format!(
                    "size embeddings (3 x {}) must add up to embedding_dim {}",
                    self.size_emb_dim, self.embedding_dim
                ),
            });
        }

        let size_embedder = || {
            self.use_additional_conditions
                .then(|| TimestepEmbedding::new(TIMESTEP_PROJ_DIM, self.size_emb_dim, device))
        };

        Ok(CombinedTimestepSizeEmbeddings {
            time_proj: Ignored(Timesteps::new(TIMESTEP_PROJ_DIM, true, 0.0)),
            timestep_embedder: TimestepEmbedding::new(TIMESTEP_PROJ_DIM, self.embedding_dim, device),
            resolution_embedder: size_embedder(),
            aspect_ratio_embedder: size_embedder(),
        })
    }
}

/// Timestep conditioning with optional resolution/aspect-ratio terms
/// (PixArt-α micro-conditioning)
#[derive(Module, Debug)]
pub struct CombinedTimestepSizeEmbeddings<B: Backend> {
    pub time_proj: Ignored<Timesteps>,
    pub timestep_embedder: TimestepEmbedding<B>,
    pub resolution_embedder: Option<TimestepEmbedding<B>>,
    pub aspect_ratio_embedder: Option<TimestepEmbedding<B>>,
}

impl<B: Backend> CombinedTimestepSizeEmbeddings<B> {
    pub fn uses_additional_conditions(&self) -> bool {
        self.resolution_embedder.is_some()
    }

    /// # Arguments
    ///
    /// * `timestep` - Diffusion timesteps [batch]
    /// * `added` - Resolution and aspect ratio, required when enabled
    /// * `batch_size` - Batch size the size embeddings are regrouped into
    /// * `hidden_dtype` - Precision the projections are cast to before the MLPs
    ///
    /// # Returns
    ///
    /// Conditioning [batch, embedding_dim]
    pub fn forward(
        &self,
        timestep: Tensor<B, 1>,
        added: AddedConditions<B>,
        batch_size: usize,
        hidden_dtype: Option<DType>,
    ) -> Result<Tensor<B, 2>, NormError> {
        let timesteps_proj = cast_to(self.time_proj.forward(timestep), hidden_dtype);
        let timesteps_emb = self.timestep_embedder.forward(timesteps_proj);

        let (Some(resolution_embedder), Some(aspect_ratio_embedder)) =
            (&self.resolution_embedder, &self.aspect_ratio_embedder)
        else {
            return Ok(timesteps_emb);
        };

        let resolution = added
            .resolution
            .ok_or(NormError::MissingConditioning("resolution"))?;
        let aspect_ratio = added
            .aspect_ratio
            .ok_or(NormError::MissingConditioning("aspect_ratio"))?;

        let resolution_emb =
            self.embed_size(resolution_embedder, resolution, batch_size, hidden_dtype);
        let aspect_ratio_emb =
            self.embed_size(aspect_ratio_embedder, aspect_ratio, batch_size, hidden_dtype);

        Ok(timesteps_emb + Tensor::cat(vec![resolution_emb, aspect_ratio_emb], 1))
    }

    /// Embeds every scalar of `values` [batch, n] and regroups to
    /// [batch_size, n * size_emb_dim]
    fn embed_size(
        &self,
        embedder: &TimestepEmbedding<B>,
        values: Tensor<B, 2>,
        batch_size: usize,
        hidden_dtype: Option<DType>,
    ) -> Tensor<B, 2> {
        let [batch, n] = values.dims();
        let proj = self.time_proj.forward(values.reshape([batch * n]));
        let emb = embedder.forward(cast_to(proj, hidden_dtype));
        emb.reshape([batch_size as i32, -1])
    }
}

/// Looks up rows for indices [batch], returning [batch, dim]
pub(crate) fn lookup<B: Backend>(table: &Embedding<B>, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
    let [batch] = indices.dims();
    let emb = table.forward(indices.unsqueeze_dim(1));
    let [_, _, dim] = emb.dims();
    emb.reshape([batch, dim])
}

/// Rejects indices outside `0..size`
pub(crate) fn check_indices<B: Backend>(
    indices: &Tensor<B, 1, Int>,
    size: usize,
) -> Result<(), NormError> {
    if indices.dims()[0] == 0 {
        return Ok(());
    }

    let min = indices.clone().min().into_scalar().elem::<i64>();
    let max = indices.clone().max().into_scalar().elem::<i64>();
    for index in [min, max] {
        if index < 0 || index as u64 >= size as u64 {
            return Err(NormError::IndexOutOfRange { index, size });
        }
    }
    Ok(())
}

pub(crate) fn cast_to<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    dtype: Option<DType>,
) -> Tensor<B, D> {
    match dtype {
        Some(dtype) => x.cast(dtype),
        None => x,
    }
}

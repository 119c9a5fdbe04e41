//! Adaptive layer norm (AdaLN) for diffusion transformers
//!
//! Layer norms whose scale and shift are predicted from a conditioning
//! signal instead of being learned per channel:
//!
//! - [`AdaLayerNorm`] - timestep index -> embedding table -> scale/shift
//! - [`AdaLayerNormZero`] - DiT adaLN-Zero, six modulation terms
//! - [`AdaLayerNormSingle`] - PixArt-α adaLN-single, one projection shared
//!   by every block
//!
//! # References
//!
//! - [Scalable Diffusion Models with Transformers](https://arxiv.org/abs/2212.09748)
//! - [PixArt-α](https://arxiv.org/abs/2310.00426), Section 2.3

use burn::nn::{Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::DType;

use crate::activation::silu;
use crate::embeddings::{
    check_indices, lookup, AddedConditions, CombinedTimestepLabelEmbeddings,
    CombinedTimestepLabelEmbeddingsConfig, CombinedTimestepSizeEmbeddings,
    CombinedTimestepSizeEmbeddingsConfig,
};
use crate::error::NormError;
use crate::layernorm::{LayerNorm, LayerNormConfig};
use crate::modulation::{modulate, split_pair, AdaLnZeroParams};

/// Layer norm epsilon used by adaLN-Zero
pub const ADALN_ZERO_EPS: f64 = 1e-6;

fn projection(d_input: usize, d_output: usize, zero_init: bool) -> LinearConfig {
    let config = LinearConfig::new(d_input, d_output).with_bias(true);
    if zero_init {
        config.with_initializer(Initializer::Zeros)
    } else {
        config
    }
}

/// Configuration for [`AdaLayerNorm`]
#[derive(Config, Debug)]
pub struct AdaLayerNormConfig {
    /// Hidden dimension (also the timestep embedding width)
    pub embedding_dim: usize,
    /// Number of rows in the timestep embedding table
    pub num_embeddings: usize,
}

impl AdaLayerNormConfig {
    /// Initialize the module
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AdaLayerNorm<B>, NormError> {
        let norm = LayerNormConfig::new(self.embedding_dim)
            .with_elementwise_affine(false)
            .init(device)?;

        tracing::debug!(
            embedding_dim = self.embedding_dim,
            num_embeddings = self.num_embeddings,
            "initialized AdaLayerNorm"
        );

        Ok(AdaLayerNorm {
            emb: EmbeddingConfig::new(self.num_embeddings, self.embedding_dim).init(device),
            // Predict scale and shift (2 * embedding_dim)
            linear: projection(self.embedding_dim, self.embedding_dim * 2, false).init(device),
            norm,
            num_embeddings: self.num_embeddings,
        })
    }
}

/// Adaptive Layer Norm conditioned on a timestep index
///
/// Computes: y = LayerNorm(x) * (1 + scale) + shift
/// where `(scale, shift) = linear(silu(emb[timestep]))`.
#[derive(Module, Debug)]
pub struct AdaLayerNorm<B: Backend> {
    /// Timestep embedding table
    pub emb: Embedding<B>,
    /// Linear to predict scale and shift from the embedding
    pub linear: Linear<B>,
    /// Layer norm without learned affine
    pub norm: LayerNorm<B>,
    pub num_embeddings: usize,
}

impl<B: Backend> AdaLayerNorm<B> {
    /// Forward pass with conditioning
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq_len, embedding_dim]
    /// * `timestep` - Timestep indices [batch], each below `num_embeddings`
    ///
    /// # Returns
    ///
    /// Modulated output [batch, seq_len, embedding_dim]
    pub fn forward(&self, x: Tensor<B, 3>, timestep: Tensor<B, 1, Int>) -> Result<Tensor<B, 3>, NormError> {
        check_indices(&timestep, self.num_embeddings)?;

        let emb = self.linear.forward(silu(lookup(&self.emb, timestep)));
        let (scale, shift) = split_pair(emb);

        Ok(modulate(self.norm.forward(x), scale, shift))
    }
}

/// Where [`AdaLayerNormZero`] gets its conditioning vector from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditioningSource {
    /// Embeds timestep and class labels with an owned embedder
    OwnsEmbedder,
    /// Expects the caller to pass a precomputed embedding
    ExpectsEmbedding,
}

/// Conditioning passed to [`AdaLayerNormZero::forward`]
///
/// Must match the layer's [`ConditioningSource`].
#[derive(Debug, Clone)]
pub enum ZeroConditioning<B: Backend> {
    /// Raw inputs for the owned embedder
    Labels {
        /// Diffusion timesteps [batch]
        timestep: Tensor<B, 1>,
        /// Class indices [batch]
        class_labels: Tensor<B, 1, Int>,
        /// Precision of the embedder's hidden projection
        hidden_dtype: Option<DType>,
    },
    /// Precomputed conditioning [batch, embedding_dim]
    Embedding(Tensor<B, 2>),
}

/// Configuration for [`AdaLayerNormZero`]
#[derive(Config, Debug)]
pub struct AdaLayerNormZeroConfig {
    /// Hidden dimension
    pub embedding_dim: usize,
    /// Number of class labels; when set the layer owns a timestep + label
    /// embedder
    pub num_embeddings: Option<usize>,
    /// Zero-initialize the projection so every gate starts at zero
    #[config(default = false)]
    pub zero_init: bool,
}

impl AdaLayerNormZeroConfig {
    /// Initialize the module
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AdaLayerNormZero<B>, NormError> {
        let norm = LayerNormConfig::new(self.embedding_dim)
            .with_epsilon(ADALN_ZERO_EPS)
            .with_elementwise_affine(false)
            .init(device)?;
        let emb = self.num_embeddings.map(|num_classes| {
            CombinedTimestepLabelEmbeddingsConfig::new(num_classes, self.embedding_dim).init(device)
        });

        tracing::debug!(
            embedding_dim = self.embedding_dim,
            num_embeddings = ?self.num_embeddings,
            zero_init = self.zero_init,
            "initialized AdaLayerNormZero"
        );

        Ok(AdaLayerNormZero {
            emb,
            // shift, scale, gate for attention and MLP (6 * embedding_dim)
            linear: projection(self.embedding_dim, self.embedding_dim * 6, self.zero_init)
                .init(device),
            norm,
        })
    }
}

/// Output of [`AdaLayerNormZero::forward`]:
/// `(x, gate_msa, shift_mlp, scale_mlp, gate_mlp)`
pub type AdaLayerNormZeroOutput<B> = (Tensor<B, 3>, Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>);

/// AdaLN-Zero: Adaptive Layer Norm with gating
///
/// Predicts six modulation terms from the conditioning. Only the
/// pre-attention shift/scale are applied here; the attention gate and the
/// three MLP-stage terms are returned so the caller can apply them around
/// its own sublayers.
///
/// Computes: y = LayerNorm(x) * (1 + scale_msa) + shift_msa
#[derive(Module, Debug)]
pub struct AdaLayerNormZero<B: Backend> {
    /// Timestep + class embedder, when configured
    pub emb: Option<CombinedTimestepLabelEmbeddings<B>>,
    /// Linear to predict the six modulation terms
    pub linear: Linear<B>,
    /// Layer norm without learned affine (eps 1e-6)
    pub norm: LayerNorm<B>,
}

impl<B: Backend> AdaLayerNormZero<B> {
    pub fn conditioning_source(&self) -> ConditioningSource {
        match self.emb {
            Some(_) => ConditioningSource::OwnsEmbedder,
            None => ConditioningSource::ExpectsEmbedding,
        }
    }

    /// Raw projection `linear(silu(emb))` [batch, 6 * embedding_dim], before
    /// it is split
    pub fn modulation(&self, cond: ZeroConditioning<B>) -> Result<Tensor<B, 2>, NormError> {
        let emb = match (&self.emb, cond) {
            (
                Some(embedder),
                ZeroConditioning::Labels {
                    timestep,
                    class_labels,
                    hidden_dtype,
                },
            ) => embedder.forward(timestep, class_labels, hidden_dtype)?,
            (None, ZeroConditioning::Embedding(emb)) => emb,
            (Some(_), ZeroConditioning::Embedding(_)) => {
                return Err(NormError::MissingConditioning("timestep and class labels"))
            }
            (None, ZeroConditioning::Labels { .. }) => {
                return Err(NormError::MissingConditioning("precomputed embedding"))
            }
        };

        Ok(self.linear.forward(silu(emb)))
    }

    /// Forward pass with conditioning
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq_len, embedding_dim]
    /// * `cond` - Labels for the owned embedder, or a precomputed embedding
    ///
    /// # Returns
    ///
    /// `(x, gate_msa, shift_mlp, scale_mlp, gate_mlp)` with `x` modulated
    /// [batch, seq_len, embedding_dim] and the rest [batch, embedding_dim]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        cond: ZeroConditioning<B>,
    ) -> Result<AdaLayerNormZeroOutput<B>, NormError> {
        let params = AdaLnZeroParams::split(self.modulation(cond)?);
        let x = params.modulate_msa(self.norm.forward(x));

        Ok((
            x,
            params.gate_msa,
            params.shift_mlp,
            params.scale_mlp,
            params.gate_mlp,
        ))
    }
}

/// Configuration for [`AdaLayerNormSingle`]
#[derive(Config, Debug)]
pub struct AdaLayerNormSingleConfig {
    /// Hidden dimension
    pub embedding_dim: usize,
    /// Whether resolution and aspect ratio are part of the conditioning
    #[config(default = false)]
    pub use_additional_conditions: bool,
    /// Zero-initialize the projection
    #[config(default = false)]
    pub zero_init: bool,
}

impl AdaLayerNormSingleConfig {
    /// Initialize the module
    ///
    /// With additional conditions, `embedding_dim` must be divisible by 3.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AdaLayerNormSingle<B>, NormError> {
        let emb = CombinedTimestepSizeEmbeddingsConfig::new(self.embedding_dim, self.embedding_dim / 3)
            .with_use_additional_conditions(self.use_additional_conditions)
            .init(device)?;

        tracing::debug!(
            embedding_dim = self.embedding_dim,
            use_additional_conditions = self.use_additional_conditions,
            "initialized AdaLayerNormSingle"
        );

        Ok(AdaLayerNormSingle {
            emb,
            linear: projection(self.embedding_dim, self.embedding_dim * 6, self.zero_init)
                .init(device),
        })
    }
}

/// AdaLN-single: one conditioning projection shared across blocks
///
/// No modulation happens here. The `[batch, 6 * dim]` output is computed
/// once per forward of the whole model; each block splits it (see
/// [`AdaLnZeroParams::split`]) and applies it to its own norms.
#[derive(Module, Debug)]
pub struct AdaLayerNormSingle<B: Backend> {
    /// Timestep (+ size) embedder
    pub emb: CombinedTimestepSizeEmbeddings<B>,
    /// Linear to the six modulation terms
    pub linear: Linear<B>,
}

impl<B: Backend> AdaLayerNormSingle<B> {
    /// # Arguments
    ///
    /// * `timestep` - Diffusion timesteps [batch]
    /// * `added` - Resolution/aspect-ratio conditions, required when enabled
    /// * `batch_size` - Batch size
    /// * `hidden_dtype` - Precision of the embedder's hidden projections
    ///
    /// # Returns
    ///
    /// `(modulation [batch, 6 * dim], embedded_timestep [batch, dim])`
    pub fn forward(
        &self,
        timestep: Tensor<B, 1>,
        added: AddedConditions<B>,
        batch_size: usize,
        hidden_dtype: Option<DType>,
    ) -> Result<(Tensor<B, 2>, Tensor<B, 2>), NormError> {
        let embedded_timestep = self.emb.forward(timestep, added, batch_size, hidden_dtype)?;
        let modulation = self.linear.forward(silu(embedded_timestep.clone()));

        Ok((modulation, embedded_timestep))
    }
}

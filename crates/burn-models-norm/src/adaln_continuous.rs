//! Adaptive layer norm over a continuous conditioning embedding
//!
//! Used by SD3, Flux and HunyuanDiT output layers, where the conditioning is
//! already a pooled embedding rather than a timestep index.

use std::fmt;
use std::str::FromStr;

use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::activation::silu;
use crate::error::NormError;
use crate::kernel::{self, NormKernel};
use crate::layernorm::{LayerNorm, LayerNormConfig};
use crate::modulation::{modulate, split_pair};
use crate::rmsnorm::{RmsNorm, RmsNormConfig};

/// Normalizer underneath the modulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum NormType {
    #[default]
    LayerNorm,
    RmsNorm,
}

impl NormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LayerNorm => "layer_norm",
            Self::RmsNorm => "rms_norm",
        }
    }
}

impl FromStr for NormType {
    type Err = NormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "layer_norm" => Ok(Self::LayerNorm),
            "rms_norm" => Ok(Self::RmsNorm),
            _ => Err(NormError::UnknownNormType(s.to_string())),
        }
    }
}

impl TryFrom<String> for NormType {
    type Error = NormError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for [`AdaLayerNormContinuous`]
///
/// `elementwise_affine` has no default: with it enabled the norm learns its
/// own scale (and bias) *and* is modulated by the projected conditioning.
/// Most models want it disabled.
#[derive(Config, Debug)]
pub struct AdaLayerNormContinuousConfig {
    /// Hidden dimension of the normalized tensor
    pub embedding_dim: usize,
    /// Width of the conditioning embedding
    pub conditioning_embedding_dim: usize,
    /// Whether the norm layer has its own learned affine
    pub elementwise_affine: bool,
    /// Epsilon for numerical stability
    #[config(default = 1e-5)]
    pub epsilon: f64,
    /// Bias on the projection (and on the layer norm, if affine)
    #[config(default = true)]
    pub bias: bool,
    /// Underlying normalizer
    #[config(default = "NormType::LayerNorm")]
    pub norm_type: NormType,
}

impl AdaLayerNormContinuousConfig {
    /// Initialize the module, resolving the kernel from the environment
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<AdaLayerNormContinuous<B>, NormError> {
        let kernel = NormKernel::from_env();
        let norm = match self.norm_type {
            NormType::LayerNorm => ContinuousNorm::LayerNorm(
                LayerNormConfig::new(self.embedding_dim)
                    .with_epsilon(self.epsilon)
                    .with_elementwise_affine(self.elementwise_affine)
                    .with_bias(self.bias)
                    .init(device)?,
            ),
            NormType::RmsNorm => ContinuousNorm::RmsNorm(
                RmsNormConfig::new(self.embedding_dim)
                    .with_epsilon(self.epsilon)
                    .with_elementwise_affine(self.elementwise_affine)
                    .init(device)?
                    .with_kernel(kernel),
            ),
        };

        tracing::debug!(
            embedding_dim = self.embedding_dim,
            conditioning_embedding_dim = self.conditioning_embedding_dim,
            norm_type = %self.norm_type,
            elementwise_affine = self.elementwise_affine,
            ?kernel,
            "initialized AdaLayerNormContinuous"
        );

        Ok(AdaLayerNormContinuous {
            linear: LinearConfig::new(self.conditioning_embedding_dim, self.embedding_dim * 2)
                .with_bias(self.bias)
                .init(device),
            norm,
            kernel: Ignored(kernel),
        })
    }
}

/// The normalizer chosen by [`NormType`]
#[derive(Module, Debug)]
pub enum ContinuousNorm<B: Backend> {
    LayerNorm(LayerNorm<B>),
    RmsNorm(RmsNorm<B>),
}

impl<B: Backend> ContinuousNorm<B> {
    pub fn norm_type(&self) -> NormType {
        match self {
            Self::LayerNorm(_) => NormType::LayerNorm,
            Self::RmsNorm(_) => NormType::RmsNorm,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            Self::LayerNorm(norm) => norm.forward(x),
            Self::RmsNorm(norm) => norm.forward(x),
        }
    }
}

/// Adaptive layer norm with a continuous conditioning embedding
///
/// Computes: y = Norm(x) * (1 + scale) + shift
/// where `(scale, shift) = linear(silu(cond))` and `Norm` is layer norm or
/// RMS norm.
#[derive(Module, Debug)]
pub struct AdaLayerNormContinuous<B: Backend> {
    /// Linear to predict scale and shift
    pub linear: Linear<B>,
    /// Underlying normalizer
    pub norm: ContinuousNorm<B>,
    kernel: Ignored<NormKernel>,
}

impl<B: Backend> AdaLayerNormContinuous<B> {
    /// Forces the reference or fused evaluation path
    pub fn with_kernel(mut self, kernel: NormKernel) -> Self {
        self.kernel = Ignored(kernel);
        self.norm = match self.norm {
            ContinuousNorm::RmsNorm(norm) => ContinuousNorm::RmsNorm(norm.with_kernel(kernel)),
            other => other,
        };
        self
    }

    pub fn kernel(&self) -> NormKernel {
        *self.kernel
    }

    /// Forward pass with conditioning
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq_len, embedding_dim]
    /// * `conditioning_embedding` - [batch, conditioning_embedding_dim], in
    ///   any float precision; it is cast to the precision of `x`
    ///
    /// # Returns
    ///
    /// Modulated output [batch, seq_len, embedding_dim]
    pub fn forward(&self, x: Tensor<B, 3>, conditioning_embedding: Tensor<B, 2>) -> Tensor<B, 3> {
        // The conditioning pathway may run upcast (e.g. f32 under an f16 model)
        let emb = silu(conditioning_embedding).cast(x.dtype());
        let (scale, shift) = split_pair(self.linear.forward(emb));

        match (&self.norm, *self.kernel) {
            (norm, NormKernel::Reference) => modulate(norm.forward(x), scale, shift),
            (ContinuousNorm::LayerNorm(norm), NormKernel::Fused) => {
                kernel::adaptive_layer_norm(x, scale, shift, norm.weight(), norm.bias(), norm.eps)
            }
            (ContinuousNorm::RmsNorm(norm), NormKernel::Fused) => {
                kernel::adaptive_rms_norm(x, scale, shift, norm.weight(), norm.eps())
            }
        }
    }
}

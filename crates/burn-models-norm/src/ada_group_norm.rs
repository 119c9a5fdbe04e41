//! Adaptive group normalization
//!
//! GroupNorm for spatial feature maps (UNet resnet blocks) whose per-channel
//! scale and shift come from a conditioning embedding.

use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use crate::activation::Activation;
use crate::error::NormError;
use crate::groupnorm::{GroupNorm, GroupNormConfig};

/// Configuration for [`AdaGroupNorm`]
#[derive(Config, Debug)]
pub struct AdaGroupNormConfig {
    /// Width of the conditioning embedding
    pub embedding_dim: usize,
    /// Number of channels of the normalized tensor
    pub out_dim: usize,
    /// Number of groups, must divide `out_dim`
    pub num_groups: usize,
    /// Activation applied to the embedding before projection
    pub act_fn: Option<Activation>,
    /// Epsilon for numerical stability
    #[config(default = 1e-5)]
    pub epsilon: f64,
}

impl AdaGroupNormConfig {
    /// Initialize the module
    ///
    /// Fails if `out_dim` is not divisible by `num_groups` or if `epsilon` is
    /// not positive.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<AdaGroupNorm<B>, NormError> {
        let group_norm = GroupNormConfig::new(self.num_groups, self.out_dim)
            .with_epsilon(self.epsilon)
            .with_affine(false)
            .init(device)?;

        tracing::debug!(
            embedding_dim = self.embedding_dim,
            out_dim = self.out_dim,
            num_groups = self.num_groups,
            act_fn = ?self.act_fn,
            "initialized AdaGroupNorm"
        );

        Ok(AdaGroupNorm {
            act: Ignored(self.act_fn),
            // Predict scale and shift per channel (2 * out_dim)
            linear: LinearConfig::new(self.embedding_dim, self.out_dim * 2).init(device),
            group_norm,
        })
    }
}

/// GroupNorm conditioned on an embedding
///
/// Computes: y = GroupNorm(x) * (1 + scale) + shift
/// where `(scale, shift) = linear(act(emb))`, broadcast over spatial axes.
#[derive(Module, Debug)]
pub struct AdaGroupNorm<B: Backend> {
    act: Ignored<Option<Activation>>,
    /// Linear to predict scale and shift
    pub linear: Linear<B>,
    /// Group norm without learned affine
    pub group_norm: GroupNorm<B>,
}

impl<B: Backend> AdaGroupNorm<B> {
    pub fn activation(&self) -> Option<Activation> {
        *self.act
    }

    /// Forward pass with conditioning
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, out_dim, ...spatial], e.g.
    ///   [batch, out_dim, height, width]
    /// * `emb` - Conditioning embedding [batch, embedding_dim]
    ///
    /// # Returns
    ///
    /// Modulated output with the same shape as `x`
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>, emb: Tensor<B, 2>) -> Tensor<B, D> {
        let (scale, shift) = self.scale_shift::<D>(emb);
        let x = self.group_norm.forward(x);
        x * scale.add_scalar(1.0) + shift
    }

    /// Scale and shift shaped [batch, out_dim, 1, ...] for spatial broadcast
    pub fn scale_shift<const D: usize>(&self, emb: Tensor<B, 2>) -> (Tensor<B, D>, Tensor<B, D>) {
        let emb = match *self.act {
            Some(act) => act.forward(emb),
            None => emb,
        };
        let emb = self.linear.forward(emb);
        let [batch, width] = emb.dims();
        let out_dim = width / 2;

        let mut shape = [1usize; D];
        shape[0] = batch;
        shape[1] = out_dim;

        let scale = emb.clone().slice([0..batch, 0..out_dim]).reshape(shape);
        let shift = emb.slice([0..batch, out_dim..width]).reshape(shape);
        (scale, shift)
    }
}

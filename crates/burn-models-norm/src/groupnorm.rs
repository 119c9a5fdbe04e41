//! Group normalization implementation
//!
//! Provides group normalization as used in UNet and VAE architectures.
//! Divides channels into groups and normalizes within each group.

use burn::module::Param;
use burn::prelude::*;
use burn::tensor::DType;

use crate::error::{check_epsilon, NormError};

/// Configuration for [`GroupNorm`]
#[derive(Config, Debug)]
pub struct GroupNormConfig {
    /// Number of groups to divide channels into (typically 32)
    pub num_groups: usize,
    /// Total number of input channels
    pub num_channels: usize,
    /// Epsilon for numerical stability
    #[config(default = 1e-5)]
    pub epsilon: f64,
    /// Whether to learn per-channel weight and bias
    #[config(default = true)]
    pub affine: bool,
}

impl GroupNormConfig {
    /// Initialize the module
    ///
    /// Fails if `num_channels` is not divisible by `num_groups` or if
    /// `epsilon` is not positive.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<GroupNorm<B>, NormError> {
        if self.num_groups == 0 || self.num_channels % self.num_groups != 0 {
            return Err(NormError::GroupMismatch {
                channels: self.num_channels,
                groups: self.num_groups,
            });
        }
        let eps = check_epsilon(self.epsilon)?;

        let (weight, bias) = if self.affine {
            (
                Some(Param::from_tensor(Tensor::ones([self.num_channels], device))),
                Some(Param::from_tensor(Tensor::zeros([self.num_channels], device))),
            )
        } else {
            (None, None)
        };

        Ok(GroupNorm {
            num_groups: self.num_groups,
            weight,
            bias,
            eps,
        })
    }
}

/// Group normalization module
///
/// Divides channels into groups and normalizes each group independently.
/// This is commonly used in diffusion models (UNet, VAE) as an alternative
/// to batch normalization that works well with small batch sizes.
///
/// # Formula
///
/// For input with C channels divided into G groups:
/// ```text
/// y = (x - mean(x_group)) / sqrt(var(x_group) + eps) * weight + bias
/// ```
///
/// # Reference
///
/// "Group Normalization" - Wu & He, 2018
#[derive(Module, Debug)]
pub struct GroupNorm<B: Backend> {
    /// Number of groups to divide channels into
    pub num_groups: usize,
    /// Scale parameter (gamma), shape [num_channels]
    pub weight: Option<Param<Tensor<B, 1>>>,
    /// Bias parameter (beta), shape [num_channels]
    pub bias: Option<Param<Tensor<B, 1>>>,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl<B: Backend> GroupNorm<B> {
    /// Applies group normalization
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of shape `[batch, channels, ...spatial]`, e.g.
    ///   `[batch, channels, height, width]`
    ///
    /// # Returns
    ///
    /// Normalized tensor with same shape as input
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let dims = x.dims();
        let [batch, channels] = [dims[0], dims[1]];
        let group_len = x.shape().num_elements() / (batch * self.num_groups);

        // Reshape to [batch, num_groups, group_size * spatial]
        let x = x.reshape([batch, self.num_groups, group_len]);

        // Statistics in f32 so half-precision reductions don't overflow
        let original_dtype = x.dtype();
        let x_f32 = x.clone().cast(DType::F32);
        let mean_f32 = x_f32.clone().mean_dim(2);
        let diff_f32 = x_f32 - mean_f32.clone();
        let var_f32 = (diff_f32.clone() * diff_f32).mean_dim(2);

        let mean = mean_f32.cast(original_dtype);
        let var = var_f32.cast(original_dtype);

        let x = (x - mean) / (var + self.eps).sqrt();
        let x = x.reshape(dims);

        // Per-channel affine broadcast over [1, channels, 1, ...]
        let mut channel_shape = [1usize; D];
        channel_shape[1] = channels;

        let x = match &self.weight {
            Some(weight) => x * weight.val().reshape(channel_shape),
            None => x,
        };
        match &self.bias {
            Some(bias) => x + bias.val().reshape(channel_shape),
            None => x,
        }
    }
}

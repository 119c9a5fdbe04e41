//! Layer normalization implementation
//!
//! Normalizes across the last dimension of the input tensor using the biased
//! (population) variance, matching the statistics of standard layer norm.
//! The learned affine is optional: adaptive layers disable it and supply
//! their own scale and shift.

use burn::module::Param;
use burn::prelude::*;

use crate::error::{check_epsilon, NormError};

/// Configuration for [`LayerNorm`]
#[derive(Config, Debug)]
pub struct LayerNormConfig {
    /// Size of the normalized (last) dimension
    pub d_model: usize,
    /// Epsilon for numerical stability
    #[config(default = 1e-5)]
    pub epsilon: f64,
    /// Whether to learn a per-channel scale
    #[config(default = true)]
    pub elementwise_affine: bool,
    /// Whether to learn a per-channel shift
    ///
    /// Only takes effect together with `elementwise_affine`: a layer without
    /// a learned scale carries no bias parameter either, even when this is
    /// set. Checkpoints that store a (zero) norm bias next to a disabled
    /// affine have no slot for it here and load without it; the output is
    /// unchanged since that bias is never trained away from zero.
    #[config(default = true)]
    pub bias: bool,
}

impl LayerNormConfig {
    /// Initialize the module
    ///
    /// Fails if `epsilon` is not positive.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LayerNorm<B>, NormError> {
        let eps = check_epsilon(self.epsilon)?;
        let weight = self
            .elementwise_affine
            .then(|| Param::from_tensor(Tensor::ones([self.d_model], device)));
        let bias = (self.elementwise_affine && self.bias)
            .then(|| Param::from_tensor(Tensor::zeros([self.d_model], device)));

        Ok(LayerNorm { weight, bias, eps })
    }
}

/// Layer normalization module
///
/// # Formula
///
/// For input x with last dimension of size D:
/// ```text
/// y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias
/// ```
///
/// Without an elementwise affine, `weight` and `bias` are absent and the
/// output is the plain normalized value.
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    /// Scale parameter
    pub weight: Option<Param<Tensor<B, 1>>>,
    /// Shift parameter
    pub bias: Option<Param<Tensor<B, 1>>>,
    /// Epsilon for numerical stability
    pub eps: f64,
}

impl<B: Backend> LayerNorm<B> {
    /// Creates layer norm from pre-loaded weight and bias
    ///
    /// Fails if `eps` is not positive.
    pub fn from_weight_bias(
        weight: Tensor<B, 1>,
        bias: Tensor<B, 1>,
        eps: f64,
    ) -> Result<Self, NormError> {
        Ok(Self {
            weight: Some(Param::from_tensor(weight)),
            bias: Some(Param::from_tensor(bias)),
            eps: check_epsilon(eps)?,
        })
    }

    /// Applies layer normalization to the input tensor
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of any dimensionality
    ///
    /// # Returns
    ///
    /// Normalized tensor with same shape as input
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let x = normalize(x, self.eps);

        let x = match &self.weight {
            Some(weight) => x * weight.val().unsqueeze(),
            None => x,
        };
        match &self.bias {
            Some(bias) => x + bias.val().unsqueeze(),
            None => x,
        }
    }

    /// Learned scale, if any
    pub fn weight(&self) -> Option<Tensor<B, 1>> {
        self.weight.as_ref().map(|w| w.val())
    }

    /// Learned shift, if any
    pub fn bias(&self) -> Option<Tensor<B, 1>> {
        self.bias.as_ref().map(|b| b.val())
    }
}

/// Zero-mean, unit-variance normalization over the last dimension
pub fn normalize<B: Backend, const D: usize>(x: Tensor<B, D>, eps: f64) -> Tensor<B, D> {
    let (var, mean) = x.clone().var_mean_bias(D - 1);
    (x - mean) / (var + eps).sqrt()
}

//! Root Mean Square Layer Normalization
//!
//! Provides RMSNorm as used in modern transformer architectures like LLaMA,
//! Qwen, and DiT-based models. Simpler and faster than LayerNorm.

use burn::module::{Ignored, Param};
use burn::prelude::*;

use crate::error::{check_epsilon, NormError};
use crate::kernel::{self, NormKernel};

/// Configuration for [`RmsNorm`]
#[derive(Config, Debug)]
pub struct RmsNormConfig {
    /// Size of the normalized dimension(s)
    pub dim: usize,
    /// Small constant for numerical stability
    #[config(default = 1e-6)]
    pub epsilon: f64,
    /// Whether to learn a per-channel scale
    #[config(default = true)]
    pub elementwise_affine: bool,
    /// First axis included in the reduction; the last axis when unset
    pub begin_norm_axis: Option<usize>,
}

impl RmsNormConfig {
    /// Initialize the module, resolving the kernel from the environment
    ///
    /// Fails if `epsilon` is not positive.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<RmsNorm<B>, NormError> {
        let eps = check_epsilon(self.epsilon)?;
        let weight = self
            .elementwise_affine
            .then(|| Param::from_tensor(Tensor::ones([self.dim], device)));

        Ok(RmsNorm {
            weight,
            eps,
            begin_norm_axis: Ignored(self.begin_norm_axis),
            kernel: Ignored(NormKernel::from_env()),
        })
    }
}

/// Root Mean Square Layer Normalization
///
/// Unlike LayerNorm, RMSNorm does not subtract the mean or apply a bias.
/// This makes it computationally cheaper while maintaining similar performance
/// in practice.
///
/// # Formula
///
/// For input x reduced over its trailing axes (size D in total):
/// ```text
/// y = x / sqrt(mean(x^2) + eps) * weight
/// ```
///
/// # References
///
/// - [Root Mean Square Layer Normalization](https://arxiv.org/abs/1910.07467)
/// - Used in LLaMA, Qwen, Mistral, and many modern transformers
#[derive(Module, Debug)]
pub struct RmsNorm<B: Backend> {
    weight: Option<Param<Tensor<B, 1>>>,
    eps: f64,
    begin_norm_axis: Ignored<Option<usize>>,
    kernel: Ignored<NormKernel>,
}

impl<B: Backend> RmsNorm<B> {
    /// Forces the reference or fused evaluation path
    pub fn with_kernel(mut self, kernel: NormKernel) -> Self {
        self.kernel = Ignored(kernel);
        self
    }

    pub fn kernel(&self) -> NormKernel {
        *self.kernel
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Learned scale, if any
    pub fn weight(&self) -> Option<Tensor<B, 1>> {
        self.weight.as_ref().map(|w| w.val())
    }

    /// Applies RMS normalization to the input tensor
    ///
    /// Every axis from `begin_norm_axis` onward is reduced; with the default
    /// that is the last axis (axis 2 of a `[batch, seq, dim]` tensor).
    ///
    /// # Panics
    ///
    /// If `begin_norm_axis` is not an axis of `x`.
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let axis = self.begin_norm_axis.0.unwrap_or(D - 1);
        assert!(axis < D, "begin_norm_axis {axis} out of range for rank {D}");

        let dims = x.dims();
        let rows: usize = dims[..axis].iter().product();
        let cols: usize = dims[axis..].iter().product();
        let x = x.reshape([rows, cols]);

        let y = match *self.kernel {
            NormKernel::Reference => self.forward_reference(x),
            NormKernel::Fused => kernel::rms_norm(x, self.weight(), self.eps),
        };
        y.reshape(dims)
    }

    /// Square, mean-reduce, add epsilon, reciprocal sqrt, multiply, scale
    fn forward_reference(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mean_sq = x.clone().powf_scalar(2.0).mean_dim(1);
        let x_norm = x * (mean_sq + self.eps).sqrt().recip();

        match self.weight() {
            Some(weight) => x_norm * weight.unsqueeze(),
            None => x_norm,
        }
    }
}

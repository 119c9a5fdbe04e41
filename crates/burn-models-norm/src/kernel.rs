//! Reference and fused evaluation paths for normalization
//!
//! The fused functions fold the normalization statistics, the learned affine
//! and the conditioning modulation into a single per-channel multiplier and
//! offset, so the activation tensor is touched by exactly one elementwise
//! expression after the reduction. On a fusing backend (the `fusion` feature)
//! that expression compiles to one kernel.
//!
//! The path is chosen once per module through [`NormKernel`]. Both paths are
//! numerically equivalent within floating-point tolerance.
//!
//! # Environment
//!
//! `BURN_MODELS_FUSED_NORM` selects the fused path when set to anything
//! other than an empty string, `0`, `false` or `off`.

use burn::prelude::*;

/// Environment variable that enables the fused normalization path
pub const FUSED_NORM_ENV: &str = "BURN_MODELS_FUSED_NORM";

/// Which implementation evaluates normalize + modulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormKernel {
    /// Step-by-step computation, always available
    #[default]
    Reference,
    /// Folded single-pass computation
    Fused,
}

impl NormKernel {
    /// Resolves the kernel from [`FUSED_NORM_ENV`]
    pub fn from_env() -> Self {
        let value = std::env::var(FUSED_NORM_ENV).ok();
        let kernel = Self::from_env_value(value.as_deref());
        tracing::debug!(?kernel, env = FUSED_NORM_ENV, "resolved normalization kernel");
        kernel
    }

    /// Interprets a raw environment value
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            None => Self::Reference,
            Some(v) if v.is_empty() || v == "0" || v == "false" || v == "off" => Self::Reference,
            Some(_) => Self::Fused,
        }
    }

    pub fn is_fused(&self) -> bool {
        matches!(self, Self::Fused)
    }
}

/// Fused RMS normalization over the last axis of a `[rows, cols]` tensor
///
/// ```text
/// y = x * rsqrt(sum(x * x) / cols + eps) * weight
/// ```
pub fn rms_norm<B: Backend>(x: Tensor<B, 2>, weight: Option<Tensor<B, 1>>, eps: f64) -> Tensor<B, 2> {
    let [_, cols] = x.dims();
    let rstd = rms_rstd(x.clone(), cols, eps);

    match weight {
        Some(weight) => x * (rstd * weight.unsqueeze()),
        None => x * rstd,
    }
}

/// Fused layer norm followed by `(1 + scale)` / `shift` modulation
///
/// # Arguments
///
/// * `x` - Input tensor [batch, seq_len, dim]
/// * `scale`, `shift` - Modulation [batch, dim]
/// * `weight`, `bias` - Optional learned affine of the norm layer [dim]
pub fn adaptive_layer_norm<B: Backend>(
    x: Tensor<B, 3>,
    scale: Tensor<B, 2>,
    shift: Tensor<B, 2>,
    weight: Option<Tensor<B, 1>>,
    bias: Option<Tensor<B, 1>>,
    eps: f64,
) -> Tensor<B, 3> {
    let (var, mean) = x.clone().var_mean_bias(2);
    let rstd = (var + eps).sqrt().recip();
    let (mul, add) = fold_modulation(scale, shift, weight, bias);

    (x - mean) * rstd * mul + add
}

/// Fused RMS norm followed by `(1 + scale)` / `shift` modulation
///
/// Same layout as [`adaptive_layer_norm`]; RMS norm has no bias.
pub fn adaptive_rms_norm<B: Backend>(
    x: Tensor<B, 3>,
    scale: Tensor<B, 2>,
    shift: Tensor<B, 2>,
    weight: Option<Tensor<B, 1>>,
    eps: f64,
) -> Tensor<B, 3> {
    let [_, _, dim] = x.dims();
    let rstd = rms_rstd(x.clone(), dim, eps);
    let (mul, add) = fold_modulation(scale, shift, weight, None);

    x * rstd * mul + add
}

/// Reciprocal RMS over the last axis, kept as a size-1 axis for broadcasting
fn rms_rstd<B: Backend, const D: usize>(x: Tensor<B, D>, width: usize, eps: f64) -> Tensor<B, D> {
    (x.clone() * x)
        .sum_dim(D - 1)
        .mul_scalar(1.0 / width as f64)
        .add_scalar(eps)
        .sqrt()
        .recip()
}

/// Folds `(norm * w + b) * (1 + scale) + shift` into `norm * mul + add`
///
/// Returns `mul` and `add` shaped [batch, 1, dim].
fn fold_modulation<B: Backend>(
    scale: Tensor<B, 2>,
    shift: Tensor<B, 2>,
    weight: Option<Tensor<B, 1>>,
    bias: Option<Tensor<B, 1>>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let gain = scale.add_scalar(1.0);

    let add = match bias {
        Some(bias) => bias.unsqueeze::<2>() * gain.clone() + shift,
        None => shift,
    };
    let mul = match weight {
        Some(weight) => weight.unsqueeze::<2>() * gain,
        None => gain,
    };

    (mul.unsqueeze_dim(1), add.unsqueeze_dim(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_env_value_parsing() {
        assert_eq!(NormKernel::from_env_value(None), NormKernel::Reference);
        assert_eq!(NormKernel::from_env_value(Some("")), NormKernel::Reference);
        assert_eq!(NormKernel::from_env_value(Some("0")), NormKernel::Reference);
        assert_eq!(NormKernel::from_env_value(Some("False")), NormKernel::Reference);
        assert_eq!(NormKernel::from_env_value(Some("off")), NormKernel::Reference);
        assert_eq!(NormKernel::from_env_value(Some("1")), NormKernel::Fused);
        assert_eq!(NormKernel::from_env_value(Some("triton")), NormKernel::Fused);
        assert!(!NormKernel::default().is_fused());
    }

    #[test]
    fn test_fused_rms_norm_unit_rms() {
        let device = Default::default();
        let x: Tensor<TestBackend, 2> =
            Tensor::random([3, 16], Distribution::Normal(0.0, 2.0), &device);

        let y = rms_norm(x, None, 1e-6);
        let mean_sq: Vec<f32> = (y.clone() * y).mean_dim(1).into_data().to_vec().unwrap();

        for v in mean_sq {
            assert!((v - 1.0).abs() < 1e-3, "mean square {v}");
        }
    }

    #[test]
    fn test_adaptive_layer_norm_identity_modulation() {
        let device = Default::default();
        let x: Tensor<TestBackend, 3> =
            Tensor::random([2, 5, 8], Distribution::Normal(1.0, 3.0), &device);
        let zeros = Tensor::<TestBackend, 2>::zeros([2, 8], &device);

        let y = adaptive_layer_norm(x, zeros.clone(), zeros, None, None, 1e-5);

        let mean: Vec<f32> = y.clone().mean_dim(2).into_data().to_vec().unwrap();
        let var: Vec<f32> = y.var_bias(2).into_data().to_vec().unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-4));
        assert!(var.iter().all(|v| (v - 1.0).abs() < 1e-3));
    }

    #[test]
    fn test_adaptive_layer_norm_folds_affine() {
        let device = Default::default();
        let x: Tensor<TestBackend, 3> =
            Tensor::random([2, 3, 4], Distribution::Normal(0.0, 1.0), &device);
        let scale: Tensor<TestBackend, 2> =
            Tensor::random([2, 4], Distribution::Normal(0.0, 0.5), &device);
        let shift: Tensor<TestBackend, 2> =
            Tensor::random([2, 4], Distribution::Normal(0.0, 0.5), &device);
        let weight = Tensor::<TestBackend, 1>::from_floats([0.5, 1.0, 1.5, 2.0], &device);
        let bias = Tensor::<TestBackend, 1>::from_floats([0.1, -0.2, 0.3, -0.4], &device);

        let fused = adaptive_layer_norm(
            x.clone(),
            scale.clone(),
            shift.clone(),
            Some(weight.clone()),
            Some(bias.clone()),
            1e-5,
        );

        // Unfolded: ((x - mean) / std * w + b) * (1 + scale) + shift
        let (var, mean) = x.clone().var_mean_bias(2);
        let norm = (x - mean) / (var + 1e-5).sqrt();
        let norm = norm * weight.unsqueeze::<3>() + bias.unsqueeze::<3>();
        let expected = norm * scale.add_scalar(1.0).unsqueeze_dim(1) + shift.unsqueeze_dim(1);

        let fused: Vec<f32> = fused.into_data().to_vec().unwrap();
        let expected: Vec<f32> = expected.into_data().to_vec().unwrap();
        for (a, b) in fused.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }
}

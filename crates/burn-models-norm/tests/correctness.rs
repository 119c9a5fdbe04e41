//! End-to-end correctness tests for the conditional normalization layers
//!
//! Run with: `cargo test -p burn-models-norm --test correctness`

use burn::module::Param;
use burn::nn::Linear;
use burn::prelude::*;
use burn::tensor::Distribution;
use burn_models_norm::adaln::{ConditioningSource, ADALN_ZERO_EPS};
use burn_models_norm::embeddings::AddedConditions;
use burn_models_norm::layernorm::normalize;
use burn_models_norm::modulation::AdaLnZeroParams;
use burn_models_norm::rmsnorm::RmsNormConfig;
use burn_models_norm::{
    AdaGroupNormConfig, AdaLayerNormConfig, AdaLayerNormContinuousConfig,
    AdaLayerNormSingleConfig, AdaLayerNormZeroConfig, NormError, NormKernel, NormType,
    ZeroConditioning,
};
use burn_ndarray::NdArray;

type TestBackend = NdArray<f32>;

fn zeroed(linear: Linear<TestBackend>) -> Linear<TestBackend> {
    let device = Default::default();
    let [d_input, d_output] = linear.weight.val().dims();
    Linear {
        weight: Param::from_tensor(Tensor::zeros([d_input, d_output], &device)),
        bias: Some(Param::from_tensor(Tensor::zeros([d_output], &device))),
    }
}

fn to_vec<const D: usize>(x: Tensor<TestBackend, D>) -> Vec<f32> {
    x.into_data().to_vec().unwrap()
}

fn assert_close<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>, tol: f32) {
    assert_eq!(a.dims(), b.dims());
    for (x, y) in to_vec(a).iter().zip(&to_vec(b)) {
        assert!((x - y).abs() <= tol * x.abs().max(1.0), "{x} != {y}");
    }
}

#[test]
fn ada_layer_norm_timestep_scenario() {
    let device = Default::default();
    let mut norm = AdaLayerNormConfig::new(8, 1000)
        .init::<TestBackend>(&device)
        .unwrap();
    norm.linear = zeroed(norm.linear);

    let x: Tensor<TestBackend, 3> =
        Tensor::random([2, 4, 8], Distribution::Normal(1.0, 3.0), &device);
    let y = norm
        .forward(x.clone(), Tensor::from_ints([5, 999], &device))
        .unwrap();
    assert_eq!(to_vec(y), to_vec(normalize(x.clone(), 1e-5)));

    let err = norm
        .forward(x, Tensor::from_ints([5, 1000], &device))
        .unwrap_err();
    assert_eq!(err, NormError::IndexOutOfRange { index: 1000, size: 1000 });
}

#[test]
fn ada_layer_norm_zero_projection_concatenates_outputs() {
    let device = Default::default();
    let norm = AdaLayerNormZeroConfig::new(12)
        .with_num_embeddings(Some(10))
        .init::<TestBackend>(&device)
        .unwrap();
    assert_eq!(norm.conditioning_source(), ConditioningSource::OwnsEmbedder);

    let cond = || ZeroConditioning::Labels {
        timestep: Tensor::from_floats([3.0, 750.0], &device),
        class_labels: Tensor::from_ints([2, 7], &device),
        hidden_dtype: None,
    };
    let raw = norm.modulation(cond()).unwrap();
    assert_eq!(raw.dims(), [2, 72]);

    let x: Tensor<TestBackend, 3> = Tensor::random([2, 3, 12], Distribution::Default, &device);
    let (y, gate_msa, shift_mlp, scale_mlp, gate_mlp) = norm.forward(x.clone(), cond()).unwrap();

    // The returned terms sit at chunks 2..6 of the raw projection
    let params = AdaLnZeroParams::split(raw.clone());
    let rebuilt = AdaLnZeroParams {
        gate_msa,
        shift_mlp,
        scale_mlp,
        gate_mlp,
        ..params.clone()
    }
    .concat();
    assert_eq!(to_vec(rebuilt), to_vec(raw));

    assert_close(y, params.modulate_msa(normalize(x, ADALN_ZERO_EPS)), 1e-5);
}

#[test]
fn ada_layer_norm_single_shared_modulation() {
    let device = Default::default();
    let norm = AdaLayerNormSingleConfig::new(48)
        .with_use_additional_conditions(true)
        .init::<TestBackend>(&device)
        .unwrap();

    let added = AddedConditions::new(
        Tensor::from_floats([[512.0, 512.0], [1024.0, 768.0]], &device),
        Tensor::from_floats([[1.0], [0.75]], &device),
    );
    let (modulation, embedded) = norm
        .forward(Tensor::from_floats([0.0, 999.0], &device), added, 2, None)
        .unwrap();
    assert_eq!(modulation.dims(), [2, 288]);
    assert_eq!(embedded.dims(), [2, 48]);
}

#[test]
fn ada_group_norm_constant_input() {
    let device = Default::default();
    let mut norm = AdaGroupNormConfig::new(8, 16, 4)
        .init::<TestBackend>(&device)
        .unwrap();

    // Zero the scale half (first 16 outputs) of the projection, keep the shift half
    let weight = norm.linear.weight.val();
    let bias = norm.linear.bias.as_ref().unwrap().val();
    norm.linear.weight = Param::from_tensor(Tensor::cat(
        vec![Tensor::zeros([8, 16], &device), weight.slice([0..8, 16..32])],
        1,
    ));
    norm.linear.bias = Some(Param::from_tensor(Tensor::cat(
        vec![Tensor::zeros([16], &device), bias.slice([16..32])],
        0,
    )));

    let x = Tensor::<TestBackend, 4>::ones([1, 16, 4, 4], &device);
    let emb = Tensor::<TestBackend, 2>::random([1, 8], Distribution::Default, &device);

    // Group norm of a constant is exactly zero
    let normalized = to_vec(norm.group_norm.forward(x.clone()));
    assert!(normalized.iter().all(|&v| v == 0.0));

    let (scale, shift) = norm.scale_shift::<4>(emb.clone());
    assert!(to_vec(scale).iter().all(|&v| v == 0.0));

    let y = norm.forward(x, emb);
    assert_eq!(to_vec(y), to_vec(shift.expand([1, 16, 4, 4])));
}

#[test]
fn ada_group_norm_rejects_indivisible_groups() {
    let device = Default::default();
    let err = AdaGroupNormConfig::new(8, 16, 5)
        .init::<TestBackend>(&device)
        .unwrap_err();
    assert_eq!(err, NormError::GroupMismatch { channels: 16, groups: 5 });
    assert_eq!(err.to_string(), "16 channels cannot be split into 5 groups");
}

#[test]
fn unknown_norm_type_is_rejected() {
    let err = "unknown".parse::<NormType>().unwrap_err();
    assert_eq!(err, NormError::UnknownNormType("unknown".into()));
    assert_eq!(err.to_string(), "Unknown norm type: unknown");
}

#[test]
fn continuous_fused_matches_reference() {
    let device = Default::default();
    for norm_type in [NormType::LayerNorm, NormType::RmsNorm] {
        let layer = AdaLayerNormContinuousConfig::new(32, 16, false)
            .with_norm_type(norm_type)
            .init::<TestBackend>(&device)
            .unwrap();

        let x: Tensor<TestBackend, 3> =
            Tensor::random([2, 9, 32], Distribution::Normal(-0.5, 4.0), &device);
        let cond: Tensor<TestBackend, 2> =
            Tensor::random([2, 16], Distribution::Normal(0.0, 1.0), &device);

        let reference = layer
            .clone()
            .with_kernel(NormKernel::Reference)
            .forward(x.clone(), cond.clone());
        let fused = layer.with_kernel(NormKernel::Fused).forward(x, cond);
        assert_close(reference, fused, 1e-4);
    }
}

#[test]
fn rms_norm_fused_matches_reference_and_is_scale_invariant() {
    let device = Default::default();
    let norm = RmsNormConfig::new(64).init::<TestBackend>(&device).unwrap();

    let x: Tensor<TestBackend, 3> =
        Tensor::random([3, 5, 64], Distribution::Normal(0.0, 2.0), &device);
    let reference = norm
        .clone()
        .with_kernel(NormKernel::Reference)
        .forward(x.clone());
    let fused = norm
        .clone()
        .with_kernel(NormKernel::Fused)
        .forward(x.clone());
    assert_close(reference.clone(), fused, 1e-4);

    let scaled = norm.with_kernel(NormKernel::Reference).forward(x.mul_scalar(-4.0));
    assert_close(reference.neg(), scaled, 1e-4);
}

#[test]
fn layers_preserve_input_shape() {
    let device = Default::default();
    let x = || Tensor::<TestBackend, 3>::random([3, 11, 24], Distribution::Default, &device);

    let ada = AdaLayerNormConfig::new(24, 50).init::<TestBackend>(&device).unwrap();
    assert_eq!(ada.forward(x(), Tensor::from_ints([0, 1, 49], &device)).unwrap().dims(), [3, 11, 24]);

    let zero = AdaLayerNormZeroConfig::new(24).init::<TestBackend>(&device).unwrap();
    let (y, ..) = zero
        .forward(x(), ZeroConditioning::Embedding(Tensor::zeros([3, 24], &device)))
        .unwrap();
    assert_eq!(y.dims(), [3, 11, 24]);

    let continuous = AdaLayerNormContinuousConfig::new(24, 7, true)
        .init::<TestBackend>(&device)
        .unwrap();
    assert_eq!(continuous.forward(x(), Tensor::zeros([3, 7], &device)).dims(), [3, 11, 24]);
}

#[test]
fn non_positive_epsilon_is_rejected() {
    let device = Default::default();
    for eps in [0.0, -1e-5, f64::NAN] {
        let continuous = AdaLayerNormContinuousConfig::new(8, 8, false)
            .with_epsilon(eps)
            .init::<TestBackend>(&device);
        assert!(matches!(continuous, Err(NormError::InvalidEpsilon(_))));

        let group = AdaGroupNormConfig::new(8, 8, 2)
            .with_epsilon(eps)
            .init::<TestBackend>(&device);
        assert!(matches!(group, Err(NormError::InvalidEpsilon(_))));
    }
}

#[test]
fn kernel_env_values() {
    assert_eq!(NormKernel::from_env_value(None), NormKernel::Reference);
    assert_eq!(NormKernel::from_env_value(Some("0")), NormKernel::Reference);
    assert_eq!(NormKernel::from_env_value(Some("1")), NormKernel::Fused);
}

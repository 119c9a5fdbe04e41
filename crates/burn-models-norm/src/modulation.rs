//! Scale/shift modulation shared by the adaptive norm layers
//!
//! Callers of [`AdaLayerNormZero`](crate::adaln::AdaLayerNormZero) apply the
//! MLP-stage terms after their own sublayer, and callers of
//! [`AdaLayerNormSingle`](crate::adaln::AdaLayerNormSingle) split the
//! projected vector per block. Both go through this module so the split order
//! and broadcast stay identical to what the layers do internally.

use burn::prelude::*;

/// Applies `x * (1 + scale) + shift` with scale/shift broadcast over the
/// sequence axis
///
/// # Arguments
///
/// * `x` - Normalized tensor [batch, seq_len, dim]
/// * `scale`, `shift` - Modulation [batch, dim]
pub fn modulate<B: Backend>(x: Tensor<B, 3>, scale: Tensor<B, 2>, shift: Tensor<B, 2>) -> Tensor<B, 3> {
    let scale = scale.unsqueeze_dim::<3>(1);
    let shift = shift.unsqueeze_dim::<3>(1);
    x * scale.add_scalar(1.0) + shift
}

/// Splits a `[batch, 2 * dim]` projection into `(first, second)` halves
pub fn split_pair<B: Backend>(emb: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [batch, width] = emb.dims();
    let dim = width / 2;

    let first = emb.clone().slice([0..batch, 0..dim]);
    let second = emb.slice([0..batch, dim..width]);
    (first, second)
}

/// The six AdaLN-Zero modulation terms, each [batch, dim]
///
/// Order along the projection is fixed:
/// `shift_msa, scale_msa, gate_msa, shift_mlp, scale_mlp, gate_mlp`.
#[derive(Debug, Clone)]
pub struct AdaLnZeroParams<B: Backend> {
    pub shift_msa: Tensor<B, 2>,
    pub scale_msa: Tensor<B, 2>,
    pub gate_msa: Tensor<B, 2>,
    pub shift_mlp: Tensor<B, 2>,
    pub scale_mlp: Tensor<B, 2>,
    pub gate_mlp: Tensor<B, 2>,
}

impl<B: Backend> AdaLnZeroParams<B> {
    /// Splits a `[batch, 6 * dim]` modulation vector into its six terms
    ///
    /// # Panics
    ///
    /// If the width is not a multiple of six.
    pub fn split(modulation: Tensor<B, 2>) -> Self {
        let [batch, width] = modulation.dims();
        assert!(width % 6 == 0, "modulation width {width} is not a multiple of 6");
        let dim = width / 6;

        let chunk = |i: usize| modulation.clone().slice([0..batch, i * dim..(i + 1) * dim]);
        Self {
            shift_msa: chunk(0),
            scale_msa: chunk(1),
            gate_msa: chunk(2),
            shift_mlp: chunk(3),
            scale_mlp: chunk(4),
            gate_mlp: chunk(5),
        }
    }

    /// Concatenates the terms back into the `[batch, 6 * dim]` vector
    pub fn concat(self) -> Tensor<B, 2> {
        Tensor::cat(
            vec![
                self.shift_msa,
                self.scale_msa,
                self.gate_msa,
                self.shift_mlp,
                self.scale_mlp,
                self.gate_mlp,
            ],
            1,
        )
    }

    /// Pre-attention modulation of an already normalized tensor
    pub fn modulate_msa(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        modulate(x, self.scale_msa.clone(), self.shift_msa.clone())
    }

    /// Pre-MLP modulation of an already normalized tensor
    pub fn modulate_mlp(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        modulate(x, self.scale_mlp.clone(), self.shift_mlp.clone())
    }
}

/// Multiplies a sublayer output [batch, seq_len, dim] by a gate [batch, dim]
pub fn gate<B: Backend>(x: Tensor<B, 3>, gate: Tensor<B, 2>) -> Tensor<B, 3> {
    x * gate.unsqueeze_dim::<3>(1)
}

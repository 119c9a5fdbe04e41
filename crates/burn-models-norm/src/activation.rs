//! Activation functions selectable by name
//!
//! Layers that take an `act_fn` string resolve it to an [`Activation`] once,
//! at construction, and dispatch on the enum in their forward pass.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use burn::tensor::activation::{gelu, mish, relu, sigmoid};
use serde::{Deserialize, Serialize};

use crate::error::NormError;

/// SiLU (Sigmoid Linear Unit) activation: x * sigmoid(x)
pub fn silu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() * sigmoid(x)
}

/// Activation applied to conditioning embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Activation {
    /// x * sigmoid(x), also registered as "swish"
    Silu,
    /// x * tanh(softplus(x))
    Mish,
    /// Gaussian error linear unit
    Gelu,
    /// max(x, 0)
    Relu,
}

impl Activation {
    /// Registry name of the activation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silu => "silu",
            Self::Mish => "mish",
            Self::Gelu => "gelu",
            Self::Relu => "relu",
        }
    }

    /// Applies the activation elementwise
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Silu => silu(x),
            Self::Mish => mish(x),
            Self::Gelu => gelu(x),
            Self::Relu => relu(x),
        }
    }
}

impl FromStr for Activation {
    type Err = NormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silu" | "swish" => Ok(Self::Silu),
            "mish" => Ok(Self::Mish),
            "gelu" => Ok(Self::Gelu),
            "relu" => Ok(Self::Relu),
            _ => Err(NormError::UnknownActivation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = NormError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

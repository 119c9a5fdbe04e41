//! Conditional Normalization Layers for Diffusion Models
//!
//! This crate provides the normalization layers diffusion transformers and
//! UNets use to inject timestep, class, size and text conditioning: a
//! projected conditioning vector supplies per-channel scale and shift (and,
//! for AdaLN-Zero, gates) applied around a standard normalizer.
//!
//! # Modules
//!
//! ## Normalizers
//!
//! - [`layernorm`] - Layer normalization (optional affine and bias)
//! - [`rmsnorm`] - RMS normalization (used in SD3, Flux)
//! - [`groupnorm`] - Group normalization (used in UNet, VAE)
//!
//! ## Conditional Layers
//!
//! - [`adaln`] - AdaLayerNorm, AdaLayerNormZero (DiT) and AdaLayerNormSingle (PixArt-α)
//! - [`adaln_continuous`] - AdaLayerNormContinuous over a pooled embedding
//! - [`ada_group_norm`] - AdaGroupNorm for spatial feature maps
//!
//! ## Conditioning
//!
//! - [`embeddings`] - Sinusoidal timesteps, label and size embedders
//! - [`modulation`] - Scale/shift/gate helpers shared by the layers above
//! - [`activation`] - SiLU and the activations AdaGroupNorm accepts
//!
//! ## Kernels
//!
//! - [`kernel`] - Reference/fused selection and the fused normalize+modulate path
//!
//! Set `BURN_MODELS_FUSED_NORM=1` to route RMS norm and continuous AdaLN
//! through the fused path.
//!
//! # Example
//!
//! ```ignore
//! use burn_models_norm::adaln::{AdaLayerNormZeroConfig, ZeroConditioning};
//! use burn_models_norm::modulation::gate;
//!
//! let norm = AdaLayerNormZeroConfig::new(1152)
//!     .with_num_embeddings(Some(1000))
//!     .init(&device)?;
//!
//! let (x_norm, gate_msa, shift_mlp, scale_mlp, gate_mlp) =
//!     norm.forward(x.clone(), ZeroConditioning::Labels { timestep, class_labels, hidden_dtype: None })?;
//! let x = x + gate(attn.forward(x_norm), gate_msa);
//! ```

pub mod activation;
pub mod ada_group_norm;
pub mod adaln;
pub mod adaln_continuous;
pub mod embeddings;
pub mod error;
pub mod groupnorm;
pub mod kernel;
pub mod layernorm;
pub mod modulation;
pub mod rmsnorm;

pub use ada_group_norm::{AdaGroupNorm, AdaGroupNormConfig};
pub use adaln::{
    AdaLayerNorm, AdaLayerNormConfig, AdaLayerNormSingle, AdaLayerNormSingleConfig,
    AdaLayerNormZero, AdaLayerNormZeroConfig, ZeroConditioning,
};
pub use adaln_continuous::{AdaLayerNormContinuous, AdaLayerNormContinuousConfig, NormType};
pub use error::NormError;
pub use kernel::NormKernel;

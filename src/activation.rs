//! Elementwise activation functions fused into the output stage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConvError, Result};
use crate::tensor::TensorFormat;

/// Activation applied after dequantization and bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationKind {
    Identity,
    Relu,
    LeakyRelu,
    /// Clamped ReLU: `min(max(lo, x), hi)`.
    RestrictRange,
    /// Parametric ReLU with one slope per output channel.
    Prelu,
    Elu,
    HardSigmoid,
    Swish,
    Mish,
    Hswish,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 10] = [
        ActivationKind::Identity,
        ActivationKind::Relu,
        ActivationKind::LeakyRelu,
        ActivationKind::RestrictRange,
        ActivationKind::Prelu,
        ActivationKind::Elu,
        ActivationKind::HardSigmoid,
        ActivationKind::Swish,
        ActivationKind::Mish,
        ActivationKind::Hswish,
    ];

    /// Number of parameters the kind consumes; prelu takes one per channel.
    pub fn param_count(self, channels: usize) -> usize {
        match self {
            ActivationKind::Identity | ActivationKind::Relu => 0,
            ActivationKind::LeakyRelu
            | ActivationKind::Elu
            | ActivationKind::Swish
            | ActivationKind::Mish => 1,
            ActivationKind::RestrictRange | ActivationKind::HardSigmoid | ActivationKind::Hswish => 2,
            ActivationKind::Prelu => channels,
        }
    }

    fn defaults(self) -> &'static [f32] {
        match self {
            ActivationKind::Identity | ActivationKind::Relu | ActivationKind::Prelu => &[],
            ActivationKind::LeakyRelu => &[0.01],
            ActivationKind::RestrictRange => &[0.0, 6.0],
            ActivationKind::Elu => &[1.0],
            ActivationKind::HardSigmoid => &[1.0 / 6.0, 0.5],
            ActivationKind::Swish => &[1.0],
            ActivationKind::Mish => &[20.0],
            ActivationKind::Hswish => &[3.0, 1.0 / 6.0],
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An activation kind bound to its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    kind: ActivationKind,
    params: Vec<f32>,
}

impl Activation {
    /// Bind `params` to `kind`. An empty slice selects the kind's defaults;
    /// prelu has no defaults and always needs one slope per channel.
    pub fn new(kind: ActivationKind, params: &[f32], channels: usize) -> Result<Self> {
        let expected = kind.param_count(channels);
        let params = if params.is_empty() && kind != ActivationKind::Prelu {
            kind.defaults().to_vec()
        } else if params.len() >= expected {
            params[..expected].to_vec()
        } else {
            return Err(ConvError::ParameterLength {
                what: "activation params",
                expected,
                actual: params.len(),
            });
        };
        if params.len() != expected {
            return Err(ConvError::ParameterLength {
                what: "activation params",
                expected,
                actual: params.len(),
            });
        }
        Ok(Activation { kind, params })
    }

    pub fn identity() -> Self {
        Activation {
            kind: ActivationKind::Identity,
            params: Vec::new(),
        }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Apply to one value of output channel `channel`.
    #[inline]
    pub fn apply(&self, x: f32, channel: usize) -> f32 {
        activate(self.kind, x, &self.params, channel)
    }
}

/// Scalar activation formula. `params` must hold `kind.param_count(..)` values.
#[inline]
pub fn activate(kind: ActivationKind, x: f32, params: &[f32], channel: usize) -> f32 {
    match kind {
        ActivationKind::Identity => x,
        ActivationKind::Relu => x.max(0.0),
        ActivationKind::LeakyRelu => x.max(0.0) + params[0] * x.min(0.0),
        ActivationKind::RestrictRange => x.max(params[0]).min(params[1]),
        ActivationKind::Prelu => x.max(0.0) + params[channel] * x.min(0.0),
        ActivationKind::Elu => {
            if x >= 0.0 {
                x
            } else {
                params[0] * (x.exp() - 1.0)
            }
        }
        ActivationKind::HardSigmoid => (params[0] * x + params[1]).min(1.0).max(0.0),
        ActivationKind::Swish => x / (1.0 + (-params[0] * x).exp()),
        ActivationKind::Mish => {
            if x > params[0] {
                x
            } else {
                x * x.exp().ln_1p().tanh()
            }
        }
        ActivationKind::Hswish => (x.min(params[0]) + params[0]).max(0.0) * params[1] * x,
    }
}

/// Apply an activation in place over a contiguous image of `channels x plane` values.
pub fn activate_slice(activation: &Activation, data: &mut [f32], channels: usize, plane: usize, format: TensorFormat) {
    match activation.kind() {
        ActivationKind::Identity => {}
        ActivationKind::Relu => {
            for v in data.iter_mut() {
                *v = v.max(0.0);
            }
        }
        _ => {
            for (i, v) in data.iter_mut().enumerate() {
                let c = format.channel_of(channels, plane, i);
                *v = activation.apply(*v, c);
            }
        }
    }
}

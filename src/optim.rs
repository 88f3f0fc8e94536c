//! Optimizers.
//!
//! [`Optimizer`] is the declarative choice stored on a model definition.
//! [`OptimizerState`] is allocated once per compiled model and updates an `Mlp`
//! given a set of averaged `Gradients`, without allocating per step.
//!
//! Optimizer *state* (momentum/Adam moments) lives outside the model.

use serde::{Deserialize, Serialize};

use crate::{Error, Gradients, Mlp, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Optimizer choice for training.
pub enum Optimizer {
    /// Plain SGD.
    Sgd { lr: f32 },
    /// SGD with momentum.
    SgdMomentum { lr: f32, momentum: f32 },
    /// Adam (bias-corrected).
    Adam {
        lr: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
    },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Adam {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
        }
    }
}

impl Optimizer {
    /// SGD with momentum at the usual `lr = 0.01`.
    pub fn sgd_momentum(momentum: f32) -> Self {
        Optimizer::SgdMomentum {
            lr: 1e-2,
            momentum,
        }
    }

    #[inline]
    pub fn lr(self) -> f32 {
        match self {
            Optimizer::Sgd { lr }
            | Optimizer::SgdMomentum { lr, .. }
            | Optimizer::Adam { lr, .. } => lr,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Optimizer::Sgd { .. } => "sgd",
            Optimizer::SgdMomentum { .. } => "sgd_momentum",
            Optimizer::Adam { .. } => "adam",
        }
    }

    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        let lr = self.lr();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {lr}"
            )));
        }

        match self {
            Optimizer::Sgd { .. } => Ok(()),
            Optimizer::SgdMomentum { momentum, .. } => {
                if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
                    return Err(Error::InvalidConfig(format!(
                        "momentum must be finite and in [0,1), got {momentum}"
                    )));
                }
                Ok(())
            }
            Optimizer::Adam {
                beta1, beta2, eps, ..
            } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate optimizer state for `model`.
    pub fn state(self, model: &Mlp) -> Result<OptimizerState> {
        self.validate()?;

        match self {
            Optimizer::Sgd { lr } => Ok(OptimizerState::Sgd { lr }),
            Optimizer::SgdMomentum { lr, momentum } => {
                let (vw, vb) = zeros_like_params(model);
                Ok(OptimizerState::SgdMomentum {
                    lr,
                    momentum,
                    v_weights: vw,
                    v_biases: vb,
                })
            }
            Optimizer::Adam {
                lr,
                beta1,
                beta2,
                eps,
            } => {
                let (mw, mb) = zeros_like_params(model);
                let (vw, vb) = zeros_like_params(model);
                Ok(OptimizerState::Adam {
                    lr,
                    beta1,
                    beta2,
                    eps,
                    t: 0,
                    beta1_pow: 1.0,
                    beta2_pow: 1.0,
                    m_weights: mw,
                    m_biases: mb,
                    v_weights: vw,
                    v_biases: vb,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
/// Owned optimizer state.
pub enum OptimizerState {
    /// Plain SGD (no state).
    Sgd { lr: f32 },
    /// SGD with momentum state.
    SgdMomentum {
        lr: f32,
        momentum: f32,
        v_weights: Vec<Vec<f32>>,
        v_biases: Vec<Vec<f32>>,
    },
    /// Adam state.
    Adam {
        lr: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
        t: u64,
        beta1_pow: f32,
        beta2_pow: f32,
        m_weights: Vec<Vec<f32>>,
        m_biases: Vec<Vec<f32>>,
        v_weights: Vec<Vec<f32>>,
        v_biases: Vec<Vec<f32>>,
    },
}

impl OptimizerState {
    /// Apply one optimizer step.
    ///
    /// Adam overwrites `grads` with its update direction.
    pub fn step(&mut self, model: &mut Mlp, grads: &mut Gradients) {
        match self {
            OptimizerState::Sgd { lr } => {
                model.sgd_step(grads, *lr);
            }
            OptimizerState::SgdMomentum {
                lr,
                momentum,
                v_weights,
                v_biases,
            } => {
                debug_assert_eq!(v_weights.len(), model.num_layers());
                debug_assert_eq!(v_biases.len(), model.num_layers());

                for layer_idx in 0..model.num_layers() {
                    let dw = grads.d_weights(layer_idx);
                    let db = grads.d_biases(layer_idx);

                    let vw = &mut v_weights[layer_idx];
                    let vb = &mut v_biases[layer_idx];

                    debug_assert_eq!(vw.len(), dw.len());
                    debug_assert_eq!(vb.len(), db.len());

                    for (v, &g) in vw.iter_mut().zip(dw) {
                        *v = (*momentum) * *v + g;
                    }
                    for (v, &g) in vb.iter_mut().zip(db) {
                        *v = (*momentum) * *v + g;
                    }

                    model.layer_mut(layer_idx).sgd_step(vw, vb, *lr);
                }
            }
            OptimizerState::Adam {
                lr,
                beta1,
                beta2,
                eps,
                t,
                beta1_pow,
                beta2_pow,
                m_weights,
                m_biases,
                v_weights,
                v_biases,
            } => {
                *t += 1;
                *beta1_pow *= *beta1;
                *beta2_pow *= *beta2;

                let one_minus_beta1 = 1.0 - *beta1;
                let one_minus_beta2 = 1.0 - *beta2;
                let corr1 = 1.0 - *beta1_pow;
                let corr2 = 1.0 - *beta2_pow;

                let adam = |g: &mut f32, m: &mut f32, v: &mut f32| {
                    *m = (*beta1) * *m + one_minus_beta1 * *g;
                    *v = (*beta2) * *v + one_minus_beta2 * (*g * *g);
                    let m_hat = *m / corr1;
                    let v_hat = *v / corr2;
                    *g = m_hat / (v_hat.sqrt() + *eps);
                };

                // Overwrite `grads` with the Adam update direction and then reuse `sgd_step`.
                for layer_idx in 0..model.num_layers() {
                    let upd_w = grads.d_weights_mut(layer_idx);
                    for ((g, m), v) in upd_w
                        .iter_mut()
                        .zip(m_weights[layer_idx].iter_mut())
                        .zip(v_weights[layer_idx].iter_mut())
                    {
                        adam(g, m, v);
                    }

                    let upd_b = grads.d_biases_mut(layer_idx);
                    for ((g, m), v) in upd_b
                        .iter_mut()
                        .zip(m_biases[layer_idx].iter_mut())
                        .zip(v_biases[layer_idx].iter_mut())
                    {
                        adam(g, m, v);
                    }
                }

                model.sgd_step(grads, *lr);
            }
        }
    }
}

fn zeros_like_params(model: &Mlp) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let mut ws = Vec::with_capacity(model.num_layers());
    let mut bs = Vec::with_capacity(model.num_layers());
    for i in 0..model.num_layers() {
        let layer = model.layer(i);
        ws.push(vec![0.0; layer.in_dim() * layer.out_dim()]);
        bs.push(vec![0.0; layer.out_dim()]);
    }
    (ws, bs)
}

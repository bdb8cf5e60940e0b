//! RBM gradient accumulation.
//!
//! The trainers never form gradients themselves; they feed positive-phase
//! (data) and negative-phase (model) visible/hidden pairs into a pluggable
//! accumulator, which turns a package of pairs into package derivatives for
//! the weight matrix and both bias vectors. Those shared buffers
//! ([`RbmGradients`]) are then consumed — and zeroed — by the weight update.
//!
//! Two accumulators exist: the plain CD gradient, and the centered gradient
//! of Montavon & Müller, which shifts both layers by sliding estimates of
//! their mean activation before forming the co-activation product. With zero
//! offsets and a frozen sliding factor the centered form degenerates exactly
//! to the linear one.

use rayon::prelude::*;

use crate::{Error, Result};

/// Minimum hidden rows per worker in the outer-product fan-out.
const OUTER_GRAIN: usize = 4;

/// Default centering offset for units without a supplied estimate.
const DEFAULT_OFFSET: f32 = 0.5;

/// Package-derivative buffers shared between the accumulation strategy and
/// the weight update.
#[derive(Debug, Clone)]
pub struct RbmGradients {
    visible_count: usize,
    hidden_count: usize,
    /// Hidden-major, same layout as the RBM weight matrix.
    weights: Vec<f32>,
    visible_bias: Vec<f32>,
    hidden_bias: Vec<f32>,
}

impl RbmGradients {
    pub fn new(visible_count: usize, hidden_count: usize) -> Self {
        Self {
            visible_count,
            hidden_count,
            weights: vec![0.0; visible_count * hidden_count],
            visible_bias: vec![0.0; visible_count],
            hidden_bias: vec![0.0; hidden_count],
        }
    }

    #[inline]
    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    #[inline]
    pub fn hidden_count(&self) -> usize {
        self.hidden_count
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    #[inline]
    pub fn visible_bias(&self) -> &[f32] {
        &self.visible_bias
    }

    #[inline]
    pub fn visible_bias_mut(&mut self) -> &mut [f32] {
        &mut self.visible_bias
    }

    #[inline]
    pub fn hidden_bias(&self) -> &[f32] {
        &self.hidden_bias
    }

    #[inline]
    pub fn hidden_bias_mut(&mut self) -> &mut [f32] {
        &mut self.hidden_bias
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Configuration-time choice of the gradient accumulation strategy.
pub enum GradientStrategy {
    /// Plain CD gradient.
    Linear,
    /// Centered gradient with sliding offset estimates.
    ///
    /// `None` offsets default to 0.5 per unit, the mean activation of an
    /// unbiased binary unit.
    Centered {
        sliding_factor: f32,
        visible_offsets: Option<Vec<f32>>,
        hidden_offsets: Option<Vec<f32>>,
    },
}

impl GradientStrategy {
    /// Validate strategy parameters.
    pub fn validate(&self) -> Result<()> {
        if let GradientStrategy::Centered { sliding_factor, .. } = self {
            if !(sliding_factor.is_finite() && (0.0..=1.0).contains(sliding_factor)) {
                return Err(Error::InvalidConfig(format!(
                    "centered sliding factor must be in [0, 1], got {sliding_factor}"
                )));
            }
        }
        Ok(())
    }
}

/// Session-time accumulator instantiated from a [`GradientStrategy`].
#[derive(Debug)]
pub enum GradientAccumulator {
    Linear,
    Centered(CenteredState),
}

#[derive(Debug)]
pub struct CenteredState {
    sliding_factor: f32,
    visible_offsets: Vec<f32>,
    hidden_offsets: Vec<f32>,
    visible_offsets_new: Vec<f32>,
    hidden_offsets_new: Vec<f32>,
    data_visible_hidden: Vec<f32>,
    model_visible_hidden: Vec<f32>,
    data_visible: Vec<f32>,
    model_visible: Vec<f32>,
    data_hidden: Vec<f32>,
    model_hidden: Vec<f32>,
    package_factor: f32,
}

impl GradientAccumulator {
    /// Instantiate for a machine of the given layer sizes.
    pub fn from_strategy(
        strategy: &GradientStrategy,
        visible_count: usize,
        hidden_count: usize,
    ) -> Result<Self> {
        strategy.validate()?;
        match strategy {
            GradientStrategy::Linear => Ok(GradientAccumulator::Linear),
            GradientStrategy::Centered { sliding_factor, visible_offsets, hidden_offsets } => {
                let visible_offsets = match visible_offsets {
                    Some(offsets) => {
                        if offsets.len() != visible_count {
                            return Err(Error::InvalidConfig(format!(
                                "visible offsets len {} does not match visible count {visible_count}",
                                offsets.len()
                            )));
                        }
                        offsets.clone()
                    }
                    None => vec![DEFAULT_OFFSET; visible_count],
                };
                let hidden_offsets = match hidden_offsets {
                    Some(offsets) => {
                        if offsets.len() != hidden_count {
                            return Err(Error::InvalidConfig(format!(
                                "hidden offsets len {} does not match hidden count {hidden_count}",
                                offsets.len()
                            )));
                        }
                        offsets.clone()
                    }
                    None => vec![DEFAULT_OFFSET; hidden_count],
                };
                Ok(GradientAccumulator::Centered(CenteredState {
                    sliding_factor: *sliding_factor,
                    visible_offsets,
                    hidden_offsets,
                    visible_offsets_new: vec![0.0; visible_count],
                    hidden_offsets_new: vec![0.0; hidden_count],
                    data_visible_hidden: vec![0.0; visible_count * hidden_count],
                    model_visible_hidden: vec![0.0; visible_count * hidden_count],
                    data_visible: vec![0.0; visible_count],
                    model_visible: vec![0.0; visible_count],
                    data_hidden: vec![0.0; hidden_count],
                    model_hidden: vec![0.0; hidden_count],
                    package_factor: 1.0,
                }))
            }
        }
    }

    /// Reset per-package accumulators before the next package of
    /// `package_size` examples.
    pub fn prepare_package(&mut self, package_size: usize) {
        debug_assert!(package_size > 0);
        match self {
            GradientAccumulator::Linear => {}
            GradientAccumulator::Centered(state) => {
                state.package_factor = 1.0 / package_size as f32;
                state.visible_offsets_new.fill(0.0);
                state.hidden_offsets_new.fill(0.0);
                state.data_visible_hidden.fill(0.0);
                state.model_visible_hidden.fill(0.0);
                state.data_visible.fill(0.0);
                state.model_visible.fill(0.0);
                state.data_hidden.fill(0.0);
                state.model_hidden.fill(0.0);
            }
        }
    }

    /// Record one positive-phase (data) visible/hidden pair.
    pub fn store_positive(&mut self, gradients: &mut RbmGradients, visible: &[f32], hidden: &[f32]) {
        debug_assert_eq!(visible.len(), gradients.visible_count);
        debug_assert_eq!(hidden.len(), gradients.hidden_count);

        match self {
            GradientAccumulator::Linear => {
                accumulate_outer(&mut gradients.weights, visible, hidden, 1.0);
                for (g, &h) in gradients.hidden_bias.iter_mut().zip(hidden) {
                    *g += h;
                }
                for (g, &v) in gradients.visible_bias.iter_mut().zip(visible) {
                    *g += v;
                }
            }
            GradientAccumulator::Centered(state) => {
                state.store(visible, hidden, Phase::Data);
            }
        }
    }

    /// Record one negative-phase (model) visible/hidden pair.
    pub fn store_negative(&mut self, gradients: &mut RbmGradients, visible: &[f32], hidden: &[f32]) {
        debug_assert_eq!(visible.len(), gradients.visible_count);
        debug_assert_eq!(hidden.len(), gradients.hidden_count);

        match self {
            GradientAccumulator::Linear => {
                accumulate_outer(&mut gradients.weights, visible, hidden, -1.0);
                for (g, &h) in gradients.hidden_bias.iter_mut().zip(hidden) {
                    *g -= h;
                }
                for (g, &v) in gradients.visible_bias.iter_mut().zip(visible) {
                    *g -= v;
                }
            }
            GradientAccumulator::Centered(state) => {
                state.store(visible, hidden, Phase::Model);
            }
        }
    }

    /// Finalize the package derivative, scaling by `package_factor`
    /// (`1/package_size`).
    pub fn make_gradient(&mut self, gradients: &mut RbmGradients, package_factor: f32) {
        match self {
            GradientAccumulator::Linear => {
                for g in gradients.weights.iter_mut() {
                    *g *= package_factor;
                }
                for g in gradients.hidden_bias.iter_mut() {
                    *g *= package_factor;
                }
                for g in gradients.visible_bias.iter_mut() {
                    *g *= package_factor;
                }
            }
            GradientAccumulator::Centered(state) => state.make_gradient(gradients, package_factor),
        }
    }

    /// Current visible centering offsets (empty for the linear strategy).
    pub fn visible_offsets(&self) -> &[f32] {
        match self {
            GradientAccumulator::Linear => &[],
            GradientAccumulator::Centered(state) => &state.visible_offsets,
        }
    }

    /// Current hidden centering offsets (empty for the linear strategy).
    pub fn hidden_offsets(&self) -> &[f32] {
        match self {
            GradientAccumulator::Linear => &[],
            GradientAccumulator::Centered(state) => &state.hidden_offsets,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Data,
    Model,
}

impl CenteredState {
    fn store(&mut self, visible: &[f32], hidden: &[f32], phase: Phase) {
        let nv = self.visible_offsets.len();
        let (visible_hidden, hidden_sum, visible_sum) = match phase {
            Phase::Data => (
                &mut self.data_visible_hidden,
                &mut self.data_hidden,
                &mut self.data_visible,
            ),
            Phase::Model => (
                &mut self.model_visible_hidden,
                &mut self.model_hidden,
                &mut self.model_visible,
            ),
        };

        let visible_offsets = &self.visible_offsets;
        let hidden_offsets = &self.hidden_offsets;
        visible_hidden
            .par_chunks_mut(nv)
            .zip(hidden.par_iter())
            .zip(hidden_offsets.par_iter())
            .with_min_len(OUTER_GRAIN)
            .for_each(|((row, &h), &offset)| {
                let shifted_hidden = h - offset;
                for i in 0..nv {
                    row[i] += (visible[i] - visible_offsets[i]) * shifted_hidden;
                }
            });

        for (sum, &h) in hidden_sum.iter_mut().zip(hidden) {
            *sum += h;
        }
        for (sum, &v) in visible_sum.iter_mut().zip(visible) {
            *sum += v;
        }

        // New offset estimates track positive-phase activity only.
        if phase == Phase::Data {
            for (new, &h) in self.hidden_offsets_new.iter_mut().zip(hidden) {
                *new += self.package_factor * h;
            }
            for (new, &v) in self.visible_offsets_new.iter_mut().zip(visible) {
                *new += self.package_factor * v;
            }
        }
    }

    fn make_gradient(&mut self, gradients: &mut RbmGradients, package_factor: f32) {
        let nv = gradients.visible_count;
        let nh = gradients.hidden_count;

        // Weight gradient and the hidden-bias cross term in one pass.
        for j in 0..nh {
            let mut hidden_cross = 0.0_f32;
            let row_start = j * nv;
            for i in 0..nv {
                let index = row_start + i;
                let weight_gradient = package_factor
                    * (self.data_visible_hidden[index] - self.model_visible_hidden[index]);
                hidden_cross += self.visible_offsets[i] * weight_gradient;
                gradients.weights[index] = weight_gradient;
            }
            gradients.hidden_bias[j] =
                package_factor * (self.data_hidden[j] - self.model_hidden[j]) - hidden_cross;
        }

        for i in 0..nv {
            let mut visible_cross = 0.0_f32;
            for j in 0..nh {
                visible_cross += self.hidden_offsets[j] * gradients.weights[j * nv + i];
            }
            gradients.visible_bias[i] =
                package_factor * (self.data_visible[i] - self.model_visible[i]) - visible_cross;
        }

        for (offset, &new) in self.visible_offsets.iter_mut().zip(&self.visible_offsets_new) {
            *offset = (1.0 - self.sliding_factor) * *offset + self.sliding_factor * new;
        }
        for (offset, &new) in self.hidden_offsets.iter_mut().zip(&self.hidden_offsets_new) {
            *offset = (1.0 - self.sliding_factor) * *offset + self.sliding_factor * new;
        }
    }
}

fn accumulate_outer(weights: &mut [f32], visible: &[f32], hidden: &[f32], sign: f32) {
    let nv = visible.len();
    weights
        .par_chunks_mut(nv)
        .zip(hidden.par_iter())
        .with_min_len(OUTER_GRAIN)
        .for_each(|(row, &h)| {
            let signed_hidden = sign * h;
            for (w, &v) in row.iter_mut().zip(visible) {
                *w = v.mul_add(signed_hidden, *w);
            }
        });
}

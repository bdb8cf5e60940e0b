//! Per-parameter adaptive gradient update (Silva–Almeida rule).
//!
//! This is the numeric core shared by both trainers. Every trainable scalar
//! carries three pieces of state: the previous applied delta (momentum), an
//! exponential moving average of the signed partial derivative (the
//! sign-agreement test), and a per-parameter learn factor that grows
//! additively while consecutive derivatives agree in sign and shrinks
//! multiplicatively when they flip, clamped to configured borders.
//!
//! Sign convention, used everywhere in this crate: the package derivative
//! accumulates the *improvement direction* (negative loss gradient for the
//! MLP, data-minus-model statistics for the RBM), and the update always adds
//! `(1 + momentum) * delta` to the parameter.

use rayon::prelude::*;

use crate::Regularization;

const STEP_GRAIN: usize = 1024;

#[derive(Debug, Clone, Copy)]
/// Hyperparameters of the adaptive step, lifted out of `TrainConfig`.
pub struct AdaptiveRule {
    pub speed_bonus: f32,
    pub speed_penalty: f32,
    pub speed_low_border: f32,
    pub speed_up_border: f32,
    pub average_factor: f32,
    pub momentum: f32,
}

/// Per-parameter state for one buffer of trainable scalars.
///
/// Allocated once at session start and dropped when the session ends; the
/// parameters themselves live in the network.
#[derive(Debug, Clone)]
pub struct AdaptiveState {
    old_delta: Vec<f32>,
    derivative_average: Vec<f32>,
    learn_factor: Vec<f32>,
}

impl AdaptiveState {
    pub fn new(len: usize) -> Self {
        Self {
            old_delta: vec![0.0; len],
            derivative_average: vec![0.0; len],
            learn_factor: vec![1.0; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.learn_factor.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.learn_factor.is_empty()
    }

    /// Current per-parameter learn factors (bounds are a tested invariant).
    #[inline]
    pub fn learn_factors(&self) -> &[f32] {
        &self.learn_factor
    }

    /// Apply one adaptive step to `params`, consuming and zeroing
    /// `package_derivative`.
    ///
    /// The effective derivative of parameter `p` is
    /// `package_factor * package_derivative - reg_scale * reg.derivative(p)`.
    ///
    /// Shape contract: `params`, `package_derivative` and this state all have
    /// equal length.
    pub fn step(
        &mut self,
        params: &mut [f32],
        package_derivative: &mut [f32],
        rule: &AdaptiveRule,
        learn_speed: f32,
        package_factor: f32,
        regularization: Regularization,
        reg_scale: f32,
    ) {
        assert_eq!(params.len(), self.learn_factor.len());
        assert_eq!(package_derivative.len(), self.learn_factor.len());

        params
            .par_iter_mut()
            .zip(package_derivative.par_iter_mut())
            .zip(self.derivative_average.par_iter_mut())
            .zip(self.learn_factor.par_iter_mut())
            .zip(self.old_delta.par_iter_mut())
            .with_min_len(STEP_GRAIN)
            .for_each(|((((p, pd), avg), lf), od)| {
                let derivative =
                    package_factor * *pd - reg_scale * regularization.derivative(*p);
                *pd = 0.0;

                *lf = if *avg * derivative > 0.0 {
                    (*lf + rule.speed_bonus).min(rule.speed_up_border)
                } else {
                    (*lf * rule.speed_penalty).max(rule.speed_low_border)
                };
                *avg = rule.average_factor * derivative
                    + (1.0 - rule.average_factor) * *avg;

                let delta = learn_speed * *lf * derivative + rule.momentum * *od;
                *od = delta;
                *p += (1.0 + rule.momentum) * delta;
            });
    }

    /// Like [`AdaptiveState::step`], additionally updating a fast-weight
    /// overlay from the same effective derivative:
    /// `fast = fast_decay * fast + fast_learn_speed * derivative`.
    ///
    /// Used by Fast-PCD, where regular weights follow the full adaptive rule
    /// and the fast overlay follows plain exponential decay with no momentum
    /// or adaptivity.
    #[allow(clippy::too_many_arguments)]
    pub fn step_with_fast(
        &mut self,
        params: &mut [f32],
        fast: &mut [f32],
        package_derivative: &mut [f32],
        rule: &AdaptiveRule,
        learn_speed: f32,
        fast_learn_speed: f32,
        fast_decay: f32,
        package_factor: f32,
        regularization: Regularization,
        reg_scale: f32,
    ) {
        assert_eq!(params.len(), self.learn_factor.len());
        assert_eq!(fast.len(), self.learn_factor.len());
        assert_eq!(package_derivative.len(), self.learn_factor.len());

        params
            .par_iter_mut()
            .zip(fast.par_iter_mut())
            .zip(package_derivative.par_iter_mut())
            .zip(self.derivative_average.par_iter_mut())
            .zip(self.learn_factor.par_iter_mut())
            .zip(self.old_delta.par_iter_mut())
            .with_min_len(STEP_GRAIN)
            .for_each(|(((((p, fw), pd), avg), lf), od)| {
                let derivative =
                    package_factor * *pd - reg_scale * regularization.derivative(*p);
                *pd = 0.0;

                *lf = if *avg * derivative > 0.0 {
                    (*lf + rule.speed_bonus).min(rule.speed_up_border)
                } else {
                    (*lf * rule.speed_penalty).max(rule.speed_low_border)
                };
                *avg = rule.average_factor * derivative
                    + (1.0 - rule.average_factor) * *avg;

                let delta = learn_speed * *lf * derivative + rule.momentum * *od;
                *od = delta;
                *p += (1.0 + rule.momentum) * delta;

                *fw = fast_decay * *fw + fast_learn_speed * derivative;
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> AdaptiveRule {
        AdaptiveRule {
            speed_bonus: 0.05,
            speed_penalty: 0.85,
            speed_low_border: 0.01,
            speed_up_border: 100.0,
            average_factor: 0.5,
            momentum: 0.0,
        }
    }

    #[test]
    fn learn_factor_stays_within_borders() {
        let rule = rule();
        let mut state = AdaptiveState::new(1);
        let mut param = [0.0_f32];

        // Constant positive derivative for many steps: factor must saturate
        // at the upper border, never beyond.
        for _ in 0..5000 {
            let mut pd = [1.0_f32];
            state.step(&mut param, &mut pd, &rule, 1e-6, 1.0, Regularization::None, 0.0);
            let lf = state.learn_factors()[0];
            assert!(lf >= rule.speed_low_border && lf <= rule.speed_up_border);
        }
        assert!((state.learn_factors()[0] - rule.speed_up_border).abs() < 1e-3);

        // Alternating sign: factor must decay down to the lower border.
        let mut sign = 1.0_f32;
        for _ in 0..5000 {
            let mut pd = [sign];
            sign = -sign;
            state.step(&mut param, &mut pd, &rule, 1e-6, 1.0, Regularization::None, 0.0);
            let lf = state.learn_factors()[0];
            assert!(lf >= rule.speed_low_border && lf <= rule.speed_up_border);
        }
        assert!((state.learn_factors()[0] - rule.speed_low_border).abs() < 1e-3);
    }

    #[test]
    fn sign_agreement_grows_the_factor_monotonically() {
        let rule = rule();
        let mut state = AdaptiveState::new(1);
        let mut param = [0.0_f32];
        let mut last = 0.0_f32;
        for step in 0..50 {
            let mut pd = [0.5_f32];
            state.step(&mut param, &mut pd, &rule, 1e-6, 1.0, Regularization::None, 0.0);
            let lf = state.learn_factors()[0];
            if step > 0 {
                assert!(lf >= last, "factor shrank under constant sign");
            }
            last = lf;
        }
    }

    #[test]
    fn step_consumes_the_package_derivative() {
        let mut state = AdaptiveState::new(3);
        let mut params = [1.0_f32, -1.0, 0.5];
        let mut pd = [0.3_f32, -0.3, 0.0];
        state.step(&mut params, &mut pd, &rule(), 0.1, 1.0, Regularization::None, 0.0);
        assert_eq!(pd, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn momentum_doubles_the_first_step_contribution() {
        let rule = AdaptiveRule { momentum: 0.9, ..rule() };
        let mut state = AdaptiveState::new(1);
        let mut param = [0.0_f32];
        let mut pd = [1.0_f32];
        state.step(&mut param, &mut pd, &rule, 0.1, 1.0, Regularization::None, 0.0);
        // First step: delta = speed * lf * d (old delta is zero); the applied
        // change is (1 + momentum) * delta. Factor shrank once from 1.0
        // because the average starts at zero (no sign agreement).
        let lf = 1.0 * rule.speed_penalty;
        let expected = (1.0 + 0.9) * 0.1 * lf;
        assert!((param[0] - expected).abs() < 1e-6, "{} vs {expected}", param[0]);
    }

    #[test]
    fn regularization_pulls_parameters_toward_zero() {
        let rule = rule();
        let mut state = AdaptiveState::new(1);
        let mut param = [2.0_f32];
        for _ in 0..200 {
            let mut pd = [0.0_f32];
            state.step(
                &mut param,
                &mut pd,
                &rule,
                0.05,
                1.0,
                Regularization::L2 { factor: 0.5 },
                1.0,
            );
        }
        assert!(param[0].abs() < 2.0, "L2 derivative did not shrink the weight");
    }

    #[test]
    fn fast_overlay_decays_without_gradient() {
        let rule = rule();
        let mut state = AdaptiveState::new(1);
        let mut param = [0.0_f32];
        let mut fast = [1.0_f32];
        for _ in 0..10 {
            let mut pd = [0.0_f32];
            state.step_with_fast(
                &mut param,
                &mut fast,
                &mut pd,
                &rule,
                0.1,
                0.1,
                0.5,
                1.0,
                Regularization::None,
                0.0,
            );
        }
        assert!((fast[0] - 0.5_f32.powi(10)).abs() < 1e-6);
    }
}

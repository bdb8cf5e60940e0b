//! Error metrics.
//!
//! A metric plays two roles: it measures the per-example error reported after
//! each epoch, and its partial derivative with respect to the network output
//! seeds the backward pass. Both trainers consume the same contract.
//!
//! Degenerate numeric inputs (`ln 0` in the likelihood metrics) propagate as
//! NaN/Inf without detection; the scenario tests assert finiteness instead.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported error metrics.
pub enum Metric {
    /// `0.5 * Σ (target - output)²`.
    HalfSquaredEuclidean,
    /// `-Σ target · ln(output)`, paired with a softmax output layer.
    ///
    /// The partial derivative `output - target` already folds in the softmax
    /// Jacobian, which is why the softmax activation passes factors through
    /// unchanged.
    CrossEntropySoftmax,
    /// Element-wise Bernoulli log-likelihood
    /// `-Σ [t·ln(y) + (1-t)·ln(1-y)]`.
    LogLikelihood,
    /// Count of components differing by more than `f32::EPSILON`.
    ///
    /// Evaluation-only: its partial derivative is zero everywhere, so it
    /// cannot drive backpropagation. Typical use is RBM reconstruction error
    /// over binary units.
    Hamming,
}

impl Metric {
    /// Validate the metric choice for a training role.
    ///
    /// `for_training` rejects metrics without a usable derivative.
    pub fn validate(self, for_training: bool) -> Result<()> {
        if for_training && self == Metric::Hamming {
            return Err(Error::InvalidConfig(
                "Hamming has a zero derivative and cannot train an MLP".to_owned(),
            ));
        }
        Ok(())
    }

    /// Compute the error between a target vector and a produced output.
    ///
    /// Shape contract: `target.len() == output.len()`.
    pub fn calculate(self, target: &[f32], output: &[f32]) -> f32 {
        debug_assert_eq!(target.len(), output.len());

        match self {
            Metric::HalfSquaredEuclidean => {
                let mut sum = 0.0_f32;
                for i in 0..target.len() {
                    let diff = target[i] - output[i];
                    sum = diff.mul_add(diff, sum);
                }
                0.5 * sum
            }
            Metric::CrossEntropySoftmax => {
                let mut sum = 0.0_f32;
                for i in 0..target.len() {
                    sum += target[i] * output[i].ln();
                }
                -sum
            }
            Metric::LogLikelihood => {
                let mut sum = 0.0_f32;
                for i in 0..target.len() {
                    let t = target[i];
                    let y = output[i];
                    sum += t * y.ln() + (1.0 - t) * (1.0 - y).ln();
                }
                -sum
            }
            Metric::Hamming => {
                let mut num = 0usize;
                for i in 0..target.len() {
                    if (target[i] - output[i]).abs() > f32::EPSILON {
                        num += 1;
                    }
                }
                num as f32
            }
        }
    }

    /// Write `dE/d(output)` into `d_output`.
    ///
    /// Shape contract: all three slices have equal length.
    pub fn partial_derivative(self, target: &[f32], output: &[f32], d_output: &mut [f32]) {
        debug_assert_eq!(target.len(), output.len());
        debug_assert_eq!(target.len(), d_output.len());

        match self {
            // The softmax Jacobian contracts with the cross-entropy gradient
            // to the same `output - target` form as the Euclidean case.
            Metric::HalfSquaredEuclidean | Metric::CrossEntropySoftmax => {
                for i in 0..target.len() {
                    d_output[i] = output[i] - target[i];
                }
            }
            Metric::LogLikelihood => {
                for i in 0..target.len() {
                    let t = target[i];
                    let y = output[i];
                    d_output[i] = -t / y + (1.0 - t) / (1.0 - y);
                }
            }
            Metric::Hamming => d_output.fill(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_partial(metric: Metric, target: &[f32], output: &[f32], i: usize) -> f32 {
        let eps = 1e-3_f32;
        let mut plus = output.to_vec();
        plus[i] += eps;
        let mut minus = output.to_vec();
        minus[i] -= eps;
        (metric.calculate(target, &plus) - metric.calculate(target, &minus)) / (2.0 * eps)
    }

    #[test]
    fn half_squared_euclidean_matches_numeric_gradient() {
        let target = [0.2_f32, 0.9, -0.3];
        let output = [0.5_f32, 0.4, 0.1];
        let mut d = [0.0_f32; 3];
        Metric::HalfSquaredEuclidean.partial_derivative(&target, &output, &mut d);
        for i in 0..3 {
            let numeric = numeric_partial(Metric::HalfSquaredEuclidean, &target, &output, i);
            assert!((d[i] - numeric).abs() < 1e-2, "component {i}: {} vs {numeric}", d[i]);
        }
    }

    #[test]
    fn log_likelihood_matches_numeric_gradient() {
        let target = [1.0_f32, 0.0, 1.0];
        let output = [0.7_f32, 0.3, 0.6];
        let mut d = [0.0_f32; 3];
        Metric::LogLikelihood.partial_derivative(&target, &output, &mut d);
        for i in 0..3 {
            let numeric = numeric_partial(Metric::LogLikelihood, &target, &output, i);
            assert!((d[i] - numeric).abs() < 1e-1, "component {i}: {} vs {numeric}", d[i]);
        }
    }

    #[test]
    fn cross_entropy_prefers_the_correct_class() {
        let target = [1.0_f32, 0.0, 0.0];
        let good = [0.8_f32, 0.1, 0.1];
        let bad = [0.1_f32, 0.1, 0.8];
        assert!(
            Metric::CrossEntropySoftmax.calculate(&target, &good)
                < Metric::CrossEntropySoftmax.calculate(&target, &bad)
        );
    }

    #[test]
    fn hamming_counts_differing_components() {
        let target = [1.0_f32, 0.0, 1.0, 0.0];
        let output = [1.0_f32, 1.0, 0.0, 0.0];
        assert_eq!(Metric::Hamming.calculate(&target, &output), 2.0);
        assert!(Metric::Hamming.validate(true).is_err());
        assert!(Metric::Hamming.validate(false).is_ok());
    }
}

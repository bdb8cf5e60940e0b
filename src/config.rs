//! Training-session configuration.
//!
//! One settings struct feeds both trainers; the RBM-only knobs (Gibbs steps,
//! gradient strategy, fast-weight decay) live on the RBM trainer's method
//! enum instead. Validation runs once when a trainer is built, never in the
//! hot path.

use crate::adaptive::AdaptiveRule;
use crate::{Error, LearnRateSchedule, Metric, Regularization, Result};

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Error metric, reported per epoch and (for the MLP) differentiated to
    /// seed the backward pass.
    pub metric: Metric,
    pub regularization: Regularization,
    /// Train-error threshold that ends training.
    pub epsilon: f32,
    pub max_epochs: usize,
    /// Mini-batch ("package") size.
    pub package_size: usize,
    /// Plateau tolerance on the sliding held-out error.
    pub cv_limit: f32,
    /// EMA factor for the sliding held-out error.
    pub cv_sliding_factor: f32,
    /// Epochs during which the plateau check is skipped.
    pub cv_warmup_epochs: usize,
    pub base_learn_speed: f32,
    /// Additive learn-factor growth on sign agreement.
    pub speed_bonus: f32,
    /// Multiplicative learn-factor shrink on sign flip, in (0, 1].
    pub speed_penalty: f32,
    pub speed_low_border: f32,
    pub speed_up_border: f32,
    /// EMA factor of the signed-derivative average.
    pub average_factor: f32,
    pub momentum: f32,
    /// Epoch schedule for the regular learn speed.
    pub learn_rate: LearnRateSchedule,
    /// Epoch schedule for the Fast-PCD fast-weight learn speed.
    pub added_learn_rate: LearnRateSchedule,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            metric: Metric::HalfSquaredEuclidean,
            regularization: Regularization::None,
            epsilon: 1e-3,
            max_epochs: 1000,
            package_size: 10,
            cv_limit: f32::INFINITY,
            cv_sliding_factor: 0.1,
            cv_warmup_epochs: 10,
            base_learn_speed: 0.01,
            speed_bonus: 0.05,
            speed_penalty: 0.85,
            speed_low_border: 0.01,
            speed_up_border: 100.0,
            average_factor: 0.1,
            momentum: 0.9,
            learn_rate: LearnRateSchedule::default(),
            added_learn_rate: LearnRateSchedule::default(),
        }
    }
}

impl TrainConfig {
    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.regularization.validate()?;
        self.learn_rate.validate()?;
        self.added_learn_rate.validate()?;

        if self.package_size == 0 {
            return Err(Error::InvalidConfig("package_size must be > 0".to_owned()));
        }
        if self.max_epochs == 0 {
            return Err(Error::InvalidConfig("max_epochs must be > 0".to_owned()));
        }
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "epsilon must be finite and >= 0, got {}",
                self.epsilon
            )));
        }
        if !(self.base_learn_speed.is_finite() && self.base_learn_speed > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "base_learn_speed must be finite and > 0, got {}",
                self.base_learn_speed
            )));
        }
        if !(self.speed_bonus.is_finite() && self.speed_bonus >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "speed_bonus must be finite and >= 0, got {}",
                self.speed_bonus
            )));
        }
        if !(self.speed_penalty.is_finite() && self.speed_penalty > 0.0 && self.speed_penalty <= 1.0)
        {
            return Err(Error::InvalidConfig(format!(
                "speed_penalty must be in (0, 1], got {}",
                self.speed_penalty
            )));
        }
        if !(self.speed_low_border.is_finite() && self.speed_low_border > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "speed_low_border must be finite and > 0, got {}",
                self.speed_low_border
            )));
        }
        if !(self.speed_up_border.is_finite() && self.speed_up_border >= self.speed_low_border) {
            return Err(Error::InvalidConfig(format!(
                "speed_up_border must be finite and >= speed_low_border, got {}",
                self.speed_up_border
            )));
        }
        if !(self.average_factor.is_finite() && (0.0..=1.0).contains(&self.average_factor)) {
            return Err(Error::InvalidConfig(format!(
                "average_factor must be in [0, 1], got {}",
                self.average_factor
            )));
        }
        if !(self.momentum.is_finite() && (0.0..1.0).contains(&self.momentum)) {
            return Err(Error::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if !(self.cv_limit > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "cv_limit must be > 0, got {}",
                self.cv_limit
            )));
        }
        if !(self.cv_sliding_factor.is_finite()
            && (0.0..=1.0).contains(&self.cv_sliding_factor))
        {
            return Err(Error::InvalidConfig(format!(
                "cv_sliding_factor must be in [0, 1], got {}",
                self.cv_sliding_factor
            )));
        }
        Ok(())
    }

    pub(crate) fn adaptive_rule(&self) -> AdaptiveRule {
        AdaptiveRule {
            speed_bonus: self.speed_bonus,
            speed_penalty: self.speed_penalty,
            speed_low_border: self.speed_low_border,
            speed_up_border: self.speed_up_border,
            average_factor: self.average_factor,
            momentum: self.momentum,
        }
    }

    /// Effective learn speed of a 1-based epoch.
    #[inline]
    pub(crate) fn learn_speed(&self, epoch: usize) -> f32 {
        self.base_learn_speed * self.learn_rate.factor(epoch)
    }

    /// Effective fast-weight learn speed of a 1-based epoch (Fast-PCD).
    #[inline]
    pub(crate) fn added_learn_speed(&self, epoch: usize) -> f32 {
        self.base_learn_speed * self.added_learn_rate.factor(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_package_size_is_rejected() {
        let config = TrainConfig { package_size: 0, ..TrainConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn border_ordering_is_enforced() {
        let config = TrainConfig {
            speed_low_border: 10.0,
            speed_up_border: 1.0,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn momentum_must_stay_below_one() {
        let config = TrainConfig { momentum: 1.0, ..TrainConfig::default() };
        assert!(config.validate().is_err());
        let config = TrainConfig { momentum: 0.0, ..TrainConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn infinite_cv_limit_is_allowed() {
        // No held-out plateau check intended: an infinite tolerance always
        // passes.
        let config = TrainConfig { cv_limit: f32::INFINITY, ..TrainConfig::default() };
        assert!(config.validate().is_ok());
    }
}

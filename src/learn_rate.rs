//! Learn-rate schedules.
//!
//! The effective learn speed of an epoch is `base_learn_speed *
//! schedule.factor(epoch)`; epochs are numbered from 1. The Fast-PCD trainer
//! carries a second schedule for its fast-weight overlay.

use crate::{Error, Result};

const EPOCH_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Multiplier applied to the base learn speed per epoch.
pub enum LearnRateSchedule {
    /// Fixed multiplier.
    Constant { value: f32 },
    /// `1 / epoch`.
    Reciprocal,
    /// `1 / sqrt(epoch)`.
    ReciprocalSqrt,
    /// Linear interpolation from `start` at epoch 1 to `end` at epoch
    /// `steps`, extrapolated on the same line afterwards.
    Linear { start: f32, end: f32, steps: usize },
}

impl Default for LearnRateSchedule {
    fn default() -> Self {
        LearnRateSchedule::Constant { value: 1.0 }
    }
}

impl LearnRateSchedule {
    /// Validate schedule parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            LearnRateSchedule::Constant { value } => {
                if !(value.is_finite() && value > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "constant learn factor must be finite and > 0, got {value}"
                    )));
                }
            }
            LearnRateSchedule::Linear { start, end, .. } => {
                if !(start.is_finite() && start > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "linear schedule start must be finite and > 0, got {start}"
                    )));
                }
                if !(end.is_finite() && end > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "linear schedule end must be finite and > 0, got {end}"
                    )));
                }
            }
            LearnRateSchedule::Reciprocal | LearnRateSchedule::ReciprocalSqrt => {}
        }
        Ok(())
    }

    /// Multiplier for a 1-based epoch number.
    #[inline]
    pub fn factor(self, epoch: usize) -> f32 {
        match self {
            LearnRateSchedule::Constant { value } => value,
            LearnRateSchedule::Reciprocal => 1.0 / (epoch as f32 + EPOCH_EPSILON),
            LearnRateSchedule::ReciprocalSqrt => 1.0 / (epoch as f32 + EPOCH_EPSILON).sqrt(),
            LearnRateSchedule::Linear { start, end, steps } => {
                if steps <= 1 {
                    return start;
                }
                let a = (end - start) / (steps as f32 - 1.0);
                let b = start - a;
                a * epoch as f32 + b
            }
        }
    }
}

//! Iterative training-process contract.
//!
//! Both trainers share the same session state machine:
//! `NotStarted → InProgress → {Stopped, Finished}`. A first `start()` call
//! allocates the per-parameter session state, the epoch loop runs until a
//! stop condition or a cancellation request, and either terminal transition
//! releases the session-scoped buffers (the trained weights live in the
//! network and persist). Further `start()` calls are no-ops.
//!
//! Cancellation is cooperative: a [`StopToken`] flips a shared flag that the
//! loop observes at epoch boundaries only, so an in-flight epoch always
//! completes. Notifications are delivered synchronously on the training
//! thread through [`TrainObserver`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    InProgress,
    Stopped,
    Finished,
}

/// Shared cancellation flag for a training session.
///
/// Clone it out of the trainer before `start()` and trip it from an observer
/// callback or another thread; the epoch in flight finishes before the loop
/// exits with [`SessionState::Stopped`].
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Synchronous training notifications.
///
/// `test_error` is NaN when no held-out data was supplied.
pub trait TrainObserver {
    fn epoch_completed(&mut self, _epoch: usize, _train_error: f32, _test_error: f32) {}

    fn process_finished(&mut self, _epoch_count: usize) {}
}

/// Observer that ignores all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl TrainObserver for NullObserver {}

/// Adapter turning a closure into a per-epoch observer.
///
/// ```rust
/// use neurotrain::ObserverFn;
///
/// let mut history = Vec::new();
/// let mut observer = ObserverFn(|epoch: usize, train_error: f32, _test: f32| {
///     history.push((epoch, train_error));
/// });
/// # let _ = &mut observer;
/// ```
pub struct ObserverFn<F>(pub F);

impl<F: FnMut(usize, f32, f32)> TrainObserver for ObserverFn<F> {
    fn epoch_completed(&mut self, epoch: usize, train_error: f32, test_error: f32) {
        (self.0)(epoch, train_error, test_error);
    }
}

/// Summary returned by `start()`.
#[derive(Debug, Clone, Copy)]
pub struct TrainReport {
    /// Epochs actually run.
    pub epochs: usize,
    /// Train error after the last epoch.
    pub train_error: f32,
    /// Held-out error after the last epoch; NaN without test data.
    pub test_error: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_token_is_shared_between_clones() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!token.is_stop_requested());
        clone.stop();
        assert!(token.is_stop_requested());
        token.reset();
        assert!(!clone.is_stop_requested());
    }

    #[test]
    fn closures_observe_epochs() {
        let mut seen = Vec::new();
        {
            let mut observer = ObserverFn(|epoch: usize, train: f32, _test: f32| {
                seen.push((epoch, train));
            });
            observer.epoch_completed(1, 0.5, f32::NAN);
            observer.epoch_completed(2, 0.25, f32::NAN);
        }
        assert_eq!(seen, vec![(1, 0.5), (2, 0.25)]);
    }
}

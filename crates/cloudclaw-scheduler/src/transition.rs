//! Firing outcomes and the pure reschedule decision.

use std::time::Duration;

/// What one timer firing observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiringOutcome {
    /// The task vanished or is no longer `running`; nothing was attempted.
    Inactive,
    /// Account or SSH key could not be resolved; nothing was attempted.
    ResolutionFailed { reason: String },
    /// The provisioning call failed with this extracted message.
    Failed { message: String },
    /// The provisioning call succeeded.
    Provisioned,
    /// The attempt ran, but the task left `running` meanwhile so its result
    /// was dropped.
    Discarded,
}

/// What the scheduler does with the task's timer after a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Reschedule(Duration),
    Retire,
}

/// A `running` task keeps retrying on every non-terminal failure, including
/// resolution failures; success and loss of `running` retire the timer.
pub fn next_step(outcome: &FiringOutcome, interval: Duration) -> NextStep {
    match outcome {
        FiringOutcome::Failed { .. } | FiringOutcome::ResolutionFailed { .. } => {
            NextStep::Reschedule(interval)
        }
        FiringOutcome::Provisioned | FiringOutcome::Inactive | FiringOutcome::Discarded => {
            NextStep::Retire
        }
    }
}

/// Configured interval, floor-clamped.
pub fn effective_interval(interval_secs: u64, min_interval: Duration) -> Duration {
    Duration::from_secs(interval_secs).max(min_interval)
}

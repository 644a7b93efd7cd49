//! Tracking state as observed from the engine's answers.

/// State of the tracking engine, inferred from its recent results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// No pose has been produced yet.
    #[default]
    NotInitialized,
    /// The last pair produced a pose.
    Ok,
    /// The engine failed on the last pair after having tracked before.
    Lost,
}

impl TrackingState {
    /// Next state after a pair was tracked (`true`) or failed (`false`).
    pub fn advance(self, tracked: bool) -> Self {
        match (self, tracked) {
            (_, true) => TrackingState::Ok,
            (TrackingState::NotInitialized, false) => TrackingState::NotInitialized,
            (_, false) => TrackingState::Lost,
        }
    }
}

/// Lifecycle of a track.
///
/// `New -> Tracked -> Lost -> Removed`, with `Lost -> Tracked` on
/// reactivation as the only way back. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Created, filter not yet initialized
    #[default]
    New,
    /// Matched recently, or still within its time-to-live
    Tracked,
    /// Time-to-live exhausted; may still be reactivated
    Lost,
    /// Dropped for good
    Removed,
}

impl TrackState {
    /// Tracks in this state take part in association.
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, TrackState::Tracked | TrackState::Lost)
    }
}

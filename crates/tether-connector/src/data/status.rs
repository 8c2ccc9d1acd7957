use std::fmt;

/// Counters reported through [`crate::Connector::on_progress_change`].
///
/// `finished` and `total` are scoped to the current wave: the tokens
/// submitted since the last "all processed" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub active: usize,
    pub finished: usize,
    pub total: usize,
}

impl Status {
    /// Fraction of the wave that has resolved, in `[0, 1]`.
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.finished as f32 / self.total as f32
        }
    }
}

/// Where a token currently is in the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Queued,
    Active,
    Finished,
    /// A clone waiting on the token that owns its fetch.
    Linked,
    /// Dispatched, transport kept alive because auto-dispose is off.
    Retained,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStatus::Queued => write!(f, "queued"),
            TokenStatus::Active => write!(f, "active"),
            TokenStatus::Finished => write!(f, "finished"),
            TokenStatus::Linked => write!(f, "linked"),
            TokenStatus::Retained => write!(f, "retained"),
        }
    }
}

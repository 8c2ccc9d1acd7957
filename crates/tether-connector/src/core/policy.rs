use crate::data::ConcurrencyMode;

/// What one tick does with the queue, as indices into the queued list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Promotion {
    /// Queued indices to start, in start order.
    pub promote: Vec<usize>,
    /// Queued indices dropped without starting.
    pub discard: Vec<usize>,
    /// Whether every in-flight request must be abandoned first.
    pub abandon_active: bool,
}

/// Decide which queued requests start this tick.
///
/// `limit` only applies to the queued modes; the single modes always cap the
/// in-flight count at one.
///
/// # Examples
///
/// ```
/// use tether_connector::ConcurrencyMode;
/// use tether_connector::core::plan_promotion;
///
/// let plan = plan_promotion(ConcurrencyMode::FiloQueued, 5, 1, 3);
/// assert_eq!(plan.promote, vec![4, 3]);
/// assert!(plan.discard.is_empty());
/// ```
pub fn plan_promotion(mode: ConcurrencyMode, queued: usize, active: usize, limit: usize) -> Promotion {
    if queued == 0 {
        return Promotion::default();
    }

    match mode {
        ConcurrencyMode::Multiple => Promotion {
            promote: (0..queued).collect(),
            ..Promotion::default()
        },
        ConcurrencyMode::SingleFirst if active > 0 => Promotion {
            discard: (0..queued).collect(),
            ..Promotion::default()
        },
        ConcurrencyMode::SingleFirst => Promotion {
            promote: vec![0],
            discard: (1..queued).collect(),
            abandon_active: false,
        },
        ConcurrencyMode::SingleLast => Promotion {
            promote: vec![queued - 1],
            discard: (0..queued - 1).collect(),
            abandon_active: active > 0,
        },
        ConcurrencyMode::FifoQueued => {
            let slots = limit.max(1).saturating_sub(active).min(queued);
            Promotion {
                promote: (0..slots).collect(),
                ..Promotion::default()
            }
        }
        ConcurrencyMode::FiloQueued => {
            let slots = limit.max(1).saturating_sub(active).min(queued);
            Promotion {
                promote: (queued - slots..queued).rev().collect(),
                ..Promotion::default()
            }
        }
    }
}

/// Length of the leading run of `order` for which `is_finished` holds.
///
/// Ordered dispatch hands out exactly this prefix: a finished request waits
/// for every request submitted before it.
pub fn ready_prefix<T>(order: impl IntoIterator<Item = T>, is_finished: impl Fn(&T) -> bool) -> usize {
    order.into_iter().take_while(|item| is_finished(item)).count()
}

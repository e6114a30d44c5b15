//! Duration → slot-count mapping for calendar cards.
//!
//! Rendering code asks here how many grid rows a booking spans instead of
//! redoing the duration math itself.

use crate::model::Minutes;

pub const DEFAULT_GRANULARITY: Minutes = 30;

/// Number of grid slots a session of `duration` minutes covers, rounded up.
/// A zero granularity covers nothing.
pub fn slots_occupied(duration: Minutes, granularity: Minutes) -> u32 {
    if granularity == 0 {
        return 0;
    }
    duration.div_ceil(granularity)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardSize {
    /// Fits in one slot row.
    Compact,
    Expanded,
}

impl CardSize {
    pub fn for_duration(duration: Minutes, granularity: Minutes) -> Self {
        if slots_occupied(duration, granularity) <= 1 {
            CardSize::Compact
        } else {
            CardSize::Expanded
        }
    }
}

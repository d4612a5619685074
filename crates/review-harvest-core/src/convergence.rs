//! Watermark convergence for incremental review collection.
//!
//! A source lists reviews newest-first. Once a review at or below the
//! stored watermark shows up, everything after it is already in the store
//! and the pass for that target can stop.
//!
//! The ordering assumption is never guaranteed by the source. If a page
//! lists an older review above a newer one, early termination can skip
//! reviews that were never stored. That is an accepted approximation: the
//! tracker only detects and counts such inversions so the caller can warn.

use chrono::NaiveDateTime;

/// What to do with one observed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Store the record and keep going.
    Collect,
    /// Store the record and keep going, but it is newer than the record
    /// before it, so the source is not sorted by recency.
    CollectOutOfOrder,
    /// The record is at or below the watermark; stop this target.
    Converged,
}

#[derive(Debug, Clone)]
pub struct ConvergenceTracker {
    watermark: Option<NaiveDateTime>,
    last_seen: Option<NaiveDateTime>,
    out_of_order: usize,
}

impl ConvergenceTracker {
    pub fn new(watermark: Option<NaiveDateTime>) -> Self {
        Self {
            watermark,
            last_seen: None,
            out_of_order: 0,
        }
    }

    pub fn watermark(&self) -> Option<NaiveDateTime> {
        self.watermark
    }

    pub fn out_of_order(&self) -> usize {
        self.out_of_order
    }

    /// Decide on a record given its timestamp.
    ///
    /// A null timestamp is always collected and leaves the tracked state
    /// untouched: its position relative to other records is unknown.
    pub fn observe(&mut self, timestamp: Option<NaiveDateTime>) -> Decision {
        let ts = match timestamp {
            Some(ts) => ts,
            None => return Decision::Collect,
        };

        if let Some(watermark) = self.watermark {
            if ts <= watermark {
                return Decision::Converged;
            }
        }

        let decision = match self.last_seen {
            Some(prev) if ts > prev => {
                self.out_of_order += 1;
                Decision::CollectOutOfOrder
            }
            _ => Decision::Collect,
        };
        self.last_seen = Some(ts);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn empty_store_never_converges() {
        let mut tracker = ConvergenceTracker::new(None);
        assert_eq!(tracker.observe(Some(t(3))), Decision::Collect);
        assert_eq!(tracker.observe(Some(t(2))), Decision::Collect);
        assert_eq!(tracker.observe(Some(t(1))), Decision::Collect);
    }

    #[test]
    fn converges_at_equal_timestamp() {
        let mut tracker = ConvergenceTracker::new(Some(t(3)));
        assert_eq!(tracker.observe(Some(t(4))), Decision::Collect);
        assert_eq!(tracker.observe(Some(t(3))), Decision::Converged);
    }

    #[test]
    fn null_timestamp_is_collected_even_below_watermark() {
        let mut tracker = ConvergenceTracker::new(Some(t(10)));
        assert_eq!(tracker.observe(None), Decision::Collect);
        assert_eq!(tracker.observe(None), Decision::Collect);
        assert_eq!(tracker.observe(Some(t(9))), Decision::Converged);
    }

    #[test]
    fn null_timestamp_does_not_advance_ordering() {
        let mut tracker = ConvergenceTracker::new(None);
        assert_eq!(tracker.observe(Some(t(5))), Decision::Collect);
        assert_eq!(tracker.observe(None), Decision::Collect);
        // Compared against t(5), not against the null in between.
        assert_eq!(tracker.observe(Some(t(4))), Decision::Collect);
        assert_eq!(tracker.out_of_order(), 0);
    }

    #[test]
    fn detects_inversions_without_stopping() {
        let mut tracker = ConvergenceTracker::new(Some(t(1)));
        assert_eq!(tracker.observe(Some(t(4))), Decision::Collect);
        assert_eq!(tracker.observe(Some(t(6))), Decision::CollectOutOfOrder);
        assert_eq!(tracker.observe(Some(t(5))), Decision::Collect);
        assert_eq!(tracker.out_of_order(), 1);
        assert_eq!(tracker.watermark(), Some(t(1)));
    }
}

use std::time::Duration;

use metrics::counter;
use moka::sync::Cache;
use tracing::debug;

/// Short-lived memory of (session, identifier) pairs already accepted through the
/// single-event path, absorbing a badge held in front of the camera twice.
///
/// Entries expire a fixed window after their first sighting, later sightings do
/// not extend it. Best-effort only: it is local to the process and two racing
/// submissions can both get through.
#[derive(Clone)]
pub struct DedupGate {
    cache: Cache<(String, String), ()>,
    window: Duration,
}

impl DedupGate {
    pub fn new(window: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(window)
            .max_capacity(max_capacity)
            .build();

        Self { cache, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true if the pair was already seen within the window, marks it otherwise.
    pub fn check_and_mark(&self, session_id: &str, identifier: &str) -> bool {
        let entry = self
            .cache
            .entry((session_id.to_string(), identifier.to_string()))
            .or_insert(());

        let duplicate = !entry.is_fresh();
        if duplicate {
            counter!("scan_capture_dedup_suppressed_total").increment(1);
        }
        duplicate
    }

    /// Drops a mark whose row never made it to the log, so a retry is not
    /// suppressed.
    pub fn forget(&self, session_id: &str, identifier: &str) {
        self.cache
            .invalidate(&(session_id.to_string(), identifier.to_string()));
    }

    /// Like [`DedupGate::check_and_mark`], but a fresh mark comes back as a
    /// [`PendingMark`] that is released again unless the caller keeps it.
    /// Returns `None` for a duplicate.
    pub fn mark_pending(&self, session_id: &str, identifier: &str) -> Option<PendingMark<'_>> {
        if self.check_and_mark(session_id, identifier) {
            return None;
        }

        Some(PendingMark {
            gate: self,
            key: Some((session_id.to_string(), identifier.to_string())),
        })
    }
}

/// A dedup mark for a row that is not in the log yet.
///
/// Dropping it forgets the mark, whether the commit failed or the call was
/// cancelled halfway. Call [`PendingMark::keep`] once the row is written.
pub struct PendingMark<'a> {
    gate: &'a DedupGate,
    key: Option<(String, String)>,
}

impl PendingMark<'_> {
    pub fn keep(mut self) {
        self.key = None;
    }
}

impl Drop for PendingMark<'_> {
    fn drop(&mut self) {
        if let Some((session_id, identifier)) = self.key.take() {
            debug!(%session_id, %identifier, "releasing dedup mark of an unwritten scan");
            self.gate.forget(&session_id, &identifier);
        }
    }
}

impl std::fmt::Debug for DedupGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupGate")
            .field("window", &self.window)
            .field("cache", &"<moka cache>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn second_sighting_is_a_duplicate() {
        let gate = DedupGate::new(Duration::from_secs(10), 100);

        assert!(!gate.check_and_mark("s1", "2026001"));
        assert!(gate.check_and_mark("s1", "2026001"));
        assert!(gate.check_and_mark("s1", "2026001"));
    }

    #[test]
    fn pairs_are_isolated() {
        let gate = DedupGate::new(Duration::from_secs(10), 100);

        assert!(!gate.check_and_mark("s1", "2026001"));
        assert!(!gate.check_and_mark("s2", "2026001"));
        assert!(!gate.check_and_mark("s1", "2026002"));

        assert!(gate.check_and_mark("s2", "2026001"));
    }

    #[test]
    fn expires_after_window() {
        let gate = DedupGate::new(Duration::from_millis(100), 100);

        assert!(!gate.check_and_mark("s1", "2026001"));
        assert!(gate.check_and_mark("s1", "2026001"));

        thread::sleep(Duration::from_millis(150));

        assert!(!gate.check_and_mark("s1", "2026001"));
    }

    #[test]
    fn repeat_sightings_do_not_extend_the_window() {
        let gate = DedupGate::new(Duration::from_millis(200), 100);

        assert!(!gate.check_and_mark("s1", "2026001"));
        thread::sleep(Duration::from_millis(120));
        assert!(gate.check_and_mark("s1", "2026001"));
        thread::sleep(Duration::from_millis(120));

        // 240ms after the first sighting, the window is over despite the
        // duplicate at 120ms
        assert!(!gate.check_and_mark("s1", "2026001"));
    }

    #[test]
    fn pending_mark_is_released_unless_kept() {
        let gate = DedupGate::new(Duration::from_secs(10), 100);

        let dropped = gate.mark_pending("s1", "2026001");
        assert!(dropped.is_some());
        assert!(gate.mark_pending("s1", "2026001").is_none());
        drop(dropped);

        let kept = gate.mark_pending("s1", "2026001").unwrap();
        kept.keep();
        assert!(gate.mark_pending("s1", "2026001").is_none());
    }

    #[test]
    fn forget_clears_the_mark() {
        let gate = DedupGate::new(Duration::from_secs(10), 100);

        assert!(!gate.check_and_mark("s1", "2026001"));
        gate.forget("s1", "2026001");
        assert!(!gate.check_and_mark("s1", "2026001"));
    }
}

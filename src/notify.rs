//! Transient, auto-expiring user-facing notifications.
//!
//! Each [`NotificationKind`] owns one message slot with an independent
//! expiry deadline. Setting a new message of a kind replaces the
//! previous one of that kind and restarts its countdown; expiry clears
//! only that kind's slot. The session loop drives expiry from its timer
//! branch via [`NotificationCenter::next_deadline`] and
//! [`NotificationCenter::expire_due`], so tearing the loop down drops
//! every pending timer with it.

use tokio::time::{Duration, Instant};

/// Default lifetime of a notification before it auto-expires.
pub const DEFAULT_NOTIFY_TTL: Duration = Duration::from_secs(2);

/// The classes of transient messages surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Gateway faults, grading reports, protocol errors.
    Error,
    /// Accepted submissions and other positive confirmations.
    Success,
    /// Transport trouble (opponent drop, local disconnect).
    ConnectionWarning,
}

const ALL_KINDS: [NotificationKind; 3] = [
    NotificationKind::Error,
    NotificationKind::Success,
    NotificationKind::ConnectionWarning,
];

#[derive(Debug, Clone)]
struct Slot {
    text: String,
    deadline: Instant,
}

/// Per-kind message slots with independent expiry deadlines.
#[derive(Debug)]
pub struct NotificationCenter {
    ttl: Duration,
    error: Option<Slot>,
    success: Option<Slot>,
    warning: Option<Slot>,
}

impl NotificationCenter {
    /// Create a center whose messages live for `ttl` after being set.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            error: None,
            success: None,
            warning: None,
        }
    }

    fn slot(&self, kind: NotificationKind) -> &Option<Slot> {
        match kind {
            NotificationKind::Error => &self.error,
            NotificationKind::Success => &self.success,
            NotificationKind::ConnectionWarning => &self.warning,
        }
    }

    fn slot_mut(&mut self, kind: NotificationKind) -> &mut Option<Slot> {
        match kind {
            NotificationKind::Error => &mut self.error,
            NotificationKind::Success => &mut self.success,
            NotificationKind::ConnectionWarning => &mut self.warning,
        }
    }

    /// Set (or replace) the message of `kind`, restarting its countdown
    /// from `now`.
    pub fn set(&mut self, kind: NotificationKind, text: impl Into<String>, now: Instant) {
        let deadline = now + self.ttl;
        *self.slot_mut(kind) = Some(Slot {
            text: text.into(),
            deadline,
        });
    }

    /// The currently visible message of `kind`, if any.
    pub fn current(&self, kind: NotificationKind) -> Option<&str> {
        self.slot(kind).as_ref().map(|s| s.text.as_str())
    }

    /// The earliest pending deadline across all kinds, if any slot is
    /// occupied. The session loop sleeps until this instant.
    pub fn next_deadline(&self) -> Option<Instant> {
        ALL_KINDS
            .iter()
            .filter_map(|&k| self.slot(k).as_ref().map(|s| s.deadline))
            .min()
    }

    /// Clear every slot whose deadline is at or before `now`, returning
    /// the kinds that expired.
    pub fn expire_due(&mut self, now: Instant) -> Vec<NotificationKind> {
        let mut expired = Vec::new();
        for kind in ALL_KINDS {
            let due = self.slot(kind).as_ref().is_some_and(|s| s.deadline <= now);
            if due {
                *self.slot_mut(kind) = None;
                expired.push(kind);
            }
        }
        expired
    }

    /// Drop every pending message and timer.
    pub fn clear_all(&mut self) {
        self.error = None;
        self.success = None;
        self.warning = None;
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_TTL)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn set_and_expire_single_kind() {
        let mut center = NotificationCenter::new(Duration::from_secs(2));
        let t0 = Instant::now();

        center.set(NotificationKind::Error, "boom", t0);
        assert_eq!(center.current(NotificationKind::Error), Some("boom"));

        // Not yet due.
        assert!(center.expire_due(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(center.current(NotificationKind::Error), Some("boom"));

        let expired = center.expire_due(t0 + Duration::from_secs(2));
        assert_eq!(expired, vec![NotificationKind::Error]);
        assert_eq!(center.current(NotificationKind::Error), None);
    }

    #[test]
    fn same_kind_replaces_and_restarts_timer() {
        let mut center = NotificationCenter::new(Duration::from_secs(2));
        let t0 = Instant::now();

        center.set(NotificationKind::Success, "first", t0);
        center.set(
            NotificationKind::Success,
            "second",
            t0 + Duration::from_secs(1),
        );

        // Only the second text is visible after the first's deadline,
        // and nothing expires at that point.
        assert!(center.expire_due(t0 + Duration::from_secs(2)).is_empty());
        assert_eq!(center.current(NotificationKind::Success), Some("second"));

        // Exactly one expiry fires, at the restarted deadline.
        let expired = center.expire_due(t0 + Duration::from_secs(3));
        assert_eq!(expired, vec![NotificationKind::Success]);
        assert!(center.expire_due(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn kinds_expire_independently() {
        let mut center = NotificationCenter::new(Duration::from_secs(2));
        let t0 = Instant::now();

        center.set(NotificationKind::Error, "err", t0);
        center.set(
            NotificationKind::ConnectionWarning,
            "warn",
            t0 + Duration::from_secs(1),
        );

        let expired = center.expire_due(t0 + Duration::from_secs(2));
        assert_eq!(expired, vec![NotificationKind::Error]);
        assert_eq!(
            center.current(NotificationKind::ConnectionWarning),
            Some("warn")
        );

        let expired = center.expire_due(t0 + Duration::from_secs(3));
        assert_eq!(expired, vec![NotificationKind::ConnectionWarning]);
    }

    #[test]
    fn next_deadline_is_earliest() {
        let mut center = NotificationCenter::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(center.next_deadline().is_none());

        center.set(NotificationKind::Error, "a", t0 + Duration::from_secs(5));
        center.set(NotificationKind::Success, "b", t0);
        assert_eq!(center.next_deadline(), Some(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn clear_all_drops_everything() {
        let mut center = NotificationCenter::default();
        let t0 = Instant::now();
        center.set(NotificationKind::Error, "a", t0);
        center.set(NotificationKind::Success, "b", t0);

        center.clear_all();
        assert!(center.next_deadline().is_none());
        assert!(center.expire_due(t0 + Duration::from_secs(60)).is_empty());
    }
}

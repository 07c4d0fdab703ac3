//! Bidirectional propagation of participant code buffers.
//!
//! The local participant's buffer is the only locally writable one;
//! every other buffer is a mirror of the last received update for that
//! participant. Local edits apply immediately (optimistic, no
//! round-trip wait) and the session emits the full buffer content over
//! the channel — never a diff.
//!
//! Inbound routing is role-aware:
//! - **Player**: an update whose id equals the local id is a self-echo
//!   and is ignored so the server can never overwrite local typing;
//!   anything else lands in the opponent mirror.
//! - **Spectator**: updates are routed to the left/right display slot
//!   by matching the id against roster position 0 or 1. An update that
//!   races ahead of roster population (fewer than two known entries) is
//!   discarded rather than misrouted.

use std::collections::HashMap;

use crate::protocol::{CodeUpdatePayload, ParticipantId};

/// Which display buffer an inbound update landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySlot {
    /// The single remote mirror in player mode.
    Opponent,
    /// Roster seat 0 in spectator mode.
    Left,
    /// Roster seat 1 in spectator mode.
    Right,
}

/// Code buffers for every participant visible to this session.
#[derive(Debug)]
pub struct CodeBuffers {
    local_id: ParticipantId,
    spectating: bool,
    roster: Vec<ParticipantId>,
    local: String,
    mirrors: HashMap<ParticipantId, String>,
}

impl CodeBuffers {
    /// Initial local buffer contents shown before a question is fetched.
    pub const DEFAULT_LOCAL: &'static str = "// Write your solution here\n";

    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            spectating: false,
            roster: Vec::new(),
            local: Self::DEFAULT_LOCAL.to_string(),
            mirrors: HashMap::new(),
        }
    }

    /// Switch to spectator routing. Called once when the
    /// joined-as-spectator event decides the role — never inferred from
    /// roster size.
    pub fn enter_spectator_mode(&mut self) {
        self.spectating = true;
    }

    /// Record the roster in seat order. Mirrors for departed
    /// participants are retained; routing only consults the roster.
    pub fn set_roster(&mut self, roster: Vec<ParticipantId>) {
        self.roster = roster;
    }

    /// Apply a local edit. The buffer updates immediately; the caller
    /// is responsible for emitting the outbound update.
    pub fn local_edit(&mut self, code: String) {
        self.local = code;
    }

    /// Replace the local buffer wholesale (question template install).
    pub fn set_local(&mut self, code: String) {
        self.local = code;
    }

    /// Seed a mirror directly (spectator snapshot).
    pub fn seed_mirror(&mut self, id: ParticipantId, code: String) {
        self.mirrors.insert(id, code);
    }

    /// Route an inbound code update. Returns the display slot it landed
    /// in, or `None` if the update was a self-echo or undeliverable.
    pub fn apply_remote(&mut self, update: CodeUpdatePayload) -> Option<DisplaySlot> {
        if self.spectating {
            // Roster not yet known with two entries: discard, do not guess.
            if self.roster.len() < 2 {
                tracing::debug!(
                    user_id = %update.user_id,
                    "dropping code update that outran roster population"
                );
                return None;
            }
            let slot = if self.roster.first() == Some(&update.user_id) {
                DisplaySlot::Left
            } else if self.roster.get(1) == Some(&update.user_id) {
                DisplaySlot::Right
            } else {
                tracing::debug!(user_id = %update.user_id, "code update for unknown participant");
                return None;
            };
            self.mirrors.insert(update.user_id, update.code);
            Some(slot)
        } else {
            if update.user_id == self.local_id {
                // Self-echo; local typing is authoritative.
                return None;
            }
            self.mirrors.insert(update.user_id, update.code);
            Some(DisplaySlot::Opponent)
        }
    }

    /// Clear a remote participant's mirror (opponent drop).
    pub fn clear_mirror(&mut self, id: &str) {
        self.mirrors.remove(id);
    }

    /// Clear every remote mirror except the local participant's buffer.
    pub fn clear_remote_mirrors(&mut self) {
        self.mirrors.clear();
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    /// The last received contents for `id`, if any.
    pub fn mirror(&self, id: &str) -> Option<&str> {
        self.mirrors.get(id).map(String::as_str)
    }

    /// The opponent mirror in player mode: the only non-local mirror.
    pub fn opponent(&self) -> Option<&str> {
        self.roster
            .iter()
            .find(|id| **id != self.local_id)
            .and_then(|id| self.mirror(id))
    }

    /// Seat-0 display buffer (spectator mode).
    pub fn left(&self) -> Option<&str> {
        self.roster.first().and_then(|id| self.mirror(id))
    }

    /// Seat-1 display buffer (spectator mode).
    pub fn right(&self) -> Option<&str> {
        self.roster.get(1).and_then(|id| self.mirror(id))
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

    fn update(id: &str, code: &str) -> CodeUpdatePayload {
        CodeUpdatePayload {
            user_id: id.into(),
            code: code.into(),
        }
    }

    #[test]
    fn player_ignores_self_echo() {
        let mut buffers = CodeBuffers::new("a".into());
        buffers.set_roster(vec!["a".into(), "b".into()]);
        buffers.local_edit("fn main() {}".into());

        // An echo of our own update must never land anywhere.
        assert_eq!(buffers.apply_remote(update("a", "stale echo")), None);
        assert_eq!(buffers.local(), "fn main() {}");
        assert_eq!(buffers.opponent(), None);
    }

    #[test]
    fn player_applies_opponent_update() {
        let mut buffers = CodeBuffers::new("a".into());
        buffers.set_roster(vec!["a".into(), "b".into()]);

        let slot = buffers.apply_remote(update("b", "print(1)"));
        assert_eq!(slot, Some(DisplaySlot::Opponent));
        assert_eq!(buffers.opponent(), Some("print(1)"));
    }

    #[test]
    fn spectator_routes_by_roster_seat() {
        let mut buffers = CodeBuffers::new("watcher".into());
        buffers.enter_spectator_mode();
        buffers.set_roster(vec!["a".into(), "b".into()]);

        // Any interleaving: A always lands left, B always lands right.
        assert_eq!(buffers.apply_remote(update("b", "b1")), Some(DisplaySlot::Right));
        assert_eq!(buffers.apply_remote(update("a", "a1")), Some(DisplaySlot::Left));
        assert_eq!(buffers.apply_remote(update("a", "a2")), Some(DisplaySlot::Left));
        assert_eq!(buffers.apply_remote(update("b", "b2")), Some(DisplaySlot::Right));

        assert_eq!(buffers.left(), Some("a2"));
        assert_eq!(buffers.right(), Some("b2"));
    }

    #[test]
    fn spectator_discards_update_before_roster_known() {
        let mut buffers = CodeBuffers::new("watcher".into());
        buffers.enter_spectator_mode();

        assert_eq!(buffers.apply_remote(update("a", "early")), None);
        buffers.set_roster(vec!["a".into()]);
        assert_eq!(buffers.apply_remote(update("a", "still early")), None);

        buffers.set_roster(vec!["a".into(), "b".into()]);
        assert_eq!(buffers.apply_remote(update("a", "now ok")), Some(DisplaySlot::Left));
    }

    #[test]
    fn spectator_discards_unknown_participant() {
        let mut buffers = CodeBuffers::new("watcher".into());
        buffers.enter_spectator_mode();
        buffers.set_roster(vec!["a".into(), "b".into()]);

        assert_eq!(buffers.apply_remote(update("intruder", "x")), None);
        assert_eq!(buffers.left(), None);
        assert_eq!(buffers.right(), None);
    }

    #[test]
    fn clear_mirror_on_opponent_drop() {
        let mut buffers = CodeBuffers::new("a".into());
        buffers.set_roster(vec!["a".into(), "b".into()]);
        buffers.apply_remote(update("b", "work in progress"));

        buffers.clear_mirror("b");
        assert_eq!(buffers.opponent(), None);
        // Local buffer untouched.
        assert_eq!(buffers.local(), CodeBuffers::DEFAULT_LOCAL);
    }

    #[test]
    fn seeded_spectator_snapshot_is_readable() {
        let mut buffers = CodeBuffers::new("watcher".into());
        buffers.enter_spectator_mode();
        buffers.set_roster(vec!["a".into(), "b".into()]);
        buffers.seed_mirror("a".into(), "left code".into());
        buffers.seed_mirror("b".into(), "right code".into());

        assert_eq!(buffers.left(), Some("left code"));
        assert_eq!(buffers.right(), Some("right code"));
    }
}

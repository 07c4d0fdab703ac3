//! Wire types for the Code Duel match protocol.
//!
//! Every channel frame is one JSON object of the form
//! `{"event": "<name>", "data": {…}}`. The event names and snake_case
//! field names match the duel server exactly, including the two
//! hyphenated names (`solution-verified`, `answered-question`).
//!
//! Inbound frames are validated at this boundary: a frame that fails to
//! deserialize is logged and dropped by the session loop, never
//! propagated as partially-populated state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Opaque server-issued identifier for participants (players and
/// spectators alike).
pub type ParticipantId = String;

/// Health ceiling applied to every inbound health value.
pub const MAX_HEALTH: u32 = 100;

// ── Enums ───────────────────────────────────────────────────────────

/// Problem difficulty tiers accepted by the problem bank.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Easy => write!(f, "easy"),
            Self::Medium => write!(f, "medium"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

/// The local participant's relationship to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Provisions the room (or was assigned a fresh quick-match room).
    Creator,
    /// Joins an existing room by code.
    Joiner,
    /// Read-only observer attached to an already-full room.
    Spectator,
}

// ── Structs ─────────────────────────────────────────────────────────

/// A problem a participant is currently attempting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Problem {
    pub problem_id: String,
    pub title: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub description: String,
    /// Starter code, possibly with escaped newline sequences — see
    /// [`crate::challenge::unescape_template`].
    #[serde(default)]
    pub solution_template: String,
}

/// Result of one grading case from a solution submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCaseResult {
    /// The case input or label, as reported by the grader.
    pub case: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

/// Grading outcome for a submitted solution.
///
/// A partial failure is a first-class outcome, not an error: the caller
/// renders `per_test` as a structured report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub passed: bool,
    pub passed_tests: u32,
    pub total_tests: u32,
    #[serde(default)]
    pub per_test: Vec<TestCaseResult>,
}

/// Terminal match summary, handed off verbatim to the results view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameResult {
    pub winner_id: ParticipantId,
    pub loser_id: ParticipantId,
    #[serde(default)]
    pub questions_answered: HashMap<ParticipantId, u32>,
    #[serde(default)]
    pub final_health: HashMap<ParticipantId, u32>,
}

/// One row of the aggregate win leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub id: ParticipantId,
    pub username: String,
    pub num_wins: u32,
}

/// One row of a participant's match history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub opponent: String,
    pub winner: String,
    pub your_questions_answered: u32,
    pub opponent_questions_answered: u32,
    pub duration_seconds: u64,
    pub played_on: String,
}

// ── Gateway responses ───────────────────────────────────────────────

/// Success payload of the create-room operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomResponse {
    pub room_code: String,
}

/// Success payload of the quick-match operation: either an open room to
/// join or a freshly created one to wait in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RandomGameResponse {
    pub room_code: String,
    pub created_game: bool,
}

// ── Inbound payload structs ─────────────────────────────────────────

/// Payload of the `game_ready` event: both seats filled, match begins.
/// Boxed in [`ServerEvent`] to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GameReadyPayload {
    /// Roster in seat order; always exactly two entries.
    pub players: Vec<ParticipantId>,
    #[serde(default)]
    pub usernames: HashMap<ParticipantId, String>,
    #[serde(default)]
    pub health: HashMap<ParticipantId, u32>,
    /// Match start timestamp (ISO 8601), if the server stamps one.
    #[serde(default)]
    pub started_at: Option<String>,
}

/// Payload of the `joined_as_spectator` event: a full snapshot of the
/// in-progress match. Boxed in [`ServerEvent`] to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SpectatorSnapshot {
    #[serde(default)]
    pub room_code: Option<String>,
    pub players: Vec<ParticipantId>,
    #[serde(default)]
    pub usernames: HashMap<ParticipantId, String>,
    #[serde(default)]
    pub health: HashMap<ParticipantId, u32>,
    /// Current editor contents per participant.
    #[serde(default)]
    pub code: HashMap<ParticipantId, String>,
    /// In-flight questions per participant, if any.
    #[serde(default)]
    pub active_questions: HashMap<ParticipantId, Problem>,
    #[serde(default)]
    pub started_at: Option<String>,
}

/// Payload of the `connected` greeting sent on socket attach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectedPayload {
    #[serde(default)]
    pub user_id: Option<ParticipantId>,
}

/// Payload of the `waiting_for_player` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WaitingPayload {
    #[serde(default)]
    pub room_code: Option<String>,
}

/// Payload of the inbound `opponent_code_update` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeUpdatePayload {
    pub user_id: ParticipantId,
    pub code: String,
}

/// Payload of the `update_player_health` event. Last write per
/// participant id wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthUpdatePayload {
    pub user_id: ParticipantId,
    pub health: u32,
}

/// Payload of the `player_selected_question` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionSelectedPayload {
    pub user_id: ParticipantId,
    pub question: Problem,
}

/// Payload of the `player_answered_question` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionAnsweredPayload {
    pub user_id: ParticipantId,
}

/// Payload of the `solution-verified` event: the server's authoritative
/// verdict on a submission, pushed to everyone in the room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolutionVerifiedPayload {
    pub user_id: ParticipantId,
    pub correct: bool,
    #[serde(default)]
    pub question: Option<Problem>,
}

/// Payload of the `player_left` event (explicit departure).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlayerLeftPayload {
    #[serde(default)]
    pub user_id: Option<ParticipantId>,
}

/// Payload of the `player_disconnected` event (connection drop, the
/// seat is held open for a rejoin).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlayerDisconnectedPayload {
    #[serde(default)]
    pub user_id: Option<ParticipantId>,
}

/// Payload of the server `error` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

// ── Events ──────────────────────────────────────────────────────────

/// Events pushed from server to client over the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting on socket attach.
    Connected(ConnectedPayload),
    /// The local participant was attached as a read-only observer
    /// (boxed to reduce enum size).
    JoinedAsSpectator(Box<SpectatorSnapshot>),
    /// In the room, waiting for the second seat to fill.
    WaitingForPlayer(WaitingPayload),
    /// Both seats filled — the match is live (boxed to reduce enum size).
    GameReady(Box<GameReadyPayload>),
    /// Another participant's editor contents changed.
    OpponentCodeUpdate(CodeUpdatePayload),
    /// Authoritative health value for one participant.
    UpdatePlayerHealth(HealthUpdatePayload),
    /// Terminal match result (boxed to reduce enum size).
    GameOver(Box<GameResult>),
    /// A participant fetched a new question.
    PlayerSelectedQuestion(QuestionSelectedPayload),
    /// A participant's question was resolved.
    PlayerAnsweredQuestion(QuestionAnsweredPayload),
    /// Server verdict on a submission.
    #[serde(rename = "solution-verified")]
    SolutionVerified(SolutionVerifiedPayload),
    /// A participant departed explicitly.
    PlayerLeft(PlayerLeftPayload),
    /// A participant's connection dropped.
    PlayerDisconnected(PlayerDisconnectedPayload),
    /// Protocol-level error, surfaced verbatim.
    Error(ErrorPayload),
}

/// Payload of the outbound `join_game` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinGamePayload {
    pub room_code: String,
    pub user_id: ParticipantId,
}

/// Payload of the outbound `code_update` event. Carries the full buffer
/// content, not a diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundCodePayload {
    pub room_code: String,
    pub user_id: ParticipantId,
    pub code: String,
}

/// Payload of the outbound `leave_game` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaveGamePayload {
    pub room_code: String,
    pub user_id: ParticipantId,
}

/// Payload of the outbound `answered-question` event, fired
/// automatically when the server verifies the local participant's
/// solution as correct. `hard_mode_active` requests the server's
/// bonus-damage rule; the client never computes damage itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnsweredQuestionPayload {
    pub user_id: ParticipantId,
    pub room_code: String,
    pub question: Problem,
    pub hard_mode_active: bool,
    pub correct: bool,
}

/// Events emitted from client to server over the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEventMsg {
    JoinGame(JoinGamePayload),
    CodeUpdate(OutboundCodePayload),
    LeaveGame(LeaveGamePayload),
    #[serde(rename = "answered-question")]
    AnsweredQuestion(Box<AnsweredQuestionPayload>),
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
    fn server_event_names_match_wire() {
        let ev = ServerEvent::WaitingForPlayer(WaitingPayload::default());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "waiting_for_player");

        let ev = ServerEvent::SolutionVerified(SolutionVerifiedPayload {
            user_id: "u1".into(),
            correct: true,
            question: None,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "solution-verified");
    }

    #[test]
    fn client_event_names_match_wire() {
        let ev = ClientEventMsg::JoinGame(JoinGamePayload {
            room_code: "AB12CD".into(),
            user_id: "u1".into(),
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "join_game");
        assert_eq!(json["data"]["room_code"], "AB12CD");

        let ev = ClientEventMsg::AnsweredQuestion(Box::new(AnsweredQuestionPayload {
            user_id: "u1".into(),
            room_code: "AB12CD".into(),
            question: Problem {
                problem_id: "p1".into(),
                title: "Two Sum".into(),
                difficulty: Difficulty::Easy,
                description: "desc".into(),
                solution_template: String::new(),
            },
            hard_mode_active: true,
            correct: true,
        }));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "answered-question");
        assert_eq!(json["data"]["hard_mode_active"], true);
    }

    #[test]
    fn difficulty_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Difficulty::Hard).unwrap(), "\"hard\"");
        assert_eq!(Difficulty::Medium.to_string(), "medium");
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let raw = r#"{"event":"update_player_health","data":{"health":"full"}}"#;
        assert!(serde_json::from_str::<ServerEvent>(raw).is_err());

        let raw = r#"{"event":"no_such_event","data":{}}"#;
        assert!(serde_json::from_str::<ServerEvent>(raw).is_err());
    }

    #[test]
    fn spectator_snapshot_tolerates_missing_optional_fields() {
        let raw = r#"{"event":"joined_as_spectator","data":{"players":["a","b"]}}"#;
        let ev: ServerEvent = serde_json::from_str(raw).unwrap();
        match ev {
            ServerEvent::JoinedAsSpectator(snap) => {
                assert_eq!(snap.players, vec!["a".to_string(), "b".to_string()]);
                assert!(snap.code.is_empty());
                assert!(snap.active_questions.is_empty());
            }
            other => panic!("expected JoinedAsSpectator, got {other:?}"),
        }
    }
}

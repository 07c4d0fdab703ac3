#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Code Duel client integration tests.
//!
//! Provides a scripted [`MockTransport`], a scripted [`ScriptedGateway`],
//! and helper functions that build raw server frame JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use code_duel_client::error::DuelError;
use code_duel_client::gateway::Gateway;
use code_duel_client::protocol::{
    CreateRoomResponse, Difficulty, HistoryEntry, LeaderboardEntry, Problem, RandomGameResponse,
    SubmitOutcome,
};
use code_duel_client::Transport;

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport for integration testing.
///
/// Scripted server frames are consumed in order by `recv()`. All frames
/// sent by the client are recorded in `sent`.
pub struct MockTransport {
    /// Scripted server frames (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, DuelError>>>,
    /// Recorded outgoing frames from the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a new mock transport with the given scripted frames.
    ///
    /// Returns the transport plus shared handles for inspecting sent
    /// frames and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, DuelError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }

    /// Script a sequence of well-formed frames followed by an open line.
    pub fn with_frames(frames: Vec<String>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        Self::new(frames.into_iter().map(|f| Some(Ok(f))).collect())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), DuelError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, DuelError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted frames — hang forever so the session
            // loop stays alive until shutdown is called.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), DuelError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── ScriptedGateway ─────────────────────────────────────────────────

/// A gateway whose operations pop scripted results in order. An
/// unscripted call fails with a 599 so tests notice immediately.
#[derive(Default)]
pub struct ScriptedGateway {
    pub create_room_results: StdMutex<VecDeque<Result<CreateRoomResponse, DuelError>>>,
    pub problem_results: StdMutex<VecDeque<Result<Problem, DuelError>>>,
    pub submit_results: StdMutex<VecDeque<Result<SubmitOutcome, DuelError>>>,
    pub skip_results: StdMutex<VecDeque<Result<(), DuelError>>>,
    /// Count of create-room calls that reached the gateway.
    pub create_room_calls: Arc<StdMutex<u32>>,
    /// Arguments of submit calls: (room_code, user_id, code, problem_id).
    pub submit_calls: Arc<StdMutex<Vec<(String, String, String, String)>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn room(self, room_code: &str) -> Self {
        self.create_room_results
            .lock()
            .unwrap()
            .push_back(Ok(CreateRoomResponse {
                room_code: room_code.into(),
            }));
        self
    }

    #[must_use]
    pub fn create_room_failure(self, status: u16, message: &str) -> Self {
        self.create_room_results
            .lock()
            .unwrap()
            .push_back(Err(DuelError::Api {
                status,
                message: message.into(),
            }));
        self
    }

    #[must_use]
    pub fn problem(self, problem: Problem) -> Self {
        self.problem_results.lock().unwrap().push_back(Ok(problem));
        self
    }

    #[must_use]
    pub fn submit_outcome(self, outcome: SubmitOutcome) -> Self {
        self.submit_results.lock().unwrap().push_back(Ok(outcome));
        self
    }
}

fn unscripted<T>(op: &str) -> Result<T, DuelError> {
    Err(DuelError::Api {
        status: 599,
        message: format!("unscripted gateway call: {op}"),
    })
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn create_room(&self, _user_id: &str) -> Result<CreateRoomResponse, DuelError> {
        *self.create_room_calls.lock().unwrap() += 1;
        self.create_room_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("create_room"))
    }

    async fn find_random_game(&self, _user_id: &str) -> Result<RandomGameResponse, DuelError> {
        unscripted("find_random_game")
    }

    async fn fetch_problem(
        &self,
        _room_code: &str,
        _user_id: &str,
        _difficulty: Difficulty,
    ) -> Result<Problem, DuelError> {
        self.problem_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("fetch_problem"))
    }

    async fn submit_solution(
        &self,
        room_code: &str,
        user_id: &str,
        code: &str,
        problem_id: &str,
    ) -> Result<SubmitOutcome, DuelError> {
        self.submit_calls.lock().unwrap().push((
            room_code.into(),
            user_id.into(),
            code.into(),
            problem_id.into(),
        ));
        self.submit_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| unscripted("submit_solution"))
    }

    async fn skip_problem(&self, _room_code: &str, _user_id: &str) -> Result<(), DuelError> {
        self.skip_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, DuelError> {
        Ok(vec![])
    }

    async fn fetch_history(&self, _user_id: &str) -> Result<Vec<HistoryEntry>, DuelError> {
        Ok(vec![])
    }
}

// ── JSON frame helpers ──────────────────────────────────────────────

/// Returns the JSON frame for the server `connected` greeting.
pub fn connected_json() -> String {
    r#"{"event":"connected","data":{}}"#.to_string()
}

/// Returns the JSON frame for `waiting_for_player`.
pub fn waiting_json(room_code: &str) -> String {
    format!(r#"{{"event":"waiting_for_player","data":{{"room_code":"{room_code}"}}}}"#)
}

/// Returns the JSON frame for `game_ready` with full health for both.
pub fn game_ready_json(a: &str, b: &str) -> String {
    format!(
        r#"{{"event":"game_ready","data":{{
            "players":["{a}","{b}"],
            "usernames":{{"{a}":"{a}-name","{b}":"{b}-name"}},
            "health":{{"{a}":100,"{b}":100}},
            "started_at":"2026-08-01T12:00:00Z"}}}}"#
    )
}

/// Returns the JSON frame for a spectator snapshot of a live match.
pub fn spectator_snapshot_json(a: &str, b: &str) -> String {
    format!(
        r#"{{"event":"joined_as_spectator","data":{{
            "room_code":"AB12CD",
            "players":["{a}","{b}"],
            "usernames":{{"{a}":"{a}-name","{b}":"{b}-name"}},
            "health":{{"{a}":70,"{b}":85}},
            "code":{{"{a}":"// {a} code","{b}":"// {b} code"}},
            "active_questions":{{}}}}}}"#
    )
}

/// Returns the JSON frame for an inbound code update.
pub fn code_update_json(user_id: &str, code: &str) -> String {
    format!(r#"{{"event":"opponent_code_update","data":{{"user_id":"{user_id}","code":"{code}"}}}}"#)
}

/// Returns the JSON frame for an authoritative health update.
pub fn health_json(user_id: &str, health: u32) -> String {
    format!(
        r#"{{"event":"update_player_health","data":{{"user_id":"{user_id}","health":{health}}}}}"#
    )
}

/// Returns the JSON frame for the terminal game-over push.
pub fn game_over_json(winner: &str, loser: &str) -> String {
    format!(
        r#"{{"event":"game_over","data":{{
            "winner_id":"{winner}","loser_id":"{loser}",
            "questions_answered":{{"{winner}":3,"{loser}":1}},
            "final_health":{{"{winner}":40,"{loser}":0}}}}}}"#
    )
}

/// Returns the JSON frame announcing another participant's question.
pub fn question_selected_json(user_id: &str, problem_id: &str) -> String {
    format!(
        r#"{{"event":"player_selected_question","data":{{
            "user_id":"{user_id}",
            "question":{{"problem_id":"{problem_id}","title":"T","difficulty":"easy",
                         "description":"d","solution_template":""}}}}}}"#
    )
}

/// Returns the JSON frame clearing a participant's question.
pub fn question_answered_json(user_id: &str) -> String {
    format!(r#"{{"event":"player_answered_question","data":{{"user_id":"{user_id}"}}}}"#)
}

/// Returns the JSON frame for a server verification verdict.
pub fn solution_verified_json(user_id: &str, correct: bool) -> String {
    format!(
        r#"{{"event":"solution-verified","data":{{
            "user_id":"{user_id}","correct":{correct},
            "question":{{"problem_id":"p1","title":"T","difficulty":"easy",
                         "description":"d","solution_template":""}}}}}}"#
    )
}

/// Returns the JSON frame for an explicit opponent departure.
pub fn player_left_json(user_id: &str) -> String {
    format!(r#"{{"event":"player_left","data":{{"user_id":"{user_id}"}}}}"#)
}

/// Returns the JSON frame for an opponent connection drop.
pub fn player_disconnected_json(user_id: &str) -> String {
    format!(r#"{{"event":"player_disconnected","data":{{"user_id":"{user_id}"}}}}"#)
}

/// Returns the JSON frame for a server protocol error.
pub fn error_json(message: &str) -> String {
    format!(r#"{{"event":"error","data":{{"message":"{message}"}}}}"#)
}

/// A small fixture problem with an escaped template.
pub fn fixture_problem(problem_id: &str) -> Problem {
    Problem {
        problem_id: problem_id.into(),
        title: "Two Sum".into(),
        difficulty: Difficulty::Easy,
        description: "Find two numbers that add to the target".into(),
        solution_template: "def two_sum(nums, target):\\n    pass\\n".into(),
    }
}

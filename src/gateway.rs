//! Request/response operations against the duel server's HTTP API.
//!
//! The channel carries pushed events; everything request-shaped (room
//! provisioning, problem fetches, grading, aggregate stats) goes through
//! the [`Gateway`] trait. Like the [`Transport`](crate::Transport)
//! seam, the trait exists so the session loop can be driven by a
//! scripted implementation in tests; [`HttpGateway`] is the production
//! implementation.
//!
//! Gateway calls carry no ordering guarantee relative to each other or
//! to channel events — callers tolerate that with idempotent guards
//! (see the session's create-room deduplication), not sequencing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{DuelError, Result};
use crate::protocol::{
    CreateRoomResponse, Difficulty, HistoryEntry, LeaderboardEntry, Problem, RandomGameResponse,
    SubmitOutcome,
};

/// Named server operations available to the client.
///
/// Every operation takes a JSON-serializable body and resolves to a
/// typed success payload or a structured failure
/// ([`DuelError::Api`] with the server's status and message).
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Provision a new room owned by `user_id`.
    async fn create_room(&self, user_id: &str) -> Result<CreateRoomResponse>;

    /// Join-or-create quick match: returns an open room to join, or a
    /// freshly created room to wait in (`created_game = true`).
    async fn find_random_game(&self, user_id: &str) -> Result<RandomGameResponse>;

    /// Draw a problem of the given difficulty for `user_id`.
    async fn fetch_problem(
        &self,
        room_code: &str,
        user_id: &str,
        difficulty: Difficulty,
    ) -> Result<Problem>;

    /// Submit the current buffer for grading against `problem_id`.
    async fn submit_solution(
        &self,
        room_code: &str,
        user_id: &str,
        code: &str,
        problem_id: &str,
    ) -> Result<SubmitOutcome>;

    /// Abandon the active problem without grading.
    async fn skip_problem(&self, room_code: &str, user_id: &str) -> Result<()>;

    /// Aggregate win counts, ordered by rank.
    async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>>;

    /// Match history for one participant, most recent first.
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>>;
}

/// Shape of a JSON failure body from the API.
#[derive(Debug, Deserialize)]
struct ApiFailure {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// [`Gateway`] implementation over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a gateway rooted at `base_url`
    /// (e.g. `http://localhost:5001`). A trailing slash is trimmed.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Create a gateway with a caller-supplied `reqwest::Client`
    /// (custom timeouts, proxies, headers).
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut gateway = Self::new(base_url);
        gateway.http = http;
        gateway
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a non-2xx response to [`DuelError::Api`], extracting the
    /// server's message from a JSON failure body when present.
    async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiFailure>(&raw)
            .ok()
            .and_then(|f| f.message.or(f.error))
            .unwrap_or(raw);
        Err(DuelError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn create_room(&self, user_id: &str) -> Result<CreateRoomResponse> {
        tracing::debug!(user_id, "creating room");
        let resp = self
            .http
            .post(self.url("/api/create-room"))
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?;
        Ok(Self::expect_success(resp).await?.json().await?)
    }

    async fn find_random_game(&self, user_id: &str) -> Result<RandomGameResponse> {
        tracing::debug!(user_id, "looking for an open random game");
        let resp = self
            .http
            .post(self.url("/api/find-random-game"))
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?;
        Ok(Self::expect_success(resp).await?.json().await?)
    }

    async fn fetch_problem(
        &self,
        room_code: &str,
        user_id: &str,
        difficulty: Difficulty,
    ) -> Result<Problem> {
        tracing::debug!(room_code, user_id, %difficulty, "fetching problem");
        let resp = self
            .http
            .post(self.url("/api/get-problem"))
            .json(&json!({
                "room_code": room_code,
                "user_id": user_id,
                "difficulty": difficulty,
            }))
            .send()
            .await?;
        Ok(Self::expect_success(resp).await?.json().await?)
    }

    async fn submit_solution(
        &self,
        room_code: &str,
        user_id: &str,
        code: &str,
        problem_id: &str,
    ) -> Result<SubmitOutcome> {
        tracing::debug!(room_code, user_id, problem_id, "submitting solution");
        let resp = self
            .http
            .post(self.url("/api/submit-solution"))
            .json(&json!({
                "user_id": user_id,
                "room_code": room_code,
                "code": code,
                "problem_id": problem_id,
            }))
            .send()
            .await?;
        Ok(Self::expect_success(resp).await?.json().await?)
    }

    async fn skip_problem(&self, room_code: &str, user_id: &str) -> Result<()> {
        tracing::debug!(room_code, user_id, "skipping problem");
        let resp = self
            .http
            .post(self.url("/api/skip-problem"))
            .json(&json!({ "room_code": room_code, "user_id": user_id }))
            .send()
            .await?;
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let resp = self.http.get(self.url("/api/leaderboard")).send().await?;
        Ok(Self::expect_success(resp).await?.json().await?)
    }

    async fn fetch_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        let resp = self
            .http
            .get(self.url("/api/game-history"))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        Ok(Self::expect_success(resp).await?.json().await?)
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response and return the base URL.
    async fn serve_once(status_line: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status_line = status_line.to_string();
        let body = body.to_string();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Drain whatever part of the request has arrived; the mock
            // never parses it.
            let mut buf = [0u8; 8192];
            let _ = sock.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
        });

        format!("http://{addr}")
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let gateway = HttpGateway::new("http://localhost:5001/");
        assert_eq!(gateway.url("/api/create-room"), "http://localhost:5001/api/create-room");
    }

    #[tokio::test]
    async fn create_room_parses_success() {
        let base = serve_once("200 OK", r#"{"room_code":"AB12CD"}"#).await;
        let gateway = HttpGateway::new(base);

        let resp = gateway.create_room("u1").await.unwrap();
        assert_eq!(resp.room_code, "AB12CD");
    }

    #[tokio::test]
    async fn non_2xx_maps_to_api_error_with_message() {
        let base = serve_once(
            "400 BAD REQUEST",
            r#"{"message":"User already in a game room"}"#,
        )
        .await;
        let gateway = HttpGateway::new(base);

        let err = gateway.create_room("u1").await.unwrap_err();
        match err {
            DuelError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "User already in a game room");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_failure_body_is_passed_through() {
        let base = serve_once("500 INTERNAL SERVER ERROR", "worker crashed").await;
        let gateway = HttpGateway::new(base);

        let err = gateway.skip_problem("AB12CD", "u1").await.unwrap_err();
        match err {
            DuelError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "worker crashed");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_solution_parses_grading_outcome() {
        let base = serve_once(
            "200 OK",
            r#"{
                "passed": false,
                "passed_tests": 1,
                "total_tests": 2,
                "per_test": [
                    {"case":"[1]","expected":"1","actual":"1","passed":true},
                    {"case":"[2]","expected":"2","actual":"0","passed":false}
                ]
            }"#,
        )
        .await;
        let gateway = HttpGateway::new(base);

        let outcome = gateway
            .submit_solution("AB12CD", "u1", "print(1)", "p1")
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.passed_tests, 1);
        assert_eq!(outcome.per_test.len(), 2);
        assert!(!outcome.per_test[1].passed);
    }

    #[tokio::test]
    async fn fetch_leaderboard_parses_rows() {
        let base = serve_once(
            "200 OK",
            r#"[{"id":"u1","username":"alice","num_wins":12},
                {"id":"u2","username":"bob","num_wins":7}]"#,
        )
        .await;
        let gateway = HttpGateway::new(base);

        let rows = gateway.fetch_leaderboard().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].username, "alice");
        assert_eq!(rows[0].num_wins, 12);
    }

    #[tokio::test]
    async fn fetch_history_parses_rows() {
        let base = serve_once(
            "200 OK",
            r#"[{"opponent":"bob","winner":"alice",
                 "your_questions_answered":3,"opponent_questions_answered":1,
                 "duration_seconds":412,"played_on":"2026-07-01T18:00:00Z"}]"#,
        )
        .await;
        let gateway = HttpGateway::new(base);

        let rows = gateway.fetch_history("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].winner, "alice");
        assert_eq!(rows[0].duration_seconds, 412);
    }

    #[tokio::test]
    async fn unreachable_host_is_http_error() {
        let gateway = HttpGateway::new("http://127.0.0.1:1");
        let err = gateway.create_room("u1").await.unwrap_err();
        assert!(matches!(err, DuelError::Http(_)));
    }
}

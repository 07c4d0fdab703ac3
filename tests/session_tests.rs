#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the duel session state machine, driven over a
//! scripted transport and gateway.

mod common;

use std::time::Duration;

use code_duel_client::protocol::{SubmitOutcome, TestCaseResult};
use code_duel_client::{
    Difficulty, DisplaySlot, DuelSession, NotificationKind, SessionConfig, SessionEvent,
    SessionPhase,
};
use tokio::sync::mpsc;

use common::*;

/// Receive the next event or panic after a timeout.
async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Keep receiving until `pred` matches, returning the matching event.
async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Drain whatever is currently queued without waiting.
fn drain_now(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = events.try_recv() {
        out.push(ev);
    }
    out
}

// ── Join flows ──────────────────────────────────────────────────────

#[tokio::test]
async fn creator_provisions_room_joins_and_waits() {
    let (transport, sent, _closed) = MockTransport::with_frames(vec![
        connected_json(),
        waiting_json("AB12CD"),
    ]);
    let gateway = ScriptedGateway::new().room("AB12CD");

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::creator("u1"));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::RoomAssigned { room_code } if room_code == "AB12CD")
    })
    .await;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PhaseChanged(SessionPhase::WaitingForOpponent))
    })
    .await;

    assert_eq!(session.current_room_code().await.as_deref(), Some("AB12CD"));
    assert_eq!(session.phase().await, SessionPhase::WaitingForOpponent);

    {
        let frames = sent.lock().unwrap();
        let join = frames.iter().find(|f| f.contains("join_game")).unwrap();
        let value: serde_json::Value = serde_json::from_str(join).unwrap();
        assert_eq!(value["data"]["room_code"], "AB12CD");
        assert_eq!(value["data"]["user_id"], "u1");
    }

    session.shutdown().await;
}

#[tokio::test]
async fn joiner_emits_join_immediately_without_create_call() {
    let (transport, sent, _closed) = MockTransport::with_frames(vec![connected_json()]);
    let gateway = ScriptedGateway::new();
    let calls = std::sync::Arc::clone(&gateway.create_room_calls);

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("u2", "AB12CD"));

    wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::ConnectionChanged(code_duel_client::ConnectionStatus::Connected)
        )
    })
    .await;

    assert_eq!(*calls.lock().unwrap(), 0);
    assert!(sent.lock().unwrap().iter().any(|f| f.contains("join_game")));

    session.shutdown().await;
}

#[tokio::test]
async fn game_ready_transitions_to_active_with_roster_and_health() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        connected_json(),
        waiting_json("AB12CD"),
        game_ready_json("u1", "u2"),
    ]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("u1", "AB12CD"));

    let roster_event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::RosterUpdated { .. })
    })
    .await;
    if let SessionEvent::RosterUpdated { players, usernames } = roster_event {
        assert_eq!(players, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(usernames.get("u1").map(String::as_str), Some("u1-name"));
    }

    let mut seen_health = std::collections::HashMap::new();
    while seen_health.len() < 2 {
        if let SessionEvent::HealthChanged { user_id, health } = next_event(&mut events).await {
            seen_health.insert(user_id, health);
        }
    }
    assert_eq!(seen_health.get("u1"), Some(&100));
    assert_eq!(seen_health.get("u2"), Some(&100));
    assert_eq!(session.phase().await, SessionPhase::Active);

    session.shutdown().await;
}

// ── Health fold property ────────────────────────────────────────────

#[tokio::test]
async fn health_replay_is_last_write_per_participant() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        game_ready_json("a", "b"),
        health_json("a", 90),
        health_json("b", 80),
        health_json("a", 55),
        health_json("b", 20),
        health_json("a", 40),
    ]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    // Fold HealthChanged events: last update per participant id wins.
    let mut folded = std::collections::HashMap::new();
    let mut update_count = 0;
    while update_count < 7 {
        if let SessionEvent::HealthChanged { user_id, health } = next_event(&mut events).await {
            folded.insert(user_id, health);
            update_count += 1;
        }
    }
    assert_eq!(folded.get("a"), Some(&40));
    assert_eq!(folded.get("b"), Some(&20));

    session.shutdown().await;
}

// ── Code synchronization ────────────────────────────────────────────

#[tokio::test]
async fn spectator_updates_route_to_fixed_seats() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        spectator_snapshot_json("a", "b"),
        code_update_json("b", "b-first"),
        code_update_json("a", "a-first"),
        code_update_json("b", "b-second"),
        code_update_json("a", "a-second"),
    ]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("watcher", "AB12CD"));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PhaseChanged(SessionPhase::SpectatorActive))
    })
    .await;

    let mut routed = Vec::new();
    while routed.len() < 6 {
        if let SessionEvent::CodeMirrorUpdated { user_id, slot, .. } =
            next_event(&mut events).await
        {
            routed.push((user_id, slot));
        }
    }
    // Snapshot seeds two mirrors, then four live updates follow. For
    // any interleaving, a always lands left and b always lands right.
    for (user_id, slot) in routed {
        match user_id.as_str() {
            "a" => assert_eq!(slot, DisplaySlot::Left),
            "b" => assert_eq!(slot, DisplaySlot::Right),
            other => panic!("unexpected participant {other}"),
        }
    }

    session.shutdown().await;
}

#[tokio::test]
async fn player_self_echo_never_surfaces() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        game_ready_json("a", "b"),
        code_update_json("a", "echo of my own typing"),
        code_update_json("b", "opponent progress"),
    ]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    // The only mirror update that surfaces is the opponent's.
    let event = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::CodeMirrorUpdated { .. })
    })
    .await;
    if let SessionEvent::CodeMirrorUpdated { user_id, slot, code } = event {
        assert_eq!(user_id, "b");
        assert_eq!(slot, DisplaySlot::Opponent);
        assert_eq!(code, "opponent progress");
    }

    session.shutdown().await;
}

// ── Challenge flow ──────────────────────────────────────────────────

#[tokio::test]
async fn submit_success_raises_one_banner_and_clears_question() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![game_ready_json("a", "b")]);
    let gateway = ScriptedGateway::new()
        .problem(fixture_problem("p1"))
        .submit_outcome(SubmitOutcome {
            passed: true,
            passed_tests: 5,
            total_tests: 5,
            per_test: vec![],
        });
    let submit_calls = std::sync::Arc::clone(&gateway.submit_calls);

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PhaseChanged(SessionPhase::Active))
    })
    .await;

    session.select_difficulty(Difficulty::Easy).unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::QuestionAssigned { .. })
    })
    .await;

    session.submit().unwrap();
    let banner = wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Success,
                ..
            }
        )
    })
    .await;
    if let SessionEvent::Notification { text, .. } = banner {
        assert!(text.contains("5/5"), "banner should carry the pass count: {text}");
    }
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::QuestionCleared { user_id } if user_id == "a")
    })
    .await;

    // The graded code is the unescaped template the buffer received.
    {
        let calls = submit_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (room_code, user_id, code, problem_id) = &calls[0];
        assert_eq!(room_code, "AB12CD");
        assert_eq!(user_id, "a");
        assert_eq!(code, "def two_sum(nums, target):\n    pass\n");
        assert_eq!(problem_id, "p1");
    }

    session.shutdown().await;
}

#[tokio::test]
async fn submit_partial_failure_enumerates_failing_cases_only() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![game_ready_json("a", "b")]);
    let gateway = ScriptedGateway::new()
        .problem(fixture_problem("p1"))
        .submit_outcome(SubmitOutcome {
            passed: false,
            passed_tests: 2,
            total_tests: 4,
            per_test: vec![
                TestCaseResult {
                    case: "[1, 1]".into(),
                    expected: "2".into(),
                    actual: "2".into(),
                    passed: true,
                },
                TestCaseResult {
                    case: "[2, 3]".into(),
                    expected: "5".into(),
                    actual: "6".into(),
                    passed: false,
                },
                TestCaseResult {
                    case: "[4, 4]".into(),
                    expected: "8".into(),
                    actual: "8".into(),
                    passed: true,
                },
                TestCaseResult {
                    case: "[0, 9]".into(),
                    expected: "9".into(),
                    actual: "0".into(),
                    passed: false,
                },
            ],
        });

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PhaseChanged(SessionPhase::Active))
    })
    .await;
    session.select_difficulty(Difficulty::Medium).unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::QuestionAssigned { .. })
    })
    .await;

    session.submit().unwrap();
    let report = wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        )
    })
    .await;
    if let SessionEvent::Notification { text, .. } = report {
        assert!(text.contains("Failed 2 of 4"));
        assert!(text.contains("case [2, 3]: expected 5, got 6"));
        assert!(text.contains("case [0, 9]: expected 9, got 0"));
        assert!(!text.contains("[1, 1]"));
        assert!(!text.contains("[4, 4]"));
    }

    // The question is retained: no clear event follows.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain_now(&mut events)
        .iter()
        .all(|e| !matches!(e, SessionEvent::QuestionCleared { .. })));

    session.shutdown().await;
}

#[tokio::test]
async fn remote_question_set_and_cleared_by_channel_events() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        game_ready_json("a", "b"),
        question_selected_json("b", "p42"),
        question_answered_json("b"),
    ]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    let assigned = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::QuestionAssigned { .. })
    })
    .await;
    if let SessionEvent::QuestionAssigned { user_id, question } = assigned {
        assert_eq!(user_id, "b");
        assert_eq!(question.problem_id, "p42");
    }

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::QuestionCleared { user_id } if user_id == "b")
    })
    .await;

    session.shutdown().await;
}

// ── Terminal transitions ────────────────────────────────────────────

#[tokio::test]
async fn game_over_hands_off_result_fields_verbatim() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        game_ready_json("u1", "u2"),
        game_over_json("u1", "u2"),
    ]);
    let gateway = ScriptedGateway::new();

    // The local participant is the loser; the hand-off is identical
    // regardless of which side we are.
    let (_session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("u2", "AB12CD"));

    let game_over = wait_for(&mut events, |e| matches!(e, SessionEvent::GameOver(_))).await;
    if let SessionEvent::GameOver(result) = game_over {
        assert_eq!(result.winner_id, "u1");
        assert_eq!(result.loser_id, "u2");
        assert_eq!(result.questions_answered.get("u1"), Some(&3));
        assert_eq!(result.questions_answered.get("u2"), Some(&1));
        assert_eq!(result.final_health.get("u1"), Some(&40));
        assert_eq!(result.final_health.get("u2"), Some(&0));
    }
}

#[tokio::test]
async fn opponent_departure_notifies_then_returns_home() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        game_ready_json("a", "b"),
        player_left_json("b"),
    ]);
    let gateway = ScriptedGateway::new();

    let config =
        SessionConfig::joiner("a", "AB12CD").with_leave_delay(Duration::from_millis(40));
    let (_session, mut events) = DuelSession::start(transport, gateway, config);

    let note = wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        )
    })
    .await;
    if let SessionEvent::Notification { text, .. } = note {
        assert!(text.contains("left the game"));
    }

    wait_for(&mut events, |e| matches!(e, SessionEvent::ReturnHome)).await;
}

#[tokio::test]
async fn opponent_drop_warns_and_reopens_waiting() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        game_ready_json("a", "b"),
        code_update_json("b", "half finished"),
        player_disconnected_json("b"),
    ]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::ConnectionWarning,
                ..
            }
        )
    })
    .await;
    assert_eq!(session.phase().await, SessionPhase::WaitingForOpponent);

    session.shutdown().await;
}

#[tokio::test]
async fn local_leave_emits_leave_event_then_returns_home() {
    let (transport, sent, closed) = MockTransport::with_frames(vec![game_ready_json("a", "b")]);
    let gateway = ScriptedGateway::new();

    let config =
        SessionConfig::joiner("a", "AB12CD").with_leave_flush_delay(Duration::from_millis(10));
    let (mut session, mut events) = DuelSession::start(transport, gateway, config);

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PhaseChanged(SessionPhase::Active))
    })
    .await;

    session.leave().unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::ReturnHome)).await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;

    // A later shutdown must not emit a second leave.
    session.shutdown().await;

    assert!(closed.load(std::sync::atomic::Ordering::Relaxed));
    assert_eq!(
        sent.lock()
            .unwrap()
            .iter()
            .filter(|f| f.contains("leave_game"))
            .count(),
        1
    );
}

// ── Notifications ───────────────────────────────────────────────────

#[tokio::test]
async fn protocol_error_event_surfaces_verbatim() {
    let (transport, _sent, _closed) =
        MockTransport::with_frames(vec![error_json("Room AB12CD is full")]);
    let gateway = ScriptedGateway::new();

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::joiner("a", "AB12CD"));

    let note = wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        )
    })
    .await;
    if let SessionEvent::Notification { text, .. } = note {
        assert_eq!(text, "Room AB12CD is full");
    }

    session.shutdown().await;
}

#[tokio::test]
async fn same_kind_notification_replaced_with_single_expiry() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![
        error_json("first error"),
        error_json("second error"),
    ]);
    let gateway = ScriptedGateway::new();

    let config = SessionConfig::joiner("a", "AB12CD").with_notify_ttl(Duration::from_millis(60));
    let (mut session, mut events) = DuelSession::start(transport, gateway, config);

    let mut notifications = Vec::new();
    let mut expiries = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(SessionEvent::Notification { text, .. })) => notifications.push(text),
            Ok(Some(SessionEvent::NotificationExpired { .. })) => expiries += 1,
            Ok(Some(_)) => {}
            _ => break,
        }
    }

    assert_eq!(notifications, vec!["first error", "second error"]);
    // The replacement restarted the timer: exactly one expiry fires.
    assert_eq!(expiries, 1);

    session.shutdown().await;
}

// ── Duplicate room creation ─────────────────────────────────────────

#[tokio::test]
async fn already_in_room_create_failure_is_silent() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![connected_json()]);
    let gateway =
        ScriptedGateway::new().create_room_failure(400, "User already in a game room");

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::creator("u1"));

    // Collect everything up to the Connected greeting, then whatever
    // trails it: no notification may appear anywhere.
    let mut collected = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = matches!(
            event,
            SessionEvent::ConnectionChanged(code_duel_client::ConnectionStatus::Connected)
        );
        collected.push(event);
        if done {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    collected.extend(drain_now(&mut events));

    assert!(collected
        .iter()
        .all(|e| !matches!(e, SessionEvent::Notification { .. })));

    session.shutdown().await;
}

#[tokio::test]
async fn hard_create_failure_surfaces_exactly_one_error() {
    let (transport, _sent, _closed) = MockTransport::with_frames(vec![connected_json()]);
    let gateway = ScriptedGateway::new().create_room_failure(500, "database unavailable");

    let (mut session, mut events) =
        DuelSession::start(transport, gateway, SessionConfig::creator("u1"));

    let mut errors = 0;
    loop {
        let event = next_event(&mut events).await;
        if matches!(
            event,
            SessionEvent::Notification {
                kind: NotificationKind::Error,
                ..
            }
        ) {
            errors += 1;
        }
        if matches!(
            event,
            SessionEvent::ConnectionChanged(code_duel_client::ConnectionStatus::Connected)
        ) {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    errors += drain_now(&mut events)
        .iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::Notification {
                    kind: NotificationKind::Error,
                    ..
                }
            )
        })
        .count();
    assert_eq!(errors, 1);

    session.shutdown().await;
}

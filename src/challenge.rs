//! Per-participant question lifecycle: select a difficulty, fetch a
//! problem, iterate, then submit or skip.
//!
//! Each participant holds at most one active question at a time. The
//! local slot walks `Idle → Fetching → HasActiveQuestion` and returns
//! to `Idle` on submit-success, on skip, or when a fetch fails. Remote
//! slots never fetch — they are written only from inbound
//! `player_selected_question` / `player_answered_question` events.

use crate::protocol::{Problem, SubmitOutcome};

/// Lifecycle state of one participant's question slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengePhase {
    #[default]
    Idle,
    /// A fetch-problem call is in flight.
    Fetching,
    HasActiveQuestion,
}

/// One participant's active-question slot.
#[derive(Debug, Default)]
pub struct ChallengeSlot {
    phase: ChallengePhase,
    question: Option<Problem>,
}

impl ChallengeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ChallengePhase {
        self.phase
    }

    pub fn question(&self) -> Option<&Problem> {
        self.question.as_ref()
    }

    /// Begin a fetch. Returns `false` (and changes nothing) unless the
    /// slot is `Idle` — difficulty selection is only valid with no
    /// question in flight or active.
    pub fn begin_fetch(&mut self) -> bool {
        if self.phase != ChallengePhase::Idle {
            return false;
        }
        self.phase = ChallengePhase::Fetching;
        true
    }

    /// Install a fetched problem.
    pub fn install(&mut self, problem: Problem) {
        self.phase = ChallengePhase::HasActiveQuestion;
        self.question = Some(problem);
    }

    /// A fetch failed: back to `Idle` with no question.
    pub fn fetch_failed(&mut self) {
        self.phase = ChallengePhase::Idle;
        self.question = None;
    }

    /// Clear the slot (submit-success, skip, or remote answered event).
    /// Returns the question that was active, if any.
    pub fn clear(&mut self) -> Option<Problem> {
        self.phase = ChallengePhase::Idle;
        self.question.take()
    }
}

/// Turn escaped control sequences in a solution template into real
/// characters. The problem bank stores templates with literal `\n`
/// sequences; the editor needs actual line breaks.
pub fn unescape_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            // Unknown escape: keep it verbatim.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Success banner for a full pass.
pub fn format_success(outcome: &SubmitOutcome) -> String {
    format!(
        "Solution accepted! Passed {}/{} test cases",
        outcome.passed_tests, outcome.total_tests
    )
}

/// Structured report for a partial failure: one line per failing case
/// with its expected and actual output.
pub fn format_failure_report(outcome: &SubmitOutcome) -> String {
    let failed = outcome.total_tests.saturating_sub(outcome.passed_tests);
    let mut report = format!(
        "Failed {failed} of {} test cases:",
        outcome.total_tests
    );
    for case in outcome.per_test.iter().filter(|c| !c.passed) {
        report.push_str(&format!(
            "\n  case {}: expected {}, got {}",
            case.case, case.expected, case.actual
        ));
    }
    report
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
    use crate::protocol::{Difficulty, TestCaseResult};

    fn problem() -> Problem {
        Problem {
            problem_id: "p1".into(),
            title: "Two Sum".into(),
            difficulty: Difficulty::Easy,
            description: "Find indices that sum to target".into(),
            solution_template: "def two_sum(nums, target):\\n    pass\\n".into(),
        }
    }

    #[test]
    fn fetch_only_valid_from_idle() {
        let mut slot = ChallengeSlot::new();
        assert!(slot.begin_fetch());
        // Already fetching: a second selection is rejected.
        assert!(!slot.begin_fetch());

        slot.install(problem());
        assert_eq!(slot.phase(), ChallengePhase::HasActiveQuestion);
        // Holding a question: still rejected.
        assert!(!slot.begin_fetch());

        slot.clear();
        assert!(slot.begin_fetch());
    }

    #[test]
    fn fetch_failure_returns_to_idle() {
        let mut slot = ChallengeSlot::new();
        assert!(slot.begin_fetch());
        slot.fetch_failed();
        assert_eq!(slot.phase(), ChallengePhase::Idle);
        assert!(slot.question().is_none());
    }

    #[test]
    fn clear_returns_active_question() {
        let mut slot = ChallengeSlot::new();
        slot.begin_fetch();
        slot.install(problem());

        let cleared = slot.clear().unwrap();
        assert_eq!(cleared.problem_id, "p1");
        assert_eq!(slot.phase(), ChallengePhase::Idle);
        assert!(slot.clear().is_none());
    }

    #[test]
    fn unescape_turns_sequences_into_real_characters() {
        assert_eq!(
            unescape_template("def f():\\n\\treturn \\\"x\\\"\\n"),
            "def f():\n\treturn \"x\"\n"
        );
        assert_eq!(unescape_template("a\\\\n"), "a\\n");
        assert_eq!(unescape_template("no escapes"), "no escapes");
        // Trailing lone backslash survives.
        assert_eq!(unescape_template("tail\\"), "tail\\");
        // Unknown escapes pass through verbatim.
        assert_eq!(unescape_template("\\q"), "\\q");
    }

    #[test]
    fn failure_report_lists_only_failing_cases() {
        let outcome = SubmitOutcome {
            passed: false,
            passed_tests: 1,
            total_tests: 3,
            per_test: vec![
                TestCaseResult {
                    case: "[1, 2]".into(),
                    expected: "3".into(),
                    actual: "3".into(),
                    passed: true,
                },
                TestCaseResult {
                    case: "[2, 2]".into(),
                    expected: "4".into(),
                    actual: "5".into(),
                    passed: false,
                },
                TestCaseResult {
                    case: "[0, 0]".into(),
                    expected: "0".into(),
                    actual: "-1".into(),
                    passed: false,
                },
            ],
        };

        let report = format_failure_report(&outcome);
        assert!(report.starts_with("Failed 2 of 3 test cases:"));
        assert!(report.contains("case [2, 2]: expected 4, got 5"));
        assert!(report.contains("case [0, 0]: expected 0, got -1"));
        assert!(!report.contains("[1, 2]"));
    }

    #[test]
    fn success_banner_contains_pass_count() {
        let outcome = SubmitOutcome {
            passed: true,
            passed_tests: 5,
            total_tests: 5,
            per_test: vec![],
        };
        assert_eq!(
            format_success(&outcome),
            "Solution accepted! Passed 5/5 test cases"
        );
    }
}

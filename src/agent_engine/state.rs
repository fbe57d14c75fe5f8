use std::sync::Arc;

use crate::agent_engine::action::{Action, Proposal};
use crate::agent_engine::history::{StepDraft, StepOutcome};
use crate::agent_engine::loop_control::{Counters, LoopLimits};
use crate::agent_engine::task::{FailureReason, TaskOutcome, TaskPhase};
use crate::executor::safety::Verdict;
use crate::perception::types::Observation;

/// Orchestrator state. Exactly one is active per task; the payload carries
/// what the next collaborator call needs.
#[derive(Debug, Clone)]
pub enum LoopState {
    Created,
    Perceiving,
    Planning { observation: Arc<Observation> },
    Gating { observation: Arc<Observation>, action: Action },
    Acting { observation: Arc<Observation>, action: Action },
    /// A resolved step waiting to be appended.
    Recording { observation: Arc<Observation>, draft: StepDraft },
    Terminal(TaskOutcome),
}

impl LoopState {
    pub fn phase(&self) -> TaskPhase {
        match self {
            LoopState::Created => TaskPhase::Created,
            LoopState::Perceiving => TaskPhase::Perceiving,
            LoopState::Planning { .. } => TaskPhase::Planning,
            LoopState::Gating { .. } => TaskPhase::Gating,
            LoopState::Acting { .. } => TaskPhase::Acting,
            LoopState::Recording { .. } => TaskPhase::Recording,
            LoopState::Terminal(outcome) => outcome.phase(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Terminal(_))
    }
}

/// What happened while a state was active.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Start,
    Perceived(Arc<Observation>),
    PerceptionFailed(String),
    Proposed(Proposal),
    PlannerFailed(String),
    Gated(Verdict),
    Executed(StepOutcome),
    Recorded,
    Cancelled,
}

fn fail(reason: FailureReason, detail: impl Into<String>) -> LoopState {
    LoopState::Terminal(TaskOutcome::Failed { reason, detail: detail.into() })
}

/// Pure transition function of the perceive-plan-act loop.
///
/// Terminal states absorb every event. A cancellation moves any other state
/// to `Cancelled`. Pairs that cannot occur in a correct runner fail the task
/// with `internal` instead of panicking.
pub fn transition(
    state: LoopState,
    event: LoopEvent,
    counters: Counters,
    limits: &LoopLimits,
) -> (LoopState, Counters) {
    let mut c = counters;

    if state.is_terminal() {
        return (state, c);
    }
    if let LoopEvent::Cancelled = event {
        let during = state.phase();
        return (LoopState::Terminal(TaskOutcome::Cancelled { during }), c);
    }

    let next = match (state, event) {
        (LoopState::Created, LoopEvent::Start) => LoopState::Perceiving,

        (LoopState::Perceiving, LoopEvent::Perceived(observation)) => {
            c.perception_failures = 0;
            LoopState::Planning { observation }
        }
        (LoopState::Perceiving, LoopEvent::PerceptionFailed(error)) => {
            c.perception_failures += 1;
            if c.perception_failures >= limits.perception_failure_threshold {
                fail(
                    FailureReason::PerceptionUnavailable,
                    format!("perception failed {} times in a row: {error}", c.perception_failures),
                )
            } else {
                LoopState::Perceiving
            }
        }

        (LoopState::Planning { .. }, LoopEvent::Proposed(Proposal::Done { summary })) => {
            LoopState::Terminal(TaskOutcome::Completed { summary })
        }
        (LoopState::Planning { .. }, LoopEvent::Proposed(Proposal::Blocked { reason })) => {
            fail(FailureReason::PlannerBlocked, reason)
        }
        (LoopState::Planning { observation }, LoopEvent::Proposed(Proposal::Act { action })) => {
            c.planner_failures = 0;
            c = c.note_proposal(action.fingerprint());
            if limits.max_repeated_actions > 0 && c.repeats > limits.max_repeated_actions {
                fail(
                    FailureReason::ActionLoop,
                    format!("'{}' proposed {} times in a row", action.kind.name(), c.repeats),
                )
            } else {
                LoopState::Gating { observation, action }
            }
        }
        (LoopState::Planning { observation }, LoopEvent::PlannerFailed(error)) => {
            c.planner_failures += 1;
            if c.planner_failures >= limits.planner_failure_threshold {
                fail(
                    FailureReason::PlannerUnavailable,
                    format!("planner failed {} times in a row: {error}", c.planner_failures),
                )
            } else {
                LoopState::Planning { observation }
            }
        }

        (LoopState::Gating { observation, action }, LoopEvent::Gated(Verdict::Authorized)) => {
            c.denials = 0;
            LoopState::Acting { observation, action }
        }
        (
            LoopState::Gating { observation, action },
            LoopEvent::Gated(verdict @ Verdict::Denied { .. }),
        ) => {
            c.denials += 1;
            let draft = StepDraft {
                observation_seq: observation.seq,
                action,
                verdict,
                outcome: StepOutcome::Skipped,
            };
            LoopState::Recording { observation, draft }
        }

        (LoopState::Acting { observation, action }, LoopEvent::Executed(outcome)) => {
            let draft = StepDraft {
                observation_seq: observation.seq,
                action,
                verdict: Verdict::Authorized,
                outcome,
            };
            LoopState::Recording { observation, draft }
        }

        (LoopState::Recording { observation, draft }, LoopEvent::Recorded) => {
            if draft.verdict.is_authorized() {
                c.steps += 1;
                if c.steps >= limits.max_steps {
                    fail(
                        FailureReason::StepBudgetExceeded,
                        format!("step budget of {} exhausted", limits.max_steps),
                    )
                } else {
                    LoopState::Perceiving
                }
            } else if c.denials >= limits.denial_threshold {
                fail(
                    FailureReason::PermissionExhausted,
                    format!("{} consecutive actions denied", c.denials),
                )
            } else {
                LoopState::Planning { observation }
            }
        }

        (state, event) => {
            tracing::error!(phase = %state.phase(), ?event, "event does not apply to state");
            fail(
                FailureReason::Internal,
                format!("unexpected {event:?} while {}", state.phase()),
            )
        }
    };

    (next, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::{ActionKind, MouseButton};
    use crate::executor::safety::Capability;
    use crate::perception::types::SceneDescription;

    fn obs(seq: u64) -> Arc<Observation> {
        Arc::new(Observation {
            seq,
            scene: SceneDescription::default(),
            captured_at: chrono::Utc::now(),
        })
    }

    fn click(x: i32) -> Action {
        Action::new(ActionKind::PointerClick { x, y: 0, button: MouseButton::Left })
    }

    fn limits() -> LoopLimits {
        LoopLimits { max_steps: 3, ..LoopLimits::default() }
    }

    fn run(events: Vec<LoopEvent>, limits: &LoopLimits) -> (LoopState, Counters) {
        events.into_iter().fold((LoopState::Created, Counters::default()), |(s, c), e| {
            transition(s, e, c, limits)
        })
    }

    fn denied() -> LoopEvent {
        LoopEvent::Gated(Verdict::Denied { missing: vec![Capability::PointerControl] })
    }

    #[test]
    fn happy_cycle_returns_to_perceiving() {
        let (state, c) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::Perceived(obs(1)),
                LoopEvent::Proposed(Proposal::Act { action: click(1) }),
                LoopEvent::Gated(Verdict::Authorized),
                LoopEvent::Executed(StepOutcome::Succeeded { detail: "ok".into() }),
                LoopEvent::Recorded,
            ],
            &limits(),
        );
        assert!(matches!(state, LoopState::Perceiving));
        assert_eq!(c.steps, 1);
    }

    #[test]
    fn perception_fails_at_threshold_exactly() {
        let l = limits();
        let (s, c) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::PerceptionFailed("a".into()),
                LoopEvent::PerceptionFailed("b".into()),
            ],
            &l,
        );
        assert!(matches!(s, LoopState::Perceiving));
        assert_eq!(c.perception_failures, 2);
        let (s, _) = transition(s, LoopEvent::PerceptionFailed("c".into()), c, &l);
        match s {
            LoopState::Terminal(outcome) => {
                assert_eq!(outcome.failure_reason(), Some(FailureReason::PerceptionUnavailable))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn successful_perception_resets_failure_streak() {
        let (_, c) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::PerceptionFailed("a".into()),
                LoopEvent::Perceived(obs(1)),
            ],
            &limits(),
        );
        assert_eq!(c.perception_failures, 0);
    }

    #[test]
    fn denial_goes_through_recording_back_to_planning() {
        let (s, c) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::Perceived(obs(4)),
                LoopEvent::Proposed(Proposal::Act { action: click(1) }),
                denied(),
            ],
            &limits(),
        );
        match &s {
            LoopState::Recording { draft, .. } => {
                assert_eq!(draft.outcome, StepOutcome::Skipped);
                assert_eq!(draft.observation_seq, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        let (s, c) = transition(s, LoopEvent::Recorded, c, &limits());
        match s {
            LoopState::Planning { observation } => assert_eq!(observation.seq, 4),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.steps, 0);
        assert_eq!(c.denials, 1);
    }

    #[test]
    fn denials_exhaust_after_threshold_records() {
        let l = limits();
        let mut events = vec![LoopEvent::Start, LoopEvent::Perceived(obs(1))];
        for i in 0..l.denial_threshold {
            events.push(LoopEvent::Proposed(Proposal::Act { action: click(i as i32) }));
            events.push(denied());
            events.push(LoopEvent::Recorded);
        }
        let (s, c) = run(events, &l);
        assert_eq!(c.denials, l.denial_threshold);
        match s {
            LoopState::Terminal(o) => {
                assert_eq!(o.failure_reason(), Some(FailureReason::PermissionExhausted))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn authorization_resets_denial_streak() {
        let (_, c) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::Perceived(obs(1)),
                LoopEvent::Proposed(Proposal::Act { action: click(1) }),
                denied(),
                LoopEvent::Recorded,
                LoopEvent::Proposed(Proposal::Act { action: click(2) }),
                LoopEvent::Gated(Verdict::Authorized),
            ],
            &limits(),
        );
        assert_eq!(c.denials, 0);
    }

    #[test]
    fn budget_fails_after_max_steps_records() {
        let l = limits();
        let mut events = vec![LoopEvent::Start];
        for i in 0..l.max_steps {
            events.push(LoopEvent::Perceived(obs(i as u64 + 1)));
            events.push(LoopEvent::Proposed(Proposal::Act { action: click(i as i32) }));
            events.push(LoopEvent::Gated(Verdict::Authorized));
            events.push(LoopEvent::Executed(StepOutcome::Failed { reason: "nope".into() }));
            events.push(LoopEvent::Recorded);
        }
        let (s, c) = run(events, &l);
        assert_eq!(c.steps, l.max_steps);
        match s {
            LoopState::Terminal(o) => {
                assert_eq!(o.failure_reason(), Some(FailureReason::StepBudgetExceeded))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn done_and_blocked_are_terminal() {
        let (s, _) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::Perceived(obs(1)),
                LoopEvent::Proposed(Proposal::Done { summary: "ok".into() }),
            ],
            &limits(),
        );
        assert_eq!(s.phase(), TaskPhase::Completed);

        let (s, _) = run(
            vec![
                LoopEvent::Start,
                LoopEvent::Perceived(obs(1)),
                LoopEvent::Proposed(Proposal::Blocked { reason: "no editor".into() }),
            ],
            &limits(),
        );
        match s {
            LoopState::Terminal(TaskOutcome::Failed { reason, detail }) => {
                assert_eq!(reason, FailureReason::PlannerBlocked);
                assert_eq!(detail, "no editor");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn planner_failures_retry_then_fail() {
        let l = limits();
        let mut events = vec![LoopEvent::Start, LoopEvent::Perceived(obs(1))];
        for _ in 0..l.planner_failure_threshold - 1 {
            events.push(LoopEvent::PlannerFailed("timeout".into()));
        }
        let (s, c) = run(events, &l);
        assert_eq!(s.phase(), TaskPhase::Planning);
        let (s, _) = transition(s, LoopEvent::PlannerFailed("timeout".into()), c, &l);
        match s {
            LoopState::Terminal(o) => {
                assert_eq!(o.failure_reason(), Some(FailureReason::PlannerUnavailable))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancellation_wins_from_every_live_state() {
        let live = vec![
            LoopState::Created,
            LoopState::Perceiving,
            LoopState::Planning { observation: obs(1) },
            LoopState::Gating { observation: obs(1), action: click(1) },
            LoopState::Acting { observation: obs(1), action: click(1) },
        ];
        for state in live {
            let phase = state.phase();
            let (next, _) = transition(state, LoopEvent::Cancelled, Counters::default(), &limits());
            match next {
                LoopState::Terminal(TaskOutcome::Cancelled { during }) => assert_eq!(during, phase),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn terminal_states_absorb_events() {
        let done = LoopState::Terminal(TaskOutcome::Completed { summary: "x".into() });
        let (s, _) = transition(done, LoopEvent::Cancelled, Counters::default(), &limits());
        assert_eq!(s.phase(), TaskPhase::Completed);
    }

    #[test]
    fn mismatched_event_is_internal_failure() {
        let (s, _) = transition(
            LoopState::Perceiving,
            LoopEvent::Recorded,
            Counters::default(),
            &limits(),
        );
        match s {
            LoopState::Terminal(o) => assert_eq!(o.failure_reason(), Some(FailureReason::Internal)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_action_detection_when_enabled() {
        let l = LoopLimits { max_repeated_actions: 2, max_steps: 10, ..LoopLimits::default() };
        let mut s = LoopState::Perceiving;
        let mut c = Counters::default();
        for round in 0..3 {
            (s, c) = transition(s, LoopEvent::Perceived(obs(round + 1)), c, &l);
            (s, c) = transition(s, LoopEvent::Proposed(Proposal::Act { action: click(5) }), c, &l);
            if round < 2 {
                (s, c) = transition(s, LoopEvent::Gated(Verdict::Authorized), c, &l);
                (s, c) = transition(
                    s,
                    LoopEvent::Executed(StepOutcome::Succeeded { detail: String::new() }),
                    c,
                    &l,
                );
                (s, c) = transition(s, LoopEvent::Recorded, c, &l);
            }
        }
        match s {
            LoopState::Terminal(o) => {
                assert_eq!(o.failure_reason(), Some(FailureReason::ActionLoop))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_action_detection_disabled_by_default() {
        let l = LoopLimits { max_steps: 50, ..LoopLimits::default() };
        let mut s = LoopState::Perceiving;
        let mut c = Counters::default();
        for round in 0..10 {
            (s, c) = transition(s, LoopEvent::Perceived(obs(round + 1)), c, &l);
            (s, c) = transition(s, LoopEvent::Proposed(Proposal::Act { action: click(5) }), c, &l);
            (s, c) = transition(s, LoopEvent::Gated(Verdict::Authorized), c, &l);
            (s, c) = transition(
                s,
                LoopEvent::Executed(StepOutcome::Succeeded { detail: String::new() }),
                c,
                &l,
            );
            (s, c) = transition(s, LoopEvent::Recorded, c, &l);
        }
        assert!(matches!(s, LoopState::Perceiving));
        assert_eq!(c.repeats, 10);
    }
}

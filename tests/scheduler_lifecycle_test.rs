/// Scheduler behavioral tests
///
/// Standalone models of the job lifecycle, the retry policy, and the
/// dependency gate, validating the state machines the scheduler service
/// enforces against the store:
/// - Job status lifecycle (pending → active ⇄ paused, terminal states)
/// - Manual trigger eligibility
/// - Retry backoff schedule and exhaustion
/// - Dependency-gate decision matrix
///
/// NOTE: These tests validate transition rules and policy arithmetic.
/// End-to-end coverage against a live database requires a running Postgres
/// and the API server.

// ---------------------------------------------------------------------------
// Job status lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    TimerInstalled,
    Pause,
    Resume,
    ExecuteNowSucceeded,
    RetriesExhausted,
}

/// The transitions the scheduler is allowed to drive.
fn apply(status: JobStatus, event: Event) -> Option<JobStatus> {
    use Event::*;
    use JobStatus::*;

    match (status, event) {
        (Pending, TimerInstalled) => Some(Active),
        (Active, Pause) | (Pending, Pause) => Some(Paused),
        (Paused, Resume) => Some(Active),
        (Active, ExecuteNowSucceeded) => Some(Completed),
        (Active, RetriesExhausted) => Some(Failed),
        _ => None,
    }
}

fn is_triggerable(status: JobStatus) -> bool {
    matches!(status, JobStatus::Pending | JobStatus::Active)
}

#[test]
fn test_pending_becomes_active_on_install() {
    assert_eq!(
        apply(JobStatus::Pending, Event::TimerInstalled),
        Some(JobStatus::Active)
    );
}

#[test]
fn test_pause_resume_round_trip() {
    let paused = apply(JobStatus::Active, Event::Pause).unwrap();
    assert_eq!(paused, JobStatus::Paused);
    assert_eq!(apply(paused, Event::Resume), Some(JobStatus::Active));
}

#[test]
fn test_terminal_states_accept_no_transitions() {
    for event in [
        Event::TimerInstalled,
        Event::Pause,
        Event::Resume,
        Event::ExecuteNowSucceeded,
        Event::RetriesExhausted,
    ] {
        assert_eq!(apply(JobStatus::Completed, event), None);
        assert_eq!(apply(JobStatus::Failed, event), None);
    }
}

#[test]
fn test_trigger_rejected_unless_active_or_pending() {
    assert!(is_triggerable(JobStatus::Pending));
    assert!(is_triggerable(JobStatus::Active));
    assert!(!is_triggerable(JobStatus::Paused));
    assert!(!is_triggerable(JobStatus::Completed));
    assert!(!is_triggerable(JobStatus::Failed));
}

#[test]
fn test_completed_execute_now_job_cannot_be_retriggered() {
    // Second manual trigger of a finished execute_now job must be rejected
    let status = apply(JobStatus::Active, Event::ExecuteNowSucceeded).unwrap();
    assert!(!is_triggerable(status));
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: i32,
    retry_delay_seconds: i32,
    retry_backoff_multiplier: f64,
}

#[derive(Debug, PartialEq)]
enum RetryDecision {
    ScheduleIn(f64),
    GiveUp,
}

/// Decision after a transient failure on attempt `current_attempt`
/// (0 = first try).
fn on_transient_failure(policy: RetryPolicy, current_attempt: i32) -> RetryDecision {
    if current_attempt >= policy.max_retries {
        return RetryDecision::GiveUp;
    }
    let delay = policy.retry_delay_seconds as f64
        * policy.retry_backoff_multiplier.powi(current_attempt);
    RetryDecision::ScheduleIn(delay)
}

#[test]
fn test_backoff_schedule_is_exponential() {
    let policy = RetryPolicy {
        max_retries: 3,
        retry_delay_seconds: 60,
        retry_backoff_multiplier: 2.0,
    };

    assert_eq!(on_transient_failure(policy, 0), RetryDecision::ScheduleIn(60.0));
    assert_eq!(on_transient_failure(policy, 1), RetryDecision::ScheduleIn(120.0));
    assert_eq!(on_transient_failure(policy, 2), RetryDecision::ScheduleIn(240.0));
}

#[test]
fn test_retries_exhaust_at_max() {
    let policy = RetryPolicy {
        max_retries: 3,
        retry_delay_seconds: 60,
        retry_backoff_multiplier: 2.0,
    };

    assert_eq!(on_transient_failure(policy, 3), RetryDecision::GiveUp);
    assert_eq!(on_transient_failure(policy, 7), RetryDecision::GiveUp);
}

#[test]
fn test_zero_max_retries_never_schedules() {
    let policy = RetryPolicy {
        max_retries: 0,
        retry_delay_seconds: 60,
        retry_backoff_multiplier: 2.0,
    };

    assert_eq!(on_transient_failure(policy, 0), RetryDecision::GiveUp);
}

#[test]
fn test_unit_multiplier_gives_constant_delay() {
    let policy = RetryPolicy {
        max_retries: 5,
        retry_delay_seconds: 30,
        retry_backoff_multiplier: 1.0,
    };

    for attempt in 0..5 {
        assert_eq!(
            on_transient_failure(policy, attempt),
            RetryDecision::ScheduleIn(30.0)
        );
    }
}

// ---------------------------------------------------------------------------
// Dependency gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Success,
    Complete,
    Any,
}

#[derive(Debug, Clone, Copy)]
struct ParentState {
    exists: bool,
    status: JobStatus,
    has_ever_run: bool,
    last_execution: Option<&'static str>,
}

fn dependency_met(condition: Condition, parent: ParentState) -> bool {
    if !parent.exists {
        return false;
    }

    match condition {
        Condition::Success => parent.last_execution == Some("success"),
        Condition::Complete => {
            matches!(parent.status, JobStatus::Completed | JobStatus::Failed)
                || matches!(parent.last_execution, Some(s) if s != "running")
        }
        Condition::Any => parent.has_ever_run,
    }
}

#[test]
fn test_missing_parent_blocks_every_condition() {
    let missing = ParentState {
        exists: false,
        status: JobStatus::Active,
        has_ever_run: true,
        last_execution: Some("success"),
    };

    for condition in [Condition::Success, Condition::Complete, Condition::Any] {
        assert!(!dependency_met(condition, missing));
    }
}

#[test]
fn test_success_condition_matrix() {
    let base = ParentState {
        exists: true,
        status: JobStatus::Active,
        has_ever_run: true,
        last_execution: None,
    };

    assert!(!dependency_met(Condition::Success, base));
    assert!(!dependency_met(
        Condition::Success,
        ParentState {
            last_execution: Some("failed"),
            ..base
        }
    ));
    assert!(dependency_met(
        Condition::Success,
        ParentState {
            last_execution: Some("success"),
            ..base
        }
    ));
}

#[test]
fn test_complete_condition_accepts_failed_parents() {
    let failed_status = ParentState {
        exists: true,
        status: JobStatus::Failed,
        has_ever_run: true,
        last_execution: None,
    };
    assert!(dependency_met(Condition::Complete, failed_status));

    let failed_execution = ParentState {
        exists: true,
        status: JobStatus::Active,
        has_ever_run: true,
        last_execution: Some("failed"),
    };
    assert!(dependency_met(Condition::Complete, failed_execution));
}

#[test]
fn test_any_condition_needs_one_prior_run() {
    let never_ran = ParentState {
        exists: true,
        status: JobStatus::Active,
        has_ever_run: false,
        last_execution: None,
    };
    assert!(!dependency_met(Condition::Any, never_ran));

    let ran_and_failed = ParentState {
        exists: true,
        status: JobStatus::Active,
        has_ever_run: true,
        last_execution: Some("failed"),
    };
    assert!(dependency_met(Condition::Any, ran_and_failed));
}

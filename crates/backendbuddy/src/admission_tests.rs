use std::time::Duration;

use super::*;

#[test]
fn join_mints_a_session_when_none_given() {
    let ctrl = AdmissionController::new(1, true, Duration::from_secs(30));
    let (decision, changed) = ctrl.join(None, false);
    assert!(!decision.session.is_empty());
    assert_eq!(decision.status, SessionStatus::Active);
    assert!(changed);
}

#[test]
fn repeated_join_for_active_session_is_idempotent_and_not_changed() {
    let ctrl = AdmissionController::new(1, true, Duration::from_secs(30));
    let (first, _) = ctrl.join(Some("s1".to_owned()), false);
    assert_eq!(first.status, SessionStatus::Active);

    let (second, changed) = ctrl.join(Some("s1".to_owned()), false);
    assert_eq!(second.status, SessionStatus::Active);
    assert_eq!(second.position, 0);
    assert!(!changed);
}

#[test]
fn repeated_join_for_waiting_session_reports_its_current_position() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.join(Some("s1".to_owned()), false);
    let (waiting, changed) = ctrl.join(Some("s2".to_owned()), false);
    assert_eq!(waiting.status, SessionStatus::Waiting);
    assert_eq!(waiting.position, 1);
    assert!(changed);

    let (again, changed_again) = ctrl.join(Some("s2".to_owned()), false);
    assert_eq!(again.status, SessionStatus::Waiting);
    assert_eq!(again.position, 1);
    assert!(!changed_again);
}

// Scenario A — single-slot queuing (spec §8).
#[test]
fn scenario_a_single_slot_queuing() {
    let ctrl = AdmissionController::new(1, true, Duration::from_secs(30));

    let (s1, _) = ctrl.join(Some("s1".to_owned()), false);
    assert_eq!(s1.status, SessionStatus::Active);

    let (s2, _) = ctrl.join(Some("s2".to_owned()), false);
    assert_eq!(s2.status, SessionStatus::Waiting);
    assert_eq!(s2.position, 1);

    assert!(ctrl.leave("s1"));

    let after = ctrl.status("s2").expect("s2 known");
    assert_eq!(after.status, SessionStatus::Active);
    assert_eq!(after.position, 0);
}

// Scenario B — localhost bypass (spec §8).
#[test]
fn scenario_b_localhost_bypasses_cap() {
    let ctrl = AdmissionController::new(1, true, Duration::from_secs(30));

    let (s1, _) = ctrl.join(Some("s1".to_owned()), false);
    assert_eq!(s1.status, SessionStatus::Active);

    let (localhost, _) = ctrl.join(Some("sl".to_owned()), true);
    assert_eq!(localhost.status, SessionStatus::Active);

    let snapshot = ctrl.snapshot();
    assert_eq!(snapshot.active_count, 2, "localhost bypasses the cap transiently");

    let (s3, _) = ctrl.join(Some("s3".to_owned()), false);
    assert_eq!(s3.status, SessionStatus::Waiting);
    assert_eq!(s3.position, 1);
}

// Scenario C — heartbeat timeout (spec §8). Uses a zero-duration timeout to
// emulate "advance the clock 31s" without a fake clock: any entry whose
// heartbeat predates `now` by more than zero is immediately a zombie.
#[test]
fn scenario_c_heartbeat_timeout_evicts_and_promotes() {
    let ctrl = AdmissionController::new(1, false, Duration::from_nanos(1));

    let (s1, _) = ctrl.join(Some("s1".to_owned()), false);
    assert_eq!(s1.status, SessionStatus::Active);
    let (s2, _) = ctrl.join(Some("s2".to_owned()), false);
    assert_eq!(s2.status, SessionStatus::Waiting);

    std::thread::sleep(Duration::from_millis(5));
    let changed = ctrl.reap();
    assert!(changed);

    assert!(ctrl.status("s1").is_none(), "s1 should have been evicted as a zombie");
    // s2 was waiting and its heartbeat is equally stale, so it too is reaped;
    // reap() evicts zombies from both sets before promoting the survivors.
    assert!(ctrl.status("s2").is_none());
}

#[test]
fn heartbeat_on_active_session_does_not_change_status_or_position() {
    let ctrl = AdmissionController::new(2, false, Duration::from_secs(30));
    ctrl.join(Some("s1".to_owned()), false);
    let status = ctrl.heartbeat("s1").expect("known session");
    assert_eq!(status.status, SessionStatus::Active);
    assert_eq!(status.position, 0);
}

#[test]
fn heartbeat_on_waiting_session_reports_position_without_reordering() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.join(Some("s1".to_owned()), false);
    ctrl.join(Some("s2".to_owned()), false);
    ctrl.join(Some("s3".to_owned()), false);

    let status = ctrl.heartbeat("s3").expect("known session");
    assert_eq!(status.status, SessionStatus::Waiting);
    assert_eq!(status.position, 2);

    // Order preserved: s2 still ahead of s3.
    let s2 = ctrl.status("s2").expect("known");
    assert_eq!(s2.position, 1);
}

#[test]
fn heartbeat_on_unknown_session_returns_none() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    assert!(ctrl.heartbeat("ghost").is_none());
}

#[test]
fn leave_on_unknown_session_is_benign() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    assert!(!ctrl.leave("ghost"));
}

#[test]
fn waiting_list_positions_are_always_the_dense_sequence() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.join(Some("active".to_owned()), false);
    ctrl.join(Some("a".to_owned()), false);
    ctrl.join(Some("b".to_owned()), false);
    ctrl.join(Some("c".to_owned()), false);

    let snapshot = ctrl.snapshot();
    let positions: Vec<usize> = snapshot.waiting.iter().map(|w| w.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);

    ctrl.leave("b");
    let snapshot = ctrl.snapshot();
    let positions: Vec<usize> = snapshot.waiting.iter().map(|w| w.position).collect();
    assert_eq!(positions, vec![1, 2]);
    let sessions: Vec<&str> = snapshot.waiting.iter().map(|w| w.session.as_str()).collect();
    assert_eq!(sessions, vec!["a", "c"]);
}

#[test]
fn estimated_wait_is_position_times_30_seconds() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.join(Some("active".to_owned()), false);
    ctrl.join(Some("s1".to_owned()), false);
    let status = ctrl.status("s1").expect("known");
    assert_eq!(status.estimated_wait_secs, Some(30));
}

#[test]
fn configure_reducing_cap_does_not_evict_active_sessions() {
    let ctrl = AdmissionController::new(3, false, Duration::from_secs(30));
    ctrl.join(Some("a".to_owned()), false);
    ctrl.join(Some("b".to_owned()), false);
    ctrl.join(Some("c".to_owned()), false);
    assert_eq!(ctrl.snapshot().active_count, 3);

    ctrl.configure(1, false);
    assert_eq!(ctrl.snapshot().active_count, 3, "reducing cap must not evict already-active sessions");

    // New admissions use the new cap.
    let (d, _) = ctrl.join(Some("d".to_owned()), false);
    assert_eq!(d.status, SessionStatus::Waiting);
}

#[test]
fn configure_coerces_cap_to_at_least_one() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.configure(0, false);
    let (first, _) = ctrl.join(Some("a".to_owned()), false);
    assert_eq!(first.status, SessionStatus::Active);
}

#[test]
fn promotion_is_strictly_fifo() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.join(Some("active".to_owned()), false);
    ctrl.join(Some("a".to_owned()), false);
    ctrl.join(Some("b".to_owned()), false);

    ctrl.leave("active");
    let a = ctrl.status("a").expect("known");
    assert_eq!(a.status, SessionStatus::Active);
    let b = ctrl.status("b").expect("known");
    assert_eq!(b.status, SessionStatus::Waiting);
    assert_eq!(b.position, 1);
}

#[test]
fn reap_with_all_entries_fresh_reports_no_change() {
    let ctrl = AdmissionController::new(1, false, Duration::from_secs(30));
    ctrl.join(Some("a".to_owned()), false);
    assert!(!ctrl.reap());
}

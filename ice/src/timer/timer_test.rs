use super::*;
use std::thread::sleep;

#[test]
fn test_scheduler_first_send_is_immediate() {
    let s = PacketScheduler::new(Duration::from_millis(50));
    assert!(s.is_time_to_retransmit());
    assert!(!s.attempt_limit_reached());
    assert!(!s.is_timeout());
}

#[test]
fn test_scheduler_waits_for_the_doubled_rto() {
    // every attempt doubles the RTO, so after the first send the next
    // retransmission waits two initial RTOs
    let mut s = PacketScheduler::new(Duration::from_millis(100));
    assert!(s.is_time_to_retransmit());
    s.attempt_made(); // rto now 200ms

    sleep(Duration::from_millis(50));
    assert!(!s.is_time_to_retransmit());
    sleep(Duration::from_millis(200));
    assert!(s.is_time_to_retransmit());
}

#[test]
fn test_scheduler_backoff_doubles() {
    let mut s = PacketScheduler::new(Duration::from_millis(50));
    s.attempt_made(); // rto now 100ms
    s.attempt_made(); // rto now 200ms

    sleep(Duration::from_millis(60));
    assert!(!s.is_time_to_retransmit());
    sleep(Duration::from_millis(180));
    assert!(s.is_time_to_retransmit());
}

#[test]
fn test_scheduler_attempt_limit() {
    let mut s = PacketScheduler::new(Duration::from_millis(1));
    for _ in 0..RTO_ATTEMPT_LIMIT {
        s.attempt_made();
    }
    assert!(s.attempt_limit_reached());
    // 16 RTOs have not passed yet
    assert!(!s.is_timeout());
}

#[test]
fn test_scheduler_restart_resets_backoff() {
    let mut s = PacketScheduler::new(Duration::from_millis(10));
    for _ in 0..RTO_ATTEMPT_LIMIT {
        s.attempt_made();
    }
    s.restart();
    assert!(!s.attempt_limit_reached());
    assert!(s.is_time_to_retransmit());
}

#[test]
fn test_tick_timer_catches_up() {
    let mut t = TickTimer::default();
    t.start(Duration::from_millis(5));
    assert!(t.is_time_to_send()); // immediate first tick

    sleep(Duration::from_millis(16));
    // at least three intervals elapsed, at least three ticks owed
    assert!(t.is_time_to_send());
    assert!(t.is_time_to_send());
    assert!(t.is_time_to_send());
}

#[test]
fn test_tick_timer_stopped() {
    let mut t = TickTimer::default();
    assert!(!t.is_time_to_send());
    t.start(Duration::from_millis(5));
    t.stop();
    assert!(!t.is_time_to_send());
}

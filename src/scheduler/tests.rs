use super::*;

fn options(attempts: Option<u32>, deadline: Option<Duration>) -> SchedulerOptions {
    SchedulerOptions {
        timeout: Duration::from_secs(10),
        interval: Duration::from_secs(1),
        attempts,
        deadline,
    }
}

#[test]
fn test_single_attempt_expires_after_one_failure() {
    let mut scheduler = DefaultScheduler::new(options(Some(1), None));
    assert!(scheduler.is_deliverable());
    scheduler.fail();
    assert!(!scheduler.is_deliverable());
}

#[test]
fn test_send_then_fail_counts_once() {
    let mut scheduler = DefaultScheduler::new(options(Some(2), None));
    scheduler.send();
    scheduler.fail();
    assert_eq!(scheduler.attempts(), 1);
    assert!(scheduler.is_deliverable());
    scheduler.send();
    scheduler.fail();
    assert_eq!(scheduler.attempts(), 2);
    assert!(!scheduler.is_deliverable());
}

#[test]
fn test_unlimited_attempts_stay_deliverable() {
    let mut scheduler = DefaultScheduler::new(options(None, None));
    for _ in 0..50 {
        scheduler.send();
        scheduler.fail();
    }
    assert!(scheduler.is_deliverable());
    assert_eq!(scheduler.interval(), Duration::from_secs(1));
    assert_eq!(scheduler.timeout(), Duration::from_secs(10));
}

#[test]
fn test_abort_is_final() {
    let mut scheduler = DefaultScheduler::new(options(None, None));
    scheduler.abort();
    assert!(!scheduler.is_deliverable());
    scheduler.send();
    scheduler.fail();
    assert!(!scheduler.is_deliverable());
}

#[test]
fn test_succeeded_message_is_not_redelivered() {
    let mut scheduler = DefaultScheduler::new(options(None, None));
    scheduler.send();
    scheduler.succeed();
    assert!(!scheduler.is_deliverable());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expires() {
    let scheduler = DefaultScheduler::new(options(None, Some(Duration::from_secs(5))));
    assert!(scheduler.is_deliverable());
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!scheduler.is_deliverable());
}

#[test]
fn test_backoff_doubles_and_caps() {
    let mut scheduler = BackoffScheduler::new(options(None, None), Duration::from_secs(5));
    assert_eq!(scheduler.interval(), Duration::from_secs(1));
    scheduler.send();
    scheduler.fail();
    assert_eq!(scheduler.interval(), Duration::from_secs(1));
    scheduler.send();
    scheduler.fail();
    assert_eq!(scheduler.interval(), Duration::from_secs(2));
    scheduler.send();
    scheduler.fail();
    assert_eq!(scheduler.interval(), Duration::from_secs(4));
    scheduler.send();
    scheduler.fail();
    assert_eq!(scheduler.interval(), Duration::from_secs(5));
}

#[test]
fn test_factories_build_schedulers() {
    let scheduler = default_factory()(options(Some(3), None));
    assert!(scheduler.is_deliverable());
    let scheduler = backoff_factory(Duration::from_secs(30))(options(Some(3), None));
    assert_eq!(scheduler.attempts(), 0);
}

use std::time::Duration;

use jobd_dispatcher::{RetryConfig, RetryPolicy};

#[test]
fn test_default_backoff_schedule() {
    // 60s基础间隔、2倍退避下的前三次重试：60s、120s、240s
    let policy = RetryPolicy::new(RetryConfig {
        base_interval_seconds: 60,
        max_interval_seconds: 3600,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    });
    let delays: Vec<Duration> = (0..3).map(|attempt| policy.next_delay(attempt)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(240)
        ]
    );
}

#[test]
fn test_delay_never_below_one_second() {
    let policy = RetryPolicy::new(RetryConfig {
        base_interval_seconds: 1,
        max_interval_seconds: 2,
        backoff_multiplier: 1.0,
        jitter_factor: 1.0,
    });
    for attempt in 0..20 {
        assert!(policy.next_delay(attempt) >= Duration::from_secs(1));
    }
}

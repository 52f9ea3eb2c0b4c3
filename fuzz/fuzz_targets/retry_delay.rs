#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use rtx_retry::{BackoffStrategy, RetryConfig, calculate_delay, delay_with_jitter};

fuzz_target!(|data: (u32, u8, u64, u64, bool)| {
    let (attempt, strategy_byte, base_ms, max_ms, jitter) = data;

    let attempt = attempt % 100 + 1;
    let strategy = match strategy_byte % 4 {
        0 => BackoffStrategy::Immediate,
        1 => BackoffStrategy::Exponential,
        2 => BackoffStrategy::Linear,
        _ => BackoffStrategy::Constant,
    };
    let config = RetryConfig {
        strategy,
        max_attempts: 100,
        base_delay: Duration::from_millis(base_ms % 10_000),
        max_delay: Duration::from_millis(max_ms % 300_000),
        jitter,
    };

    let delay = calculate_delay(&config, attempt);

    // Invariants:
    // 1. The pre-jitter delay never exceeds the cap.
    assert!(delay <= config.max_delay);

    // 2. Immediate strategy never waits.
    if strategy == BackoffStrategy::Immediate {
        assert_eq!(delay, Duration::ZERO);
    }

    // 3. Full jitter only ever shrinks the wait.
    assert!(delay_with_jitter(&config, attempt) <= delay.max(Duration::ZERO));
});

#![allow(dead_code, unused_imports)]

pub use testrelay_test_utils::builders;
pub use testrelay_test_utils::recorders;
pub use testrelay_test_utils::scripted_backend;
pub use testrelay_test_utils::{init_tracing, with_timeout};

use std::time::Duration;

use testrelay::run::RunnerScheduler;

/// Poll until the scheduler is idle again, yielding to the session driver.
pub async fn settle(scheduler: &RunnerScheduler) {
    with_timeout(scheduler.wait_until_idle()).await;
}

/// Let spawned tasks make progress without advancing the clock much.
pub async fn yield_a_bit() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Wait (bounded) until `condition` holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    with_timeout(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

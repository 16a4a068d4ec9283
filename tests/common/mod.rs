use std::time::{Duration, Instant};

use procbox::{ProcessState, Subprocess};

pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll until `cond` holds or the deadline passes; panics with `what` on
/// timeout.
pub fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Poll the record until it reports the given state.
pub fn wait_for_state(p: &Subprocess, state: ProcessState, timeout: Duration) {
    wait_until(&format!("state {:?}", state), timeout, || p.poll() == state);
}

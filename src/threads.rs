//! Helpers for the crate's background threads.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on how long shutdown waits for a background thread.
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Join `handle` if it finishes within `timeout`.
///
/// Returns `false` (leaving the thread detached) when it is still running
/// at the deadline.
pub(crate) fn join_within(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(thread = name, ?timeout, "Background thread did not stop in time");
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        tracing::error!(thread = name, "Background thread panicked");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_join_finished_thread() {
        let handle = thread::spawn(|| {});
        assert!(join_within(handle, Duration::from_secs(1), "quick"));
    }

    #[test]
    fn test_join_times_out() {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _ = rx.recv();
        });
        assert!(!join_within(handle, Duration::from_millis(50), "stuck"));
        drop(tx);
    }
}

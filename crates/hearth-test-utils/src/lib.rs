//! Test utilities for hearth crates.
//!
//! - [`RecordingDecoder`]: a decoder that logs every call and can be told to
//!   fail or stall, for asserting how often and in what order assets decode
//! - [`AssetDir`]: a temporary asset directory whose writes always advance
//!   the file modification time
//! - [`wait_until`]: poll a condition with a timeout

mod asset_dir;
mod recording_decoder;

pub use asset_dir::AssetDir;
pub use recording_decoder::{FAIL_MARKER, RecordingDecoder};

use std::time::{Duration, Instant};

/// Poll `condition` every millisecond until it holds or `timeout` elapses.
///
/// Returns the final value of the condition.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_wait_until_succeeds() {
        let calls = AtomicUsize::new(0);
        assert!(wait_until(Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst) >= 3
        }));
    }

    #[test]
    fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(5), || false));
    }
}

use std::sync::Mutex;

/// Tracks the combined size of every artifact queued in a run against a maximum.
///
/// The running total only ever grows, and is not rolled back when an addition pushes it over the
/// limit.
#[derive(Debug)]
pub struct SizeGuard {
    max: u64,
    current: Mutex<u64>,
}

impl SizeGuard {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            current: Mutex::new(0),
        }
    }

    /// Add `delta` bytes to the running total.
    ///
    /// Returns the new total and whether it now exceeds the maximum.  Concurrent callers are
    /// serialized so each one sees a distinct total.
    pub fn add_and_check(&self, delta: u64) -> (u64, bool) {
        let mut current = self.current.lock().unwrap();
        *current = current.saturating_add(delta);

        (*current, *current > self.max)
    }

    pub fn total(&self) -> u64 {
        *self.current.lock().unwrap()
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

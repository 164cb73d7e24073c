use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide Lamport clock.
///
/// Every component shares one instance; the counter is only ever touched
/// through `advance`/`merge` so clock updates are totally ordered even when
/// request handlers run concurrently.
#[derive(Debug, Default)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick for a purely local event and return the new value.
    pub fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a clock value carried by an inbound message:
    /// `counter = max(counter, received) + 1`.
    ///
    /// The CAS loop makes concurrent merges linearizable, so the second of two
    /// racing merges always observes a value greater than the first produced.
    pub fn merge(&self, received: u64) -> u64 {
        let mut current = self.counter.load(Ordering::SeqCst);
        loop {
            let next = current.max(received) + 1;
            match self.counter.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current value without advancing. Reporting only; never used for ordering.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Raise the counter to at least `observed`. Used once at startup so the
    /// clock resumes at or above the highest value recovered from disk.
    pub fn resync(&self, observed: u64) {
        self.counter.fetch_max(observed, Ordering::SeqCst);
    }
}

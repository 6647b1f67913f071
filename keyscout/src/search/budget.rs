use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

use super::matcher::OccurrenceCounter;

/// Most counting threads alive at once, including abandoned ones
pub const MAX_COUNTING_THREADS: usize = 256;

static COUNTING_SLOTS: CountSlots = CountSlots::new(MAX_COUNTING_THREADS);

/// Why a budgeted count produced no result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountError {
    /// The deadline passed before the count finished
    TimedOut,
    /// The counting thread panicked
    Panicked,
    /// No counting thread could be started
    Unavailable,
}

/// Bounds the number of live counting threads
pub(crate) struct CountSlots {
    in_flight: AtomicUsize,
    limit: usize,
}

impl CountSlots {
    pub(crate) const fn new(limit: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            limit,
        }
    }

    fn acquire(&'static self) -> Option<CountSlot> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
            .map(|_| CountSlot(self))
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

// Released when the counting thread exits, even by panic
struct CountSlot(&'static CountSlots);

impl Drop for CountSlot {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Counts occurrences in `content` on a supervised thread, giving up after
/// `budget`. A count that misses its deadline is abandoned, not killed.
pub fn count_within(
    counter: Arc<dyn OccurrenceCounter>,
    content: Arc<str>,
    budget: Duration,
) -> Result<usize, CountError> {
    count_with_slots(&COUNTING_SLOTS, counter, content, budget)
}

pub(crate) fn count_with_slots(
    slots: &'static CountSlots,
    counter: Arc<dyn OccurrenceCounter>,
    content: Arc<str>,
    budget: Duration,
) -> Result<usize, CountError> {
    let Some(slot) = slots.acquire() else {
        warn!(
            "{} counting threads still running, refusing to start another",
            slots.in_flight()
        );
        return Err(CountError::Unavailable);
    };

    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("keyscout-count".to_string())
        .spawn(move || {
            let _slot = slot;
            let count = counter.count(&content);
            // The receiver is gone if the caller already gave up
            let _ = tx.send(count);
        });

    if let Err(e) = spawned {
        warn!("Could not spawn counting thread: {}", e);
        return Err(CountError::Unavailable);
    }

    match rx.recv_timeout(budget) {
        Ok(count) => {
            trace!("Counted {} occurrences", count);
            Ok(count)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CountError::TimedOut),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(CountError::Panicked),
    }
}

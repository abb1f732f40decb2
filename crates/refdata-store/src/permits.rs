//! Exclusive per-stream load permits.
//!
//! At most one thread holds the permit for a given stream definition.
//! Threads asking for a held permit block until it is released; permits
//! for different streams never block each other.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use refdata_core::RefStreamDefinition;
use tracing::{debug, info};

/// Waits longer than this are reported at info level.
const SLOW_ACQUIRE: Duration = Duration::from_secs(1);

/// Keyed permit map: the set of streams whose permit is currently held.
#[derive(Default)]
pub struct LoadPermits {
    held: Mutex<HashSet<RefStreamDefinition>>,
    released: Condvar,
}

impl LoadPermits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the permit for `stream` is free, then take it.
    pub fn acquire(&self, stream: &RefStreamDefinition) -> LoadPermit<'_> {
        let started = Instant::now();
        let mut held = self.held.lock().expect("load permits lock");
        while held.contains(stream) {
            held = self.released.wait(held).expect("load permits lock");
        }
        held.insert(stream.clone());
        drop(held);

        let waited = started.elapsed();
        if waited > SLOW_ACQUIRE {
            info!(%stream, ?waited, "waited for load permit");
        } else {
            debug!(%stream, ?waited, "acquired load permit");
        }
        LoadPermit {
            permits: self,
            stream: stream.clone(),
        }
    }

    /// True when some thread holds the permit for `stream`.
    pub fn is_held(&self, stream: &RefStreamDefinition) -> bool {
        self.held.lock().expect("load permits lock").contains(stream)
    }
}

/// Scoped ownership of one stream's permit; released on drop, including
/// during unwinding.
pub struct LoadPermit<'a> {
    permits: &'a LoadPermits,
    stream: RefStreamDefinition,
}

impl Drop for LoadPermit<'_> {
    fn drop(&mut self) {
        let mut held = match self.permits.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.stream);
        drop(held);
        self.permits.released.notify_all();
        debug!(stream = %self.stream, "released load permit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_core::DocRef;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn stream(id: u64) -> RefStreamDefinition {
        RefStreamDefinition::new(DocRef::pipeline("p", "PIPE"), "1", id)
    }

    #[test]
    fn permit_released_on_drop() {
        let permits = LoadPermits::new();
        let s = stream(1);
        {
            let _permit = permits.acquire(&s);
            assert!(permits.is_held(&s));
        }
        assert!(!permits.is_held(&s));
    }

    #[test]
    fn different_streams_do_not_block() {
        let permits = LoadPermits::new();
        let _a = permits.acquire(&stream(1));
        let _b = permits.acquire(&stream(2));
        assert!(permits.is_held(&stream(1)));
        assert!(permits.is_held(&stream(2)));
    }

    #[test]
    fn same_stream_is_exclusive() {
        let permits = LoadPermits::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        let s = stream(1);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    let _permit = permits.acquire(&s);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!permits.is_held(&s));
    }
}

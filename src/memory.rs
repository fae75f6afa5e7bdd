//! Memory-pressure signalling.
//!
//! The host owns a [`MemoryPressureSource`] and calls
//! [`signal`](MemoryPressureSource::signal) when the system asks processes to
//! give memory back. Components that hold reclaimable memory implement
//! [`MemoryPressureListener`] and subscribe; the returned
//! [`MemoryPressureSubscription`] unregisters the listener when dropped.
//!
//! The source holds listeners weakly, so a subscription never keeps its
//! listener alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Receiver of "reclaim idle memory" signals.
pub trait MemoryPressureListener: Send + Sync {
    fn on_memory_pressure(&self);
}

#[derive(Default)]
struct SourceInner {
    listeners: Mutex<Vec<(u64, Weak<dyn MemoryPressureListener>)>>,
    next_id: AtomicU64,
}

/// Broadcaster of the parameterless memory-pressure event.
///
/// Cloning yields another handle to the same source.
#[derive(Clone, Default)]
pub struct MemoryPressureSource {
    inner: Arc<SourceInner>,
}

impl MemoryPressureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` until the returned subscription is dropped.
    pub fn subscribe(&self, listener: &Arc<dyn MemoryPressureListener>) -> MemoryPressureSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .push((id, Arc::downgrade(listener)));
        MemoryPressureSubscription {
            source: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver the signal to every live listener, on the calling thread.
    pub fn signal(&self) {
        let live: Vec<Arc<dyn MemoryPressureListener>> = {
            let mut listeners = self.inner.listeners.lock();
            listeners.retain(|(_, l)| l.strong_count() > 0);
            listeners.iter().filter_map(|(_, l)| l.upgrade()).collect()
        };
        debug!(listeners = live.len(), "memory pressure signalled");
        for listener in live {
            listener.on_memory_pressure();
        }
    }

    /// Number of registered listeners that are still alive.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .iter()
            .filter(|(_, l)| l.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for MemoryPressureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPressureSource")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered; unregisters on drop.
#[must_use = "the listener is unregistered when the subscription is dropped"]
pub struct MemoryPressureSubscription {
    source: Weak<SourceInner>,
    id: u64,
}

impl Drop for MemoryPressureSubscription {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl MemoryPressureListener for Counter {
        fn on_memory_pressure(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_signal_reaches_subscribers() {
        let source = MemoryPressureSource::new();
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn MemoryPressureListener> = counter.clone();
        let _sub = source.subscribe(&listener);
        source.signal();
        source.signal();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let source = MemoryPressureSource::new();
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn MemoryPressureListener> = counter.clone();
        let sub = source.subscribe(&listener);
        assert_eq!(source.listener_count(), 1);
        drop(sub);
        assert_eq!(source.listener_count(), 0);
        source.signal();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dead_listener_is_skipped() {
        let source = MemoryPressureSource::new();
        let listener: Arc<dyn MemoryPressureListener> = Arc::new(Counter::default());
        let _sub = source.subscribe(&listener);
        drop(listener);
        assert_eq!(source.listener_count(), 0);
        source.signal();
    }
}

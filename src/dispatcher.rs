//! Result dispatcher: fans each terminal job outcome out to the registered
//! sink and to every notification observer, on the delivery context.
//!
//! Two independent channels are fed by one dispatched task:
//!
//! - a single-slot [`BlurSink`] (last registration wins), held weakly;
//! - any number of observers receiving [`BlurNotification`]s over `flume`
//!   channels. Observers that dropped their receiver are pruned.
//!
//! The sink slot is read when the task runs, not when the result is
//! produced: a result arriving while no sink is registered is dropped for
//! the sink.

use std::sync::{Arc, Weak};

use flume::{Receiver, Sender};
use image::DynamicImage;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::delivery::DeliveryContext;
use crate::error::ProcessingCode;
use crate::job_queue::JobId;

/// Terminal outcome of a blur, as delivered.
pub type BlurOutcome = std::result::Result<Arc<DynamicImage>, ProcessingCode>;

/// Callback sink. Both methods are optional.
pub trait BlurSink: Send + Sync {
    /// A new blurred image is ready.
    fn on_blurred_image(&self, _job: JobId, _image: &Arc<DynamicImage>) {}

    /// Processing failed with a numeric error code
    /// (see [`ProcessingCode::code`]).
    fn on_processing_error(&self, _job: JobId, _code: i64) {}
}

/// Broadcast payload for notification observers.
#[derive(Debug, Clone)]
pub enum BlurNotification {
    ImageReady { job: JobId, image: Arc<DynamicImage> },
    ProcessingError { job: JobId, code: i64 },
}

impl BlurNotification {
    pub fn job(&self) -> JobId {
        match self {
            BlurNotification::ImageReady { job, .. } => *job,
            BlurNotification::ProcessingError { job, .. } => *job,
        }
    }

    pub fn image(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            BlurNotification::ImageReady { image, .. } => Some(image),
            BlurNotification::ProcessingError { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<i64> {
        match self {
            BlurNotification::ImageReady { .. } => None,
            BlurNotification::ProcessingError { code, .. } => Some(*code),
        }
    }
}

#[derive(Default)]
struct Registry {
    sink: RwLock<Option<Weak<dyn BlurSink>>>,
    observers: Mutex<Vec<Sender<BlurNotification>>>,
}

impl Registry {
    fn deliver(&self, job: JobId, outcome: BlurOutcome) {
        let sink = self.sink.read().as_ref().and_then(Weak::upgrade);
        let notification = match outcome {
            Ok(image) => {
                if let Some(sink) = &sink {
                    sink.on_blurred_image(job, &image);
                }
                BlurNotification::ImageReady { job, image }
            }
            Err(code) => {
                if let Some(sink) = &sink {
                    sink.on_processing_error(job, code.code());
                }
                BlurNotification::ProcessingError {
                    job,
                    code: code.code(),
                }
            }
        };
        let mut observers = self.observers.lock();
        observers.retain(|tx| tx.send(notification.clone()).is_ok());
        trace!(
            job = %job,
            sink = sink.is_some(),
            observers = observers.len(),
            "delivered result"
        );
    }
}

#[derive(Clone)]
pub struct ResultDispatcher {
    context: Arc<dyn DeliveryContext>,
    registry: Arc<Registry>,
}

impl ResultDispatcher {
    pub fn new(context: Arc<dyn DeliveryContext>) -> Self {
        Self {
            context,
            registry: Arc::default(),
        }
    }

    /// Register `sink`, replacing any previous one. Held weakly.
    pub fn set_sink(&self, sink: &Arc<dyn BlurSink>) {
        *self.registry.sink.write() = Some(Arc::downgrade(sink));
    }

    /// Stop future deliveries to the sink.
    pub fn clear_sink(&self) {
        *self.registry.sink.write() = None;
    }

    /// True if a sink is registered and still alive.
    pub fn has_sink(&self) -> bool {
        self.registry
            .sink
            .read()
            .as_ref()
            .map_or(false, |s| s.strong_count() > 0)
    }

    /// Add a notification observer.
    pub fn subscribe(&self) -> Receiver<BlurNotification> {
        let (tx, rx) = flume::unbounded();
        self.registry.observers.lock().push(tx);
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.registry.observers.lock().len()
    }

    /// Hand `outcome` to the delivery context. Returns immediately.
    pub fn deliver(&self, job: JobId, outcome: BlurOutcome) {
        let registry = self.registry.clone();
        self.context
            .dispatch(Box::new(move || registry.deliver(job, outcome)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryPump, DeliveryQueue};
    use image::RgbaImage;
    use std::thread::{self, ThreadId};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(JobId, Option<i64>, ThreadId)>>,
    }

    impl BlurSink for RecordingSink {
        fn on_blurred_image(&self, job: JobId, _image: &Arc<DynamicImage>) {
            self.events.lock().push((job, None, thread::current().id()));
        }

        fn on_processing_error(&self, job: JobId, code: i64) {
            self.events.lock().push((job, Some(code), thread::current().id()));
        }
    }

    fn setup() -> (ResultDispatcher, DeliveryPump) {
        let (queue, pump) = DeliveryQueue::channel();
        (ResultDispatcher::new(Arc::new(queue)), pump)
    }

    fn image() -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgba8(RgbaImage::new(1, 1)))
    }

    fn job(n: u64) -> JobId {
        JobId::from_raw(n)
    }

    #[test]
    fn test_sink_called_on_delivery_context() {
        let (d, pump) = setup();
        let sink = Arc::new(RecordingSink::default());
        let dyn_sink: Arc<dyn BlurSink> = sink.clone();
        d.set_sink(&dyn_sink);

        let producer = {
            let d = d.clone();
            thread::spawn(move || {
                d.deliver(job(1), Ok(image()));
                d.deliver(job(2), Err(ProcessingCode::AllocationFailed));
            })
        };
        producer.join().unwrap();
        assert!(sink.events.lock().is_empty());

        assert_eq!(pump.run_pending(), 2);
        let events = sink.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, None);
        assert_eq!(events[1].1, Some(-21771));
        assert!(events.iter().all(|e| e.2 == thread::current().id()));
    }

    #[test]
    fn test_last_registration_wins() {
        let (d, pump) = setup();
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let s1: Arc<dyn BlurSink> = first.clone();
        let s2: Arc<dyn BlurSink> = second.clone();
        d.set_sink(&s1);
        d.set_sink(&s2);
        d.deliver(job(1), Ok(image()));
        pump.run_pending();
        assert!(first.events.lock().is_empty());
        assert_eq!(second.events.lock().len(), 1);
    }

    #[test]
    fn test_cleared_sink_drops_results() {
        let (d, pump) = setup();
        let sink = Arc::new(RecordingSink::default());
        let dyn_sink: Arc<dyn BlurSink> = sink.clone();
        d.set_sink(&dyn_sink);
        d.deliver(job(1), Ok(image()));
        // Cleared before the task runs: the sink slot is read at delivery time.
        d.clear_sink();
        pump.run_pending();
        assert!(sink.events.lock().is_empty());
        assert!(!d.has_sink());
    }

    #[test]
    fn test_sink_is_held_weakly() {
        let (d, pump) = setup();
        let sink: Arc<dyn BlurSink> = Arc::new(RecordingSink::default());
        d.set_sink(&sink);
        assert!(d.has_sink());
        drop(sink);
        assert!(!d.has_sink());
        d.deliver(job(1), Ok(image()));
        assert_eq!(pump.run_pending(), 1);
    }

    #[test]
    fn test_observers_receive_broadcast() {
        let (d, pump) = setup();
        let a = d.subscribe();
        let b = d.subscribe();
        d.deliver(job(1), Err(ProcessingCode::InvalidImageFormat));
        pump.run_pending();
        for rx in [&a, &b] {
            let n = rx.try_recv().unwrap();
            assert_eq!(n.error_code(), Some(-21778));
            assert!(n.image().is_none());
        }
    }

    #[test]
    fn test_dropped_observers_are_pruned() {
        let (d, pump) = setup();
        let keep = d.subscribe();
        drop(d.subscribe());
        assert_eq!(d.observer_count(), 2);
        d.deliver(job(1), Ok(image()));
        pump.run_pending();
        assert_eq!(d.observer_count(), 1);
        assert!(keep.try_recv().unwrap().image().is_some());
    }
}

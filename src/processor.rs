//! Blur image processor: the public blur surface.
//!
//! A [`BlurImageProcessor`] targets one bound image and generates new blurred
//! copies of it, either synchronously on the caller's thread or through its
//! own serial job queue. Asynchronous results (and synchronous failures) are
//! delivered to the registered [`BlurSink`] and to notification observers on
//! the configured delivery context.
//!
//! The synchronous path and the queue worker each own a [`BlurEngine`] with
//! its own scratch pool; both pools are released on memory pressure.

use std::sync::Arc;

use flume::Receiver;
use image::DynamicImage;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::{DeliveryMode, ProcessorConfig};
use crate::delivery::{DeliveryContext, DeliveryThread};
use crate::dispatcher::{BlurNotification, BlurSink, ResultDispatcher};
use crate::engine::{BlurEngine, BlurRequest};
use crate::error::{BlurError, InvalidStateReason, Result};
use crate::job_queue::{CancelableJobQueue, JobHandle, JobHandler, JobId};
use crate::memory::{MemoryPressureListener, MemoryPressureSource, MemoryPressureSubscription};
use crate::scratch::ScratchPool;

// ============================================================================
// Worker-side handler
// ============================================================================

struct BlurJobHandler {
    engine: BlurEngine,
    dispatcher: ResultDispatcher,
}

impl JobHandler for BlurJobHandler {
    type Request = BlurRequest;
    type Output = Arc<DynamicImage>;

    fn execute(&self, id: JobId, request: BlurRequest) -> Result<Arc<DynamicImage>> {
        debug!(
            job = %id,
            radius = request.radius(),
            iterations = request.iterations(),
            "running blur job"
        );
        self.engine.execute(&request).map(Arc::new)
    }

    fn complete(&self, id: JobId, outcome: Result<Arc<DynamicImage>>) {
        self.dispatcher
            .deliver(id, outcome.map_err(|e| e.processing_code()));
    }
}

// ============================================================================
// BlurImageProcessor
// ============================================================================

pub struct BlurImageProcessor {
    image: RwLock<Option<Arc<DynamicImage>>>,
    sync_engine: BlurEngine,
    queue: CancelableJobQueue<BlurJobHandler>,
    dispatcher: ResultDispatcher,
    memory: MemoryPressureSource,
    _subscriptions: Vec<MemoryPressureSubscription>,
}

impl BlurImageProcessor {
    /// Create a processor targeting `image`, with default configuration.
    pub fn new(image: DynamicImage) -> Result<Self> {
        Self::with_config(Some(image), ProcessorConfig::default())
    }

    /// Create a processor with no image bound.
    pub fn empty() -> Result<Self> {
        Self::with_config(None, ProcessorConfig::default())
    }

    pub fn with_config(image: Option<DynamicImage>, config: ProcessorConfig) -> Result<Self> {
        let context: Arc<dyn DeliveryContext> = match config.delivery {
            DeliveryMode::Thread => Arc::new(DeliveryThread::spawn(config.delivery_thread_name)?),
            DeliveryMode::Context(context) => context,
        };
        let dispatcher = ResultDispatcher::new(context);
        let memory = config.memory_pressure.unwrap_or_default();

        let sync_pool = Arc::new(ScratchPool::new());
        let async_pool = Arc::new(ScratchPool::new());
        let subscriptions = [&sync_pool, &async_pool]
            .into_iter()
            .map(|pool| {
                let listener: Arc<dyn MemoryPressureListener> = pool.clone();
                memory.subscribe(&listener)
            })
            .collect();

        let handler = BlurJobHandler {
            engine: BlurEngine::with_pool(async_pool),
            dispatcher: dispatcher.clone(),
        };

        Ok(Self {
            image: RwLock::new(image.map(Arc::new)),
            sync_engine: BlurEngine::with_pool(sync_pool),
            queue: CancelableJobQueue::new(handler, config.worker_name),
            dispatcher,
            memory,
            _subscriptions: subscriptions,
        })
    }

    /// The image targeted by blur operations.
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        self.image.read().clone()
    }

    /// Replace the target image. Jobs already queued keep the image they
    /// were queued with.
    pub fn set_image(&self, image: Option<DynamicImage>) {
        *self.image.write() = image.map(Arc::new);
    }

    fn current_image(&self) -> Result<Arc<DynamicImage>> {
        self.image
            .read()
            .clone()
            .ok_or(BlurError::InvalidState(InvalidStateReason::NoImageSet))
    }

    /// Register the callback sink (held weakly; last registration wins).
    pub fn set_sink(&self, sink: &Arc<dyn BlurSink>) {
        self.dispatcher.set_sink(sink);
    }

    pub fn clear_sink(&self) {
        self.dispatcher.clear_sink();
    }

    /// Observe every delivered outcome.
    pub fn subscribe(&self) -> Receiver<BlurNotification> {
        self.dispatcher.subscribe()
    }

    /// The memory-pressure source this processor listens to.
    pub fn memory_pressure_source(&self) -> &MemoryPressureSource {
        &self.memory
    }

    /// Generate a new blurred image on the calling thread.
    ///
    /// Even radii are increased by one. A radius or iteration count of zero
    /// returns a copy of the target image. Fails with
    /// `InvalidState(NoImageSet)` when no image is bound; processing failures
    /// are returned and also reported to the sink and observers.
    pub fn sync_blur(&self, radius: u32, iterations: u8) -> Result<DynamicImage> {
        let image = self.current_image()?;
        self.sync_engine
            .blur_image(&image, radius, iterations)
            .map_err(|e| {
                self.dispatcher
                    .deliver(JobId::SYNC, Err(e.processing_code()));
                e
            })
    }

    /// Queue a blur of the target image. Same as
    /// [`async_blur_canceling_last`](Self::async_blur_canceling_last) with
    /// `cancel_last = false`.
    pub fn async_blur(&self, radius: u32, iterations: u8) -> Result<JobHandle> {
        self.async_blur_canceling_last(radius, iterations, false)
    }

    /// Queue a blur of the target image; the result is delivered on the
    /// delivery context. With `cancel_last`, the most recently queued job is
    /// canceled first if it has not started.
    pub fn async_blur_canceling_last(
        &self,
        radius: u32,
        iterations: u8,
        cancel_last: bool,
    ) -> Result<JobHandle> {
        let image = self.current_image()?;
        let request = BlurRequest::new(image, radius, iterations);
        self.queue.enqueue_canceling_last(request, cancel_last)
    }

    /// Cancel every queued blur that has not started. Returns how many.
    pub fn cancel_async_blur_operations(&self) -> usize {
        self.queue.cancel_all()
    }

    /// Queued jobs not yet started.
    pub fn pending_jobs(&self) -> usize {
        self.queue.pending_len()
    }

    /// True when no asynchronous work is queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Bytes held by idle scratch buffers of both engines.
    pub fn scratch_bytes(&self) -> usize {
        self.sync_engine.pool().held_bytes() + self.queue.handler().engine.pool().held_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryPump, DeliveryQueue};
    use crate::error::ProcessingCode;
    use crate::job_queue::JobState;
    use image::{ImageBuffer, Rgba, RgbaImage};
    use parking_lot::Mutex;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(24, 16, |x, y| {
            let v = if (x / 4 + y / 4) % 2 == 0 { 230 } else { 20 };
            Rgba([v, (x * 10) as u8, (y * 15) as u8, 255])
        }))
    }

    fn processor(image: Option<DynamicImage>) -> (BlurImageProcessor, DeliveryPump) {
        let (queue, pump) = DeliveryQueue::channel();
        let config = ProcessorConfig::new()
            .with_worker_name("test-blur-worker")
            .with_delivery_context(Arc::new(queue));
        (BlurImageProcessor::with_config(image, config).unwrap(), pump)
    }

    #[derive(Default)]
    struct Collect {
        images: Mutex<Vec<JobId>>,
        errors: Mutex<Vec<(JobId, i64)>>,
    }

    impl BlurSink for Collect {
        fn on_blurred_image(&self, job: JobId, _image: &Arc<DynamicImage>) {
            self.images.lock().push(job);
        }

        fn on_processing_error(&self, job: JobId, code: i64) {
            self.errors.lock().push((job, code));
        }
    }

    #[test]
    fn test_missing_image_is_invalid_state() {
        let (p, _pump) = processor(None);
        let expected = BlurError::InvalidState(InvalidStateReason::NoImageSet);
        assert_eq!(p.sync_blur(3, 1).unwrap_err(), expected);
        assert_eq!(p.async_blur(3, 1).unwrap_err(), expected);
        assert_eq!(p.async_blur_canceling_last(3, 1, true).unwrap_err(), expected);
        assert_eq!(p.pending_jobs(), 0);
    }

    #[test]
    fn test_sync_identity() {
        let (p, _pump) = processor(Some(test_image()));
        assert_eq!(p.sync_blur(0, 0).unwrap(), test_image());
        assert_eq!(p.sync_blur(0, 4).unwrap(), test_image());
        assert_eq!(p.sync_blur(5, 0).unwrap(), test_image());
    }

    #[test]
    fn test_sync_even_radius_normalized() {
        let (p, _pump) = processor(Some(test_image()));
        assert_eq!(p.sync_blur(4, 2).unwrap(), p.sync_blur(5, 2).unwrap());
    }

    #[test]
    fn test_sync_success_does_not_notify() {
        let (p, pump) = processor(Some(test_image()));
        let rx = p.subscribe();
        p.sync_blur(3, 1).unwrap();
        assert_eq!(pump.run_pending(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sync_failure_is_returned_and_notified() {
        let img: ImageBuffer<Rgba<u16>, Vec<u16>> = ImageBuffer::new(4, 4);
        let (p, pump) = processor(Some(DynamicImage::ImageRgba16(img)));
        let sink = Arc::new(Collect::default());
        let dyn_sink: Arc<dyn BlurSink> = sink.clone();
        p.set_sink(&dyn_sink);

        assert!(matches!(p.sync_blur(3, 1), Err(BlurError::InvalidImage(_))));
        pump.run_pending();
        assert_eq!(
            *sink.errors.lock(),
            vec![(JobId::SYNC, ProcessingCode::InvalidImageFormat.code())]
        );
    }

    #[test]
    fn test_async_results_arrive_in_order() {
        let (p, pump) = processor(Some(test_image()));
        let sink = Arc::new(Collect::default());
        let dyn_sink: Arc<dyn BlurSink> = sink.clone();
        p.set_sink(&dyn_sink);

        let ids: Vec<JobId> = (1..=3)
            .map(|i| p.async_blur(i, 1).unwrap().id())
            .collect();
        assert!(pump.run_until(TIMEOUT, || sink.images.lock().len() == 3));
        assert_eq!(*sink.images.lock(), ids);
    }

    #[test]
    fn test_async_result_matches_sync() {
        let (p, pump) = processor(Some(test_image()));
        let rx = p.subscribe();
        let handle = p.async_blur(3, 2).unwrap();
        assert_eq!(handle.wait_timeout(TIMEOUT), Some(JobState::Completed));
        assert!(pump.run_until(TIMEOUT, || !rx.is_empty()));
        let n = rx.try_recv().unwrap();
        assert_eq!(n.job(), handle.id());
        assert_eq!(**n.image().unwrap(), p.sync_blur(3, 2).unwrap());
    }

    #[test]
    fn test_cancel_last_on_empty_queue_still_delivers() {
        let (p, pump) = processor(Some(test_image()));
        let rx = p.subscribe();
        let handle = p.async_blur_canceling_last(3, 1, true).unwrap();
        assert_eq!(handle.wait_timeout(TIMEOUT), Some(JobState::Completed));
        assert!(pump.run_until(TIMEOUT, || !rx.is_empty()));
        assert_eq!(rx.try_recv().unwrap().job(), handle.id());
    }

    #[test]
    fn test_async_identity_delivers_copy() {
        let (p, pump) = processor(Some(test_image()));
        let rx = p.subscribe();
        p.async_blur(0, 3).unwrap().wait_timeout(TIMEOUT);
        assert!(pump.run_until(TIMEOUT, || !rx.is_empty()));
        assert_eq!(**rx.try_recv().unwrap().image().unwrap(), test_image());
    }

    #[test]
    fn test_queued_job_keeps_its_image_snapshot() {
        let (p, pump) = processor(Some(test_image()));
        let rx = p.subscribe();
        let handle = p.async_blur(0, 1).unwrap();
        p.set_image(None);
        handle.wait_timeout(TIMEOUT);
        assert!(pump.run_until(TIMEOUT, || !rx.is_empty()));
        assert_eq!(**rx.try_recv().unwrap().image().unwrap(), test_image());
        assert!(p.image().is_none());
    }

    #[test]
    fn test_memory_pressure_releases_scratch() {
        let (p, _pump) = processor(Some(test_image()));
        let before = p.sync_blur(3, 3).unwrap();
        assert!(p.scratch_bytes() > 0);
        p.memory_pressure_source().signal();
        assert_eq!(p.scratch_bytes(), 0);
        assert_eq!(p.sync_blur(3, 3).unwrap(), before);
    }

    #[test]
    fn test_dropping_processor_unsubscribes() {
        let source = MemoryPressureSource::new();
        let (queue, _pump) = DeliveryQueue::channel();
        let config = ProcessorConfig::new()
            .with_delivery_context(Arc::new(queue))
            .with_memory_pressure(source.clone());
        let p = BlurImageProcessor::with_config(Some(test_image()), config).unwrap();
        assert_eq!(source.listener_count(), 2);
        drop(p);
        assert_eq!(source.listener_count(), 0);
    }
}

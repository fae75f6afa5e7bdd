//! # blur-processor
//!
//! Repeated box-blur generation for bitmap images. A processor targets one
//! image and produces new blurred copies of it, with per-call control over
//! blur radius and iteration count:
//!
//! - synchronously, on the caller's thread;
//! - asynchronously, through a per-processor serial job queue that supports
//!   canceling the most recently queued job and canceling everything queued.
//!
//! Asynchronous results are delivered to a single callback sink and to any
//! number of notification observers on one designated delivery context.
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! 1. **Pixel buffer**: owned 8-bit interleaved pixels with stride
//!    ([`pixel_buffer`])
//! 2. **Kernel**: one separable, running-sum box-blur pass
//!    ([`box_blur`])
//! 3. **Engine**: radius normalization and iterated passes over
//!    ping-pong scratch buffers ([`engine`], [`scratch`])
//! 4. **Queue**: FIFO worker with cancel-last / cancel-all ([`job_queue`])
//! 5. **Delivery**: results marshalled to a delivery context and fanned out
//!    to the sink and observers ([`delivery`], [`dispatcher`])
//! 6. **Processor**: the public surface ([`processor`])
//!
//! Scratch memory is released when the host signals memory pressure
//! ([`memory`]).
//!
//! ```no_run
//! use blur_processor::BlurImageProcessor;
//! use image::{DynamicImage, RgbaImage};
//!
//! let image = DynamicImage::ImageRgba8(RgbaImage::new(64, 64));
//! let processor = BlurImageProcessor::new(image)?;
//! let blurred = processor.sync_blur(5, 3)?;
//! let job = processor.async_blur_canceling_last(9, 2, true)?;
//! # let _ = (blurred, job);
//! # Ok::<(), blur_processor::BlurError>(())
//! ```

// Foundation
pub mod error;
pub mod pixel_buffer;

// Processing
pub mod box_blur;
pub mod engine;
pub mod scratch;

// Async plumbing
pub mod delivery;
pub mod dispatcher;
pub mod job_queue;
pub mod memory;

// Public surface
pub mod config;
pub mod processor;

pub use config::{DeliveryMode, ProcessorConfig};
pub use delivery::{DeliveryContext, DeliveryPump, DeliveryQueue, DeliveryThread};
pub use dispatcher::{BlurNotification, BlurSink};
pub use engine::{normalize_radius, BlurEngine, BlurRequest};
pub use error::{BlurError, InvalidStateReason, ProcessingCode, Result};
pub use job_queue::{JobHandle, JobId, JobState};
pub use memory::{MemoryPressureListener, MemoryPressureSource};
pub use pixel_buffer::{PixelBuffer, PixelLayout};
pub use processor::BlurImageProcessor;

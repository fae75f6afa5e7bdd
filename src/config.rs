//! Processor configuration.

use std::fmt;
use std::sync::Arc;

use crate::delivery::DeliveryContext;
use crate::memory::MemoryPressureSource;

/// Where results are delivered.
#[derive(Clone, Default)]
pub enum DeliveryMode {
    /// A dedicated delivery thread owned by the processor.
    #[default]
    Thread,
    /// A context supplied by the host, e.g. a [`DeliveryQueue`] drained by
    /// its UI loop.
    ///
    /// [`DeliveryQueue`]: crate::delivery::DeliveryQueue
    Context(Arc<dyn DeliveryContext>),
}

impl fmt::Debug for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Thread => f.write_str("Thread"),
            DeliveryMode::Context(_) => f.write_str("Context(..)"),
        }
    }
}

/// Settings for [`BlurImageProcessor`](crate::processor::BlurImageProcessor).
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Name given to the asynchronous worker thread.
    pub worker_name: String,
    /// Name given to the delivery thread in [`DeliveryMode::Thread`].
    pub delivery_thread_name: String,
    pub delivery: DeliveryMode,
    /// Host memory-pressure source. `None` creates a private one.
    pub memory_pressure: Option<MemoryPressureSource>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_name: "blur-worker".to_string(),
            delivery_thread_name: "blur-delivery".to_string(),
            delivery: DeliveryMode::Thread,
            memory_pressure: None,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn with_delivery_thread_name(mut self, name: impl Into<String>) -> Self {
        self.delivery_thread_name = name.into();
        self
    }

    pub fn with_delivery_context(mut self, context: Arc<dyn DeliveryContext>) -> Self {
        self.delivery = DeliveryMode::Context(context);
        self
    }

    pub fn with_memory_pressure(mut self, source: MemoryPressureSource) -> Self {
        self.memory_pressure = Some(source);
        self
    }
}

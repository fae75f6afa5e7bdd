//! Delivery contexts: where results are handed to sinks.
//!
//! Results are produced on a worker thread but must reach sinks on one
//! designated context, so sinks may touch state owned by that context. A
//! [`DeliveryContext`] accepts boxed tasks and runs them in dispatch order on
//! its own execution context.
//!
//! - [`DeliveryQueue`] + [`DeliveryPump`]: the host keeps the pump and drains
//!   it from its own loop (a UI thread, typically).
//! - [`DeliveryThread`]: a dedicated thread that runs tasks as they arrive.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::warn;

use crate::error::{BlurError, Result};

pub type DeliveryTask = Box<dyn FnOnce() + Send + 'static>;

pub trait DeliveryContext: Send + Sync {
    /// Schedule `task` to run on this context. Must not block on the task.
    fn dispatch(&self, task: DeliveryTask);
}

// ============================================================================
// DeliveryQueue / DeliveryPump
// ============================================================================

/// Sending half of a host-drained delivery channel.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: Sender<DeliveryTask>,
}

/// Receiving half; whoever calls its `run_*` methods is the delivery context.
pub struct DeliveryPump {
    rx: Receiver<DeliveryTask>,
}

impl DeliveryQueue {
    /// Create a connected queue/pump pair.
    pub fn channel() -> (DeliveryQueue, DeliveryPump) {
        let (tx, rx) = flume::unbounded();
        (DeliveryQueue { tx }, DeliveryPump { rx })
    }
}

impl DeliveryContext for DeliveryQueue {
    fn dispatch(&self, task: DeliveryTask) {
        if self.tx.send(task).is_err() {
            warn!("delivery pump dropped; result discarded");
        }
    }
}

impl DeliveryPump {
    /// Run every task already queued, without waiting. Returns the count.
    pub fn run_pending(&self) -> usize {
        let mut n = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            n += 1;
        }
        n
    }

    /// Wait up to `timeout` for one task and run it.
    pub fn run_one_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Run tasks until `done` returns true or `timeout` elapses.
    /// Returns the final value of `done`.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
        true
    }

    /// Number of tasks waiting.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

// ============================================================================
// DeliveryThread
// ============================================================================

/// Runs tasks on one dedicated, named thread. Joined on drop.
pub struct DeliveryThread {
    tx: Option<Sender<DeliveryTask>>,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryThread {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let (tx, rx) = flume::unbounded::<DeliveryTask>();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for task in rx.iter() {
                    task();
                }
            })
            .map_err(|e| BlurError::WorkerSpawn(e.to_string()))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl DeliveryContext for DeliveryThread {
    fn dispatch(&self, task: DeliveryTask) {
        if let Some(tx) = &self.tx {
            if tx.send(task).is_err() {
                warn!("delivery thread gone; result discarded");
            }
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            // The last owner may be a task running on the delivery thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_queue_runs_in_order_on_pumping_thread() {
        let (queue, pump) = DeliveryQueue::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            let producer = thread::spawn({
                let queue = queue.clone();
                move || {
                    queue.dispatch(Box::new(move || {
                        seen.lock().unwrap().push((i, thread::current().id()));
                    }))
                }
            });
            producer.join().unwrap();
        }
        assert_eq!(pump.pending(), 3);
        assert_eq!(pump.run_pending(), 3);
        let me = thread::current().id();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(seen.iter().all(|(_, t)| *t == me));
    }

    #[test]
    fn test_run_until_times_out() {
        let (_queue, pump) = DeliveryQueue::channel();
        assert!(!pump.run_until(Duration::from_millis(20), || false));
        assert!(!pump.run_one_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_delivery_thread_runs_off_caller_thread() {
        let ctx = DeliveryThread::spawn("test-delivery").unwrap();
        let (tx, rx) = flume::unbounded();
        ctx.dispatch(Box::new(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        }));
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-delivery"));
    }

    #[test]
    fn test_delivery_thread_drains_before_join() {
        let ctx = DeliveryThread::spawn("test-delivery").unwrap();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..10 {
            let count = count.clone();
            ctx.dispatch(Box::new(move || *count.lock().unwrap() += 1));
        }
        drop(ctx);
        assert_eq!(*count.lock().unwrap(), 10);
    }
}

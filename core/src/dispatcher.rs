//! Ordered relay of debug events between the interpreter and the IDE.
//!
//! Producers on either side push into an [`EventQueue`]; a single
//! [`Dispatcher`] loop drains it in FIFO order and hands each event to every
//! registered [`EventProcessor`] whose route matches the event's route.
//! Closing the queue is terminal: late events are dropped silently and the
//! loop exits once everything buffered before the close has been delivered.

use crate::errors::{BridgeError, BridgeResult};
use crate::events::{DebugEvent, Route};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// A consumer of debug events travelling in one direction.
pub trait EventProcessor: Send + Sync {
    /// Which events this processor receives
    fn route(&self) -> Route;

    /// Handle one event. Errors are logged by the dispatcher and never stop it.
    fn handle_event(&self, event: &DebugEvent) -> BridgeResult<()>;
}

/// Counters reported when the dispatch loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatistics {
    /// Events taken off the queue
    pub delivered: u64,

    /// Events enqueued after the queue was closed
    pub dropped_after_close: u64,

    /// Processor calls that returned an error or panicked
    pub processor_failures: u64,
}

#[derive(Debug)]
struct QueueShared {
    sender: Mutex<Option<mpsc::UnboundedSender<DebugEvent>>>,
    dropped: AtomicU64,
}

// ============================================================================
// EVENT QUEUE
// ============================================================================

/// Producer handle of the event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventQueue {
    shared: Arc<QueueShared>,
}

/// Consumer end of the event queue, owned by the [`Dispatcher`].
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<DebugEvent>,
    shared: Arc<QueueShared>,
}

impl EventQueue {
    /// Create a queue and its receiving end
    pub fn channel() -> (EventQueue, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            sender: Mutex::new(Some(tx)),
            dropped: AtomicU64::new(0),
        });
        (
            EventQueue {
                shared: shared.clone(),
            },
            EventReceiver { rx, shared },
        )
    }

    /// Push an event without blocking.
    ///
    /// Returns false if the queue is closed; the event is dropped.
    pub fn enqueue(&self, event: DebugEvent) -> bool {
        let sender = self.shared.sender.lock();
        let delivered = match sender.as_ref() {
            Some(tx) => tx.send(event).map_err(|e| e.0),
            None => Err(event),
        };

        match delivered {
            Ok(()) => true,
            Err(event) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Dropping {} event, queue closed", event.kind());
                false
            }
        }
    }

    /// Close the queue. Closing an already closed queue is a no-op.
    ///
    /// Returns true if this call closed it.
    pub fn close(&self) -> bool {
        let closed = self.shared.sender.lock().take().is_some();
        if closed {
            debug!("Event queue closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.shared.sender.lock().is_none()
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Single-consumer drain loop.
pub struct Dispatcher {
    receiver: EventReceiver,
    processors: Vec<Arc<dyn EventProcessor>>,
    stats: DispatchStatistics,
}

impl Dispatcher {
    pub fn new(receiver: EventReceiver) -> Self {
        Self {
            receiver,
            processors: Vec::new(),
            stats: DispatchStatistics::default(),
        }
    }

    pub fn register(&mut self, processor: Arc<dyn EventProcessor>) {
        self.processors.push(processor);
    }

    /// Run the drain loop on a dedicated, named thread
    pub fn spawn(self, thread_name: &str) -> BridgeResult<DispatcherHandle> {
        let thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                BridgeError::DispatcherError(format!("failed to spawn dispatch thread: {}", e))
            })?;

        Ok(DispatcherHandle { thread })
    }

    /// Drain the queue on the current thread until it is closed and empty.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run(mut self) -> DispatchStatistics {
        info!(
            processors = self.processors.len(),
            "Event dispatch loop started"
        );

        while let Some(event) = self.receiver.rx.blocking_recv() {
            self.dispatch(&event);
        }

        self.stats.dropped_after_close = self.receiver.shared.dropped.load(Ordering::Relaxed);
        info!(
            delivered = self.stats.delivered,
            failures = self.stats.processor_failures,
            "Event dispatch loop finished"
        );
        self.stats
    }

    fn dispatch(&mut self, event: &DebugEvent) {
        let route = event.route();
        trace!("Dispatching {} event", event.kind());

        for processor in self.processors.iter().filter(|p| p.route() == route) {
            match panic::catch_unwind(AssertUnwindSafe(|| processor.handle_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.stats.processor_failures += 1;
                    warn!("Processor failed on {} event: {}", event.kind(), e);
                }
                Err(payload) => {
                    self.stats.processor_failures += 1;
                    error!(
                        "Processor panicked on {} event: {}",
                        event.kind(),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }

        self.stats.delivered += 1;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Join handle of a spawned dispatch loop.
pub struct DispatcherHandle {
    thread: JoinHandle<DispatchStatistics>,
}

impl DispatcherHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to finish. The queue must be closed first.
    pub fn join(self) -> BridgeResult<DispatchStatistics> {
        self.thread
            .join()
            .map_err(|_| BridgeError::DispatcherError("dispatch thread panicked".to_string()))
    }
}

// Partitioned processor pool: N broadcast consumers, each acting on its own
// deterministic slice of the stream.

use crate::error::{BufferError, HandlerError};
use crate::Core::metrics::{metric_name, Meter, MetricRegistry};
use crate::Core::wait_strategy::Halted;
use crate::MPMC::Buffer::layout::Cursor;
use crate::MPMC::Buffer::RingBuffer;
use crate::MPMC::partition::{Partitioner, Payload};
use crate::MPMC::Structs::BufferConfig;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Per-processor logic, run only for events partitioned to this processor.
///
/// An `Err` (or a panic) is logged and counted; the processor still moves past
/// the event.
pub trait EventHandler<T>: Send + 'static {
    fn handle(&mut self, sequence: i64, payload: &T) -> Result<(), HandlerError>;
}

impl<T, F> EventHandler<T> for F
where
    F: FnMut(i64, &T) -> Result<(), HandlerError> + Send + 'static,
{
    fn handle(&mut self, sequence: i64, payload: &T) -> Result<(), HandlerError> {
        self(sequence, payload)
    }
}

/// Builds the handler for processor `ordinal` of `count`.
pub trait ProcessorFactory<T>: Send + Sync {
    type Handler: EventHandler<T>;

    fn create(&self, ordinal: usize, count: usize) -> Self::Handler;
}

impl<T, F, H> ProcessorFactory<T> for F
where
    F: Fn(usize, usize) -> H + Send + Sync,
    H: EventHandler<T>,
{
    type Handler = H;

    fn create(&self, ordinal: usize, count: usize) -> H {
        self(ordinal, count)
    }
}

/// One consumer loop bound to an ordinal.
struct Processor<T, H> {
    ordinal: usize,
    count: usize,
    ring: Arc<RingBuffer<T>>,
    cursor: Arc<Cursor>,
    stop_at: Arc<Cursor>,
    partitioner: Arc<dyn Partitioner>,
    handler: H,
    processed: Arc<Meter>,
    failed: Arc<Meter>,
}

impl<T: Payload, H: EventHandler<T>> Processor<T, H> {
    fn run(mut self) {
        debug!(ordinal = self.ordinal, count = self.count, "Processor started");

        let mut next = self.cursor.get() + 1;
        loop {
            let ring = &*self.ring;
            let stop_at = &*self.stop_at;
            let available = match ring.wait_strategy().await_sequence(
                next,
                &|| ring.published(),
                &|| stop_at.get() < next,
            ) {
                Ok(available) => available,
                Err(Halted) => break,
            };

            let last = available.min(self.stop_at.get());
            while next <= last {
                self.process(next);
                // Advance whether or not this processor owned the event.
                self.cursor.set(next);
                self.ring.wait_strategy().signal_published(next);
                next += 1;
            }

            if next > self.stop_at.get() {
                break;
            }
        }

        debug!(
            ordinal = self.ordinal,
            cursor = self.cursor.get(),
            "Processor stopped"
        );
    }

    fn process(&mut self, sequence: i64) {
        // SAFETY: our cursor stays below `sequence` until this returns, which
        // keeps producers off the slot.
        let Some(payload) = (unsafe { self.ring.get(sequence) }) else {
            return;
        };
        let Some(owner) = self.owner_of(sequence, payload) else {
            return;
        };
        if owner != self.ordinal {
            return;
        }

        let handler = &mut self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(sequence, payload)));
        match outcome {
            Ok(Ok(())) => self.processed.mark(1),
            Ok(Err(e)) => {
                self.failed.mark(1);
                error!(ordinal = self.ordinal, sequence, "Failed to process event: {}", e);
            }
            Err(cause) => {
                self.failed.mark(1);
                error!(
                    ordinal = self.ordinal,
                    sequence,
                    "Processor handler panicked: {}",
                    panic_message(&*cause)
                );
            }
        }
    }
}

impl<T: Payload, H> Processor<T, H> {
    /// Ordinal that owns `payload`, or `None` when partitioning it failed.
    ///
    /// Every processor partitions every event, so a failure here shows up on
    /// all of them; ordinal 0 alone counts and logs it.
    fn owner_of(&self, sequence: i64, payload: &T) -> Option<usize> {
        let partitioner = &*self.partitioner;
        let count = self.count;
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| partitioner.partition(payload.identity(), count)));
        let reporter = self.ordinal == 0;
        match outcome {
            Ok(owner) if owner < count => Some(owner),
            Ok(owner) => {
                if reporter {
                    self.failed.mark(1);
                    error!(
                        sequence,
                        owner, count, "Partitioner returned an out-of-range ordinal; event dropped"
                    );
                }
                None
            }
            Err(cause) => {
                if reporter {
                    self.failed.mark(1);
                    error!(
                        sequence,
                        "Partitioner panicked; event dropped: {}",
                        panic_message(&*cause)
                    );
                }
                None
            }
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

pub(crate) struct ProcessorThread {
    pub(crate) ordinal: usize,
    pub(crate) handle: JoinHandle<()>,
}

/// The running set of processor threads sharing one ring.
pub struct ProcessorPool {
    pub(crate) threads: Vec<ProcessorThread>,
    /// Last sequence processors handle before exiting; `i64::MAX` while running.
    pub(crate) stop_at: Arc<Cursor>,
}

impl fmt::Debug for ProcessorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_processor_pool(self, f)
    }
}

impl ProcessorPool {
    /// Spawn one thread per gating cursor of `ring`, named `<prefix>-<ordinal>`.
    ///
    /// If any spawn fails the threads already started are stopped and joined.
    pub(crate) fn start<T, F>(
        ring: &Arc<RingBuffer<T>>,
        factory: &F,
        partitioner: &Arc<dyn Partitioner>,
        registry: &MetricRegistry,
        config: &BufferConfig,
    ) -> Result<Self, BufferError>
    where
        T: Payload,
        F: ProcessorFactory<T>,
    {
        let count = ring.gating_cursors().len();
        let stop_at = Arc::new(Cursor::new(i64::MAX));
        let mut pool = Self {
            threads: Vec::with_capacity(count),
            stop_at: stop_at.clone(),
        };

        for (ordinal, cursor) in ring.gating_cursors().iter().enumerate() {
            let label = format!("processor-{ordinal}");
            let processor = Processor {
                ordinal,
                count,
                ring: ring.clone(),
                cursor: cursor.clone(),
                stop_at: stop_at.clone(),
                partitioner: partitioner.clone(),
                handler: factory.create(ordinal, count),
                processed: registry.meter(&metric_name(
                    &config.metric_prefix,
                    &[&label, "processedMessages"],
                )),
                failed: registry.meter(&metric_name(
                    &config.metric_prefix,
                    &[&label, "failedMessages"],
                )),
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, ordinal))
                .spawn(move || processor.run());

            match spawned {
                Ok(handle) => pool.threads.push(ProcessorThread { ordinal, handle }),
                Err(e) => {
                    error!(ordinal, "Failed to spawn processor thread: {}", e);
                    pool.stop_after(ring.published(), ring);
                    pool.join(Instant::now() + config.shutdown_timeout);
                    return Err(BufferError::Spawn(e));
                }
            }
        }

        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Ask every processor to exit once it has moved past `last`.
    ///
    /// Takes effect between events, never in the middle of one.
    pub(crate) fn stop_after<T>(&self, last: i64, ring: &RingBuffer<T>) {
        self.stop_at.set(last);
        ring.wait_strategy().signal_published(last);
    }

    /// Join every processor thread, waiting until `deadline` at most.
    ///
    /// Threads still running at the deadline are detached (an OS thread cannot
    /// be killed from safe Rust); their count is returned.
    pub(crate) fn join(&mut self, deadline: Instant) -> usize {
        let mut detached = 0;
        for thread in self.threads.drain(..) {
            while !thread.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }

            if thread.handle.is_finished() {
                if thread.handle.join().is_err() {
                    error!(ordinal = thread.ordinal, "Processor thread exited with a panic");
                }
            } else {
                warn!(
                    ordinal = thread.ordinal,
                    "Processor did not stop within the shutdown window; detaching it"
                );
                detached += 1;
            }
        }
        detached
    }
}

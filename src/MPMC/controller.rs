// src/MPMC/controller.rs

use crate::error::{BufferError, InsertError};
use crate::Core::metrics::{metric_name, Meter, MetricRegistry};
use crate::Core::wait_strategy::wait_strategy_for;
use crate::MPMC::Buffer::layout::Cursor;
use crate::MPMC::Buffer::RingBuffer;
use crate::MPMC::partition::{Partitioner, Payload, Sha256Partitioner};
use crate::MPMC::processor::{ProcessorFactory, ProcessorPool};
use crate::MPMC::Structs::{BufferConfig, LifecycleState};

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the insert path needs; dropped when shutdown starts.
struct Active<T> {
    ring: Arc<RingBuffer<T>>,
    incoming: Arc<Meter>,
    blocked: Arc<Meter>,
    rejected: Arc<Meter>,
}

/// Owned by the controller from initialize until shutdown completes.
struct Lifecycle<T> {
    ring: Arc<RingBuffer<T>>,
    pool: ProcessorPool,
    shutdown_timeout: Duration,
}

/// Outcome of [`OutputBuffer::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Last sequence published when intake stopped; processors drained up to it.
    pub last_sequence: i64,
    /// Whether every in-flight insert finished within the shutdown window.
    pub inserts_drained: bool,
    /// Processor threads that missed the join window and were detached.
    pub detached_processors: usize,
}

/// The buffer lifecycle controller.
///
/// Owns the ring and the processor pool, and is the only way in for producers.
/// Share it between producer threads behind an `Arc`; every method takes `&self`.
///
/// ### Lifecycle:
/// `Uninitialized → Initialized → Running → ShuttingDown → ShutDown`, never
/// revisiting a state. Inserts are accepted only while `Running`.
pub struct OutputBuffer<T, F> {
    factory: F,
    partitioner: Arc<dyn Partitioner>,
    registry: Arc<MetricRegistry>,
    state: AtomicU8,
    /// Set once processors are told to stop; releases producers still waiting for a slot.
    halted: AtomicBool,
    active: RwLock<Option<Active<T>>>,
    lifecycle: Mutex<Option<Lifecycle<T>>>,
}

impl<T, F> OutputBuffer<T, F>
where
    T: Payload,
    F: ProcessorFactory<T>,
{
    /// An uninitialized buffer that will build its processors with `factory`
    /// and register meters in `registry`.
    pub fn new(factory: F, registry: Arc<MetricRegistry>) -> Self {
        Self {
            factory,
            partitioner: Arc::new(Sha256Partitioner),
            registry,
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            halted: AtomicBool::new(false),
            active: RwLock::new(None),
            lifecycle: Mutex::new(None),
        }
    }

    /// Replace the default SHA-256 partitioner. Only meaningful before `initialize`.
    pub fn with_partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), BufferError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|current| BufferError::InvalidState {
                current: LifecycleState::from_u8(current),
                expected: from,
            })
    }

    /// Build the slot arena and ring, pick the wait strategy and start one
    /// processor thread per partition. Allowed exactly once.
    pub fn initialize(&self, config: BufferConfig) -> Result<(), BufferError> {
        config.validate()?;
        self.transition(LifecycleState::Uninitialized, LifecycleState::Initialized)?;

        let wait = wait_strategy_for(config.wait_strategy);
        let cursors = (0..config.processor_count)
            .map(|_| Arc::new(Cursor::default()))
            .collect();
        let ring = Arc::new(RingBuffer::new(config.ring_size, cursors, wait.clone()));

        let pool = match ProcessorPool::start(
            &ring,
            &self.factory,
            &self.partitioner,
            &self.registry,
            &config,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                self.state
                    .store(LifecycleState::ShutDown as u8, Ordering::SeqCst);
                return Err(e);
            }
        };

        *self.lifecycle.lock() = Some(Lifecycle {
            ring: ring.clone(),
            pool,
            shutdown_timeout: config.shutdown_timeout,
        });
        self.transition(LifecycleState::Initialized, LifecycleState::Running)?;

        // Intake opens last.
        let meter = |name: &str| self.registry.meter(&metric_name(&config.metric_prefix, &[name]));
        *self.active.write() = Some(Active {
            ring,
            incoming: meter("incomingMessages"),
            blocked: meter("blockedInserts"),
            rejected: meter("rejectedInserts"),
        });
        info!(
            ring_size = config.ring_size,
            processors = config.processor_count,
            wait_strategy = wait.name(),
            "Initialized OutputBuffer with ring size <{}> and wait strategy <{}>.",
            config.ring_size,
            wait.name()
        );
        Ok(())
    }

    /// Read access to the insert path while running.
    ///
    /// A pending or held write lock means shutdown has begun; the state check
    /// covers the window after a timed-out drain releases the lock again.
    fn intake(&self) -> Option<MappedRwLockReadGuard<'_, Active<T>>> {
        let guard = self.active.try_read()?;
        if self.state.load(Ordering::SeqCst) != LifecycleState::Running as u8 {
            return None;
        }
        RwLockReadGuard::try_map(guard, |active| active.as_ref()).ok()
    }

    /// Publish `payload` only if a slot is free right now.
    ///
    /// A full buffer hands the payload back in [`InsertError::Full`]; the caller
    /// decides whether to drop, retry or reroute it.
    pub fn insert(&self, payload: Arc<T>) -> Result<(), InsertError<T>> {
        let Some(active) = self.intake() else {
            return Err(InsertError::NotRunning(payload));
        };

        let Some(mut claim) = active.ring.try_claim() else {
            active.rejected.mark(1);
            return Err(InsertError::Full(payload));
        };
        claim.write(payload);
        claim.publish();
        self.after_insert(&active, 1);
        Ok(())
    }

    /// Publish `payload`, waiting (per the wait strategy) for the slowest
    /// processor to free a slot. There is no timeout: a stalled processor
    /// blocks this call until shutdown.
    pub fn insert_blocking(&self, payload: Arc<T>) -> Result<(), InsertError<T>> {
        let Some(active) = self.intake() else {
            return Err(InsertError::NotRunning(payload));
        };

        self.publish_blocking(&active, payload)?;
        self.after_insert(&active, 1);
        Ok(())
    }

    /// Publish every payload in order, as [`insert_blocking`](Self::insert_blocking)
    /// would, and count them in one `after_insert` call.
    ///
    /// Returns how many were published. If the buffer stops mid-batch the
    /// payload that could not be published comes back in the error; the ones
    /// after it are dropped.
    pub fn insert_batch_blocking<I>(&self, payloads: I) -> Result<usize, InsertError<T>>
    where
        I: IntoIterator<Item = Arc<T>>,
    {
        let mut payloads = payloads.into_iter();
        let Some(active) = self.intake() else {
            return match payloads.next() {
                Some(payload) => Err(InsertError::NotRunning(payload)),
                None => Ok(0),
            };
        };

        let mut published = 0;
        for payload in payloads {
            if let Err(e) = self.publish_blocking(&active, payload) {
                self.after_insert(&active, published);
                return Err(e);
            }
            published += 1;
        }
        self.after_insert(&active, published);
        Ok(published)
    }

    fn publish_blocking(&self, active: &Active<T>, payload: Arc<T>) -> Result<(), InsertError<T>> {
        let halted = || self.halted.load(Ordering::Acquire);
        let Ok(mut claim) = active.ring.claim(&halted) else {
            return Err(InsertError::NotRunning(payload));
        };
        if claim.waited() {
            active.blocked.mark(1);
        }
        claim.write(payload);
        claim.publish();
        Ok(())
    }

    /// Instrumentation hook run once per successful publish or batch.
    #[inline]
    fn after_insert(&self, active: &Active<T>, n: usize) {
        if n > 0 {
            active.incoming.mark(n as u64);
        }
    }

    /// Stop intake, drain what was published, stop and join the processors,
    /// then release the ring.
    ///
    /// Waiting for in-flight inserts and joining processors are each bounded by
    /// the configured shutdown timeout. Processors that miss the window are
    /// detached and logged; events they had not finished are lost.
    pub fn shutdown(&self) -> Result<ShutdownSummary, BufferError> {
        self.transition(LifecycleState::Running, LifecycleState::ShuttingDown)?;

        let Some(mut lifecycle) = self.lifecycle.lock().take() else {
            self.state
                .store(LifecycleState::ShutDown as u8, Ordering::SeqCst);
            return Err(BufferError::InvalidState {
                current: LifecycleState::ShutDown,
                expected: LifecycleState::Running,
            });
        };
        let timeout = lifecycle.shutdown_timeout;
        info!("Shutting down OutputBuffer");

        // Taking the write lock waits out inserts already past the gate and
        // turns every later insert away.
        let inserts_drained = match self.active.try_write_for(timeout) {
            Some(mut active) => {
                active.take();
                true
            }
            None => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "In-flight inserts did not finish within the shutdown window"
                );
                false
            }
        };

        let ring = lifecycle.ring.clone();
        let last_sequence = ring.published();
        debug!(last_sequence, "Draining processors");
        lifecycle.pool.stop_after(last_sequence, &ring);
        self.halted.store(true, Ordering::Release);
        ring.wait_strategy().signal_published(last_sequence);

        let detached_processors = lifecycle.pool.join(Instant::now() + timeout);
        if detached_processors > 0 {
            warn!(
                detached = detached_processors,
                "Some processors were detached; events they held are lost"
            );
        }

        if !inserts_drained {
            // Released producers give up their guards promptly now.
            if let Some(mut active) = self.active.try_write_for(Duration::from_millis(100)) {
                active.take();
            }
        }
        drop(lifecycle);
        drop(ring);

        self.state
            .store(LifecycleState::ShutDown as u8, Ordering::SeqCst);
        info!(last_sequence, "OutputBuffer shut down");

        Ok(ShutdownSummary {
            last_sequence,
            inserts_drained,
            detached_processors,
        })
    }

    fn with_ring<R>(&self, default: R, f: impl FnOnce(&RingBuffer<T>) -> R) -> R {
        match self.active.try_read() {
            Some(guard) => guard.as_ref().map_or(default, |active| f(&active.ring)),
            None => default,
        }
    }

    /// Claimed minus the slowest processor's cursor; 0 when not running.
    pub fn queue_depth(&self) -> i64 {
        self.with_ring(0, |ring| ring.queue_depth())
    }

    /// Published minus each processor's cursor, by ordinal.
    pub fn processor_lag(&self) -> Vec<i64> {
        self.with_ring(Vec::new(), |ring| {
            let published = ring.published();
            ring.gating_cursors()
                .iter()
                .map(|cursor| published - cursor.get())
                .collect()
        })
    }

    /// Each processor's cursor, by ordinal.
    pub fn processor_cursors(&self) -> Vec<i64> {
        self.with_ring(Vec::new(), |ring| {
            ring.gating_cursors().iter().map(|cursor| cursor.get()).collect()
        })
    }

    /// The sequence producers are gated on: the minimum processor cursor.
    pub fn gating_sequence(&self) -> Option<i64> {
        self.with_ring(None, |ring| Some(ring.gating_sequence()))
    }

    /// Published events not yet consumed by every processor.
    pub fn usage(&self) -> i64 {
        self.with_ring(0, |ring| (ring.published() - ring.gating_sequence()).max(0))
    }

    pub fn remaining_capacity(&self) -> usize {
        self.with_ring(0, |ring| ring.remaining_capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.usage() == 0
    }

    pub fn ring_size(&self) -> Option<usize> {
        self.with_ring(None, |ring| Some(ring.capacity()))
    }

    pub fn partitioner(&self) -> &Arc<dyn Partitioner> {
        &self.partitioner
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }
}

impl<T, F> fmt::Debug for OutputBuffer<T, F>
where
    T: Payload,
    F: ProcessorFactory<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_output_buffer(self, f)
    }
}

impl<T, F> Drop for OutputBuffer<T, F> {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) != LifecycleState::Running as u8 {
            return;
        }
        self.state
            .store(LifecycleState::ShuttingDown as u8, Ordering::SeqCst);
        self.active.get_mut().take();
        if let Some(mut lifecycle) = self.lifecycle.get_mut().take() {
            let last = lifecycle.ring.published();
            lifecycle.pool.stop_after(last, &lifecycle.ring);
            self.halted.store(true, Ordering::Release);
            lifecycle
                .pool
                .join(Instant::now() + lifecycle.shutdown_timeout);
        }
        self.state
            .store(LifecycleState::ShutDown as u8, Ordering::SeqCst);
    }
}

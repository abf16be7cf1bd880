use std::fmt;
use crate::MPMC::Buffer::RingBuffer;
use crate::MPMC::controller::OutputBuffer;
use crate::MPMC::partition::Payload;
use crate::MPMC::processor::{ProcessorFactory, ProcessorPool};

/// Debug function for RingBuffer
///
/// Shows the cursors and gating state; never reads slot contents, so it is
/// safe to call while producers and processors are running.
pub fn debug_ring_buffer<T>(ring: &RingBuffer<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuffer")
        .field("capacity", &ring.capacity())
        .field("claimed", &ring.claimed())
        .field("published", &ring.published())
        .field("gating_sequence", &ring.gating_sequence())
        .field("processors", &ring.gating_cursors().len())
        .field("wait_strategy", &ring.wait_strategy().name())
        .finish_non_exhaustive()
}

/// Debug function for ProcessorPool
///
/// Shows:
/// - Thread names and whether each has exited
/// - The stop cursor (`i64::MAX` while running)
pub fn debug_processor_pool(pool: &ProcessorPool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let threads: Vec<_> = pool
        .threads
        .iter()
        .map(|t| {
            let name = t.handle.thread().name().unwrap_or("<unnamed>").to_string();
            (t.ordinal, name, t.handle.is_finished())
        })
        .collect();
    f.debug_struct("ProcessorPool")
        .field("threads", &threads)
        .field("stop_at", &pool.stop_at.get())
        .finish()
}

/// Debug function for OutputBuffer
pub fn debug_output_buffer<T, F>(buffer: &OutputBuffer<T, F>, f: &mut fmt::Formatter<'_>) -> fmt::Result
where
    T: Payload,
    F: ProcessorFactory<T>,
{
    f.debug_struct("OutputBuffer")
        .field("state", &buffer.state())
        .field("ring_size", &buffer.ring_size())
        .field("queue_depth", &buffer.queue_depth())
        .field("processor_cursors", &buffer.processor_cursors())
        .field("partitioner", buffer.partitioner())
        .finish_non_exhaustive()
}

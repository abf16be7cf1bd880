use std::sync::Arc;

use super::layout::{minimum_sequence, Cursor};
use super::Buffer::{RingBuffer, SlotArena};
use crate::Core::wait_strategy::{Halted, WaitStrategy};

impl<T> RingBuffer<T> {
    /// Build a ring of `capacity` slots gated by `gating` processor cursors.
    ///
    /// # Panics
    /// Panics if `capacity` is below 2 or not a power of two.
    pub fn new(capacity: usize, gating: Vec<Arc<Cursor>>, wait: Arc<dyn WaitStrategy>) -> Self {
        Self {
            arena: SlotArena::new(capacity),
            claimed: Cursor::default(),
            published: Cursor::default(),
            gating: gating.into_boxed_slice(),
            wait,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Highest sequence handed to a producer so far.
    #[inline]
    pub fn claimed(&self) -> i64 {
        self.claimed.get()
    }

    /// Highest sequence below which nothing is left unpublished.
    #[inline]
    pub fn published(&self) -> i64 {
        self.published.get()
    }

    /// The slowest processor's cursor. With no processors registered the ring
    /// gates on its own published cursor.
    #[inline]
    pub fn gating_sequence(&self) -> i64 {
        minimum_sequence(self.gating.iter().map(|c| &**c), self.published())
    }

    pub fn gating_cursors(&self) -> &[Arc<Cursor>] {
        &self.gating
    }

    pub fn wait_strategy(&self) -> &dyn WaitStrategy {
        &*self.wait
    }

    /// Claimed sequences not yet consumed by every processor, including claims
    /// still waiting for a slot.
    #[inline]
    pub fn queue_depth(&self) -> i64 {
        self.claimed() - self.gating_sequence()
    }

    /// Slots a non-blocking claim could take right now.
    pub fn remaining_capacity(&self) -> usize {
        let in_use = self.queue_depth().max(0) as usize;
        self.capacity().saturating_sub(in_use)
    }

    /// Reserve the next sequence if that needs no waiting.
    ///
    /// Returns `None` when the slot for the next sequence still holds an event
    /// some processor has not consumed.
    pub fn try_claim(&self) -> Option<ClaimedSlot<'_, T>> {
        let capacity = self.capacity() as i64;
        loop {
            let current = self.claimed.get();
            let next = current + 1;
            if next - capacity > self.gating_sequence() {
                return None;
            }
            if self.claimed.compare_exchange(current, next).is_ok() {
                return Some(ClaimedSlot::new(self, next, false));
            }
            // another producer won the sequence; retry
            std::hint::spin_loop();
        }
    }

    /// Reserve the next sequence, waiting per the wait strategy until the
    /// slowest processor has freed its slot.
    ///
    /// Returns [`Halted`] if `halted` turns true first. The sequence then stays
    /// claimed but is never written; only a buffer that is shutting down passes
    /// a `halted` that can become true.
    pub fn claim(&self, halted: &dyn Fn() -> bool) -> Result<ClaimedSlot<'_, T>, Halted> {
        let capacity = self.capacity() as i64;
        let next = self.claimed.fetch_add(1) + 1;
        let wrap_point = next - capacity;

        let mut waited = false;
        if wrap_point > self.gating_sequence() {
            waited = true;
            self.wait
                .await_sequence(wrap_point, &|| self.gating_sequence(), halted)?;
        }
        Ok(ClaimedSlot::new(self, next, waited))
    }

    /// Make `sequence` visible once every sequence before it is visible too.
    ///
    /// # Panics
    /// Publishing a sequence that was never claimed, or publishing one twice,
    /// is a protocol violation and panics.
    pub(crate) fn publish(&self, sequence: i64) {
        assert!(
            sequence <= self.claimed(),
            "publish of sequence {sequence} that was never claimed (claimed up to {})",
            self.claimed()
        );
        let slot = self.arena.slot(sequence);
        assert!(
            slot.tag() < sequence,
            "sequence {sequence} published twice"
        );

        slot.stamp(sequence);
        self.advance_published();
        self.wait.signal_published(self.published());
    }

    /// Move `published` forward over every contiguous stamped slot.
    ///
    /// Any publisher may finish the job for another: whoever stamps the slot
    /// that closes a gap carries the cursor over the stamps behind it.
    fn advance_published(&self) {
        loop {
            let current = self.published.get();
            let next = current + 1;
            if self.arena.slot(next).tag() != next {
                return;
            }
            // Losing the race means someone else advanced it; re-read and go on.
            let _ = self.published.compare_exchange(current, next);
        }
    }

    /// Read the payload published under `sequence`.
    ///
    /// Returns `None` for a claim that was abandoned before it was written.
    ///
    /// # Safety
    /// The caller must hold a gating cursor below `sequence` for as long as the
    /// returned reference lives; otherwise a producer may recycle the slot.
    ///
    /// # Panics
    /// Panics if `sequence` is not published yet.
    pub(crate) unsafe fn get(&self, sequence: i64) -> Option<&Arc<T>> {
        assert!(
            sequence <= self.published(),
            "read of unpublished sequence {sequence} (published up to {})",
            self.published()
        );
        (*self.arena.slot(sequence).payload.get()).as_ref()
    }
}

/// Exclusive right to write and publish one sequence.
///
/// Only the holder can write the slot, and `publish` consumes the claim, so
/// claim-before-write-before-publish holds by construction. A claim dropped
/// without publishing is published empty so it never leaves a gap.
pub struct ClaimedSlot<'a, T> {
    ring: &'a RingBuffer<T>,
    sequence: i64,
    waited: bool,
    published: bool,
}

impl<'a, T> ClaimedSlot<'a, T> {
    fn new(ring: &'a RingBuffer<T>, sequence: i64, waited: bool) -> Self {
        Self {
            ring,
            sequence,
            waited,
            published: false,
        }
    }

    #[inline]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Whether the claim had to wait for a processor to free its slot.
    #[inline]
    pub fn waited(&self) -> bool {
        self.waited
    }

    /// Store `payload` into the claimed slot, releasing whatever the slot held
    /// on its previous lap.
    pub fn write(&mut self, payload: Arc<T>) {
        self.store(Some(payload));
    }

    pub fn publish(mut self) {
        self.published = true;
        self.ring.publish(self.sequence);
    }

    fn store(&mut self, payload: Option<Arc<T>>) {
        let slot = self.ring.arena.slot(self.sequence);
        // SAFETY: this claim is the only writer of `sequence`, every processor
        // has moved past `sequence - capacity`, and no reader looks at the slot
        // before it is stamped with `sequence`.
        unsafe {
            *slot.payload.get() = payload;
        }
    }
}

impl<T> Drop for ClaimedSlot<'_, T> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        tracing::error!(
            sequence = self.sequence,
            "Claimed sequence dropped without publish; publishing it empty"
        );
        self.store(None);
        self.published = true;
        self.ring.publish(self.sequence);
    }
}

// The slot arena: the physical backing store the ring indexes into.

use super::layout::{Cursor, INITIAL_SEQUENCE};
use crate::Core::wait_strategy::WaitStrategy;

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering::SeqCst};
use std::sync::Arc;

/// A single reusable container in the arena.
///
/// Holds one in-flight payload reference plus the sequence it was last
/// published under. `#[repr(C, align(64))]` keeps neighbouring slots off each
/// other's cache line.
#[repr(C, align(64))]
pub struct Slot<T> {
    /// The sequence most recently published into this slot.
    /// - `-1` until the first lap publishes it.
    /// - A producer stores its claimed sequence here after writing,
    ///   which is what makes the slot count towards the published cursor.
    pub tag: AtomicI64,

    /// The payload reference. `None` for an abandoned claim.
    pub payload: UnsafeCell<Option<Arc<T>>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            tag: AtomicI64::new(INITIAL_SEQUENCE),
            payload: UnsafeCell::new(None),
        }
    }

    // Tag stores and loads are SeqCst: two producers publishing neighbouring
    // sequences must not both miss each other's stamp, or the published cursor
    // would stall below them.
    #[inline]
    pub fn tag(&self) -> i64 {
        self.tag.load(SeqCst)
    }

    #[inline]
    pub(crate) fn stamp(&self, sequence: i64) {
        self.tag.store(sequence, SeqCst);
    }
}

/// Fixed array of slots, allocated once and never resized.
///
/// The arena itself has no synchronization; every access is coordinated by the
/// ring's claim/publish cursors.
pub struct SlotArena<T> {
    pub(crate) slots: Box<[Slot<T>]>,
    pub(crate) mask: usize,
}

impl<T> SlotArena<T> {
    /// Preallocates `capacity` empty slots.
    ///
    /// # Panics
    /// Panics if `capacity` is below 2 or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "capacity must be at least 2");
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");

        let slots = (0..capacity)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index for `sequence`: `sequence & (capacity - 1)`.
    #[inline]
    pub fn index_of(&self, sequence: i64) -> usize {
        (sequence as usize) & self.mask
    }

    #[inline]
    pub fn slot(&self, sequence: i64) -> &Slot<T> {
        let index = self.index_of(sequence);
        // SAFETY: `mask` keeps `index` inside `slots`.
        unsafe { self.slots.get_unchecked(index) }
    }
}

/// Sequence-numbered circular index over a [`SlotArena`].
///
/// ### Concurrency Design:
/// - **Producers** reserve sequences on `claimed` (CAS for the non-blocking
///   path, fetch-add for the blocking path), write the slot, then stamp the
///   slot's `tag` and help advance `published` across every contiguous stamped
///   slot.
/// - **Processors** only read slots at or below `published` and report their
///   own progress through the gating cursors.
/// - **Gating**: a claim of sequence `s` may only proceed once
///   `s - capacity <= min(gating)`, so no unconsumed slot is ever overwritten.
pub struct RingBuffer<T> {
    pub(crate) arena: SlotArena<T>,

    /// Highest sequence handed out to a producer.
    pub(crate) claimed: Cursor,

    /// Highest sequence such that it and every sequence below it is published.
    pub(crate) published: Cursor,

    /// One cursor per registered processor.
    pub(crate) gating: Box<[Arc<Cursor>]>,

    /// How blocked producers wait for gating, and who gets woken on publish.
    pub(crate) wait: Arc<dyn WaitStrategy>,
}

// SAFETY: slot contents are only touched under the claim/publish/gating
// protocol in `Buffer_impl`; a slot has one writer (the claimer) and readers
// only after its tag is published. Payloads cross threads as `Arc<T>`, which
// needs `T: Send + Sync`.
unsafe impl<T: Send + Sync> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_ring_buffer(self, f)
    }
}

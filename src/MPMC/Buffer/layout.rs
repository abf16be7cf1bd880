use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

/// The value every cursor starts at: nothing claimed, published or consumed yet.
pub const INITIAL_SEQUENCE: i64 = -1;

/// A single sequence counter padded to its own cache line.
///
/// Claimed, published and per-processor consumed positions are all `Cursor`s.
/// Padding keeps a producer hammering `claimed` from invalidating the line a
/// processor reads its own position from.
#[repr(C)]
#[derive(Debug)]
pub struct Cursor {
    value: CachePadded<AtomicI64>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

impl Cursor {
    pub fn new(value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(value)),
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Returns the value before the increment.
    #[inline]
    pub fn fetch_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel)
    }

    #[inline]
    pub fn compare_exchange(&self, current: i64, next: i64) -> Result<i64, i64> {
        self.value
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// The smallest value among `cursors`, or `default` when there are none.
#[inline]
pub fn minimum_sequence<'a, I>(cursors: I, default: i64) -> i64
where
    I: IntoIterator<Item = &'a Cursor>,
{
    cursors.into_iter().map(Cursor::get).min().unwrap_or(default)
}

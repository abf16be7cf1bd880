//! Policies for how a thread waits for a sequence condition to become true.
//!
//! Both suspension points of the buffer go through a [`WaitStrategy`]: a
//! processor waiting for the published cursor to reach its next sequence, and
//! a producer waiting for the slowest processor to free a slot. Neither side
//! knows which policy is active; they only call
//! [`await_sequence`](WaitStrategy::await_sequence) and
//! [`signal_published`](WaitStrategy::signal_published).

use crate::Core::futex::{futex_wait, futex_wake_all};
use crate::MPMC::Structs::WaitStrategyKind;

use crossbeam_utils::{Backoff, CachePadded};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Returned by [`WaitStrategy::await_sequence`] when the waiter was asked to stop
/// before the target sequence became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halted;

pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Waits until `available()` reaches `target` and returns the value seen,
    /// which may be past `target`.
    ///
    /// `halted` is polled between checks; once it reports `true` and the target
    /// is still out of reach the wait ends with [`Halted`].
    fn await_sequence(
        &self,
        target: i64,
        available: &dyn Fn() -> i64,
        halted: &dyn Fn() -> bool,
    ) -> Result<i64, Halted>;

    /// Wakes anyone waiting on a sequence. Called after every cursor move that
    /// another thread may be waiting for.
    fn signal_published(&self, sequence: i64);

    fn name(&self) -> &'static str;
}

/// Builds the strategy selected in configuration.
pub fn wait_strategy_for(kind: WaitStrategyKind) -> Arc<dyn WaitStrategy> {
    match kind {
        WaitStrategyKind::BusySpin => Arc::new(BusySpinWaitStrategy),
        WaitStrategyKind::Yielding => Arc::new(YieldingWaitStrategy),
        WaitStrategyKind::Blocking => Arc::new(BlockingWaitStrategy::default()),
        WaitStrategyKind::Sleeping => Arc::new(SleepingWaitStrategy::default()),
    }
}

/// Spins on the condition. Lowest latency, burns a full core per waiter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    fn await_sequence(
        &self,
        target: i64,
        available: &dyn Fn() -> i64,
        halted: &dyn Fn() -> bool,
    ) -> Result<i64, Halted> {
        loop {
            let seen = available();
            if seen >= target {
                return Ok(seen);
            }
            if halted() {
                return Err(Halted);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_published(&self, _sequence: i64) {}

    fn name(&self) -> &'static str {
        "BusySpinWaitStrategy"
    }
}

/// Spins briefly, then yields the thread between checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldingWaitStrategy;

impl WaitStrategy for YieldingWaitStrategy {
    fn await_sequence(
        &self,
        target: i64,
        available: &dyn Fn() -> i64,
        halted: &dyn Fn() -> bool,
    ) -> Result<i64, Halted> {
        let backoff = Backoff::new();
        loop {
            let seen = available();
            if seen >= target {
                return Ok(seen);
            }
            if halted() {
                return Err(Halted);
            }
            backoff.snooze();
        }
    }

    fn signal_published(&self, _sequence: i64) {}

    fn name(&self) -> &'static str {
        "YieldingWaitStrategy"
    }
}

/// Parks waiters on a futex word; publishers bump the word and wake them.
///
/// Lowest CPU use, highest wake-up latency. The wake syscall is skipped when
/// nobody is parked.
#[derive(Default)]
pub struct BlockingWaitStrategy {
    signal: CachePadded<AtomicU32>,
    waiters: CachePadded<AtomicU32>,
}

// Upper bound on a single park so `halted` is re-polled even without a signal.
const PARK_TIMEOUT: Duration = Duration::from_millis(10);

impl WaitStrategy for BlockingWaitStrategy {
    fn await_sequence(
        &self,
        target: i64,
        available: &dyn Fn() -> i64,
        halted: &dyn Fn() -> bool,
    ) -> Result<i64, Halted> {
        loop {
            let seen = available();
            if seen >= target {
                return Ok(seen);
            }
            if halted() {
                return Err(Halted);
            }

            // Register before sampling the word so a concurrent signal either
            // sees us in `waiters` or changes the word we are about to sleep on.
            self.waiters.fetch_add(1, SeqCst);
            let word = self.signal.load(SeqCst);
            if available() < target && !halted() {
                futex_wait(&self.signal, word, Some(PARK_TIMEOUT));
            }
            self.waiters.fetch_sub(1, SeqCst);
        }
    }

    fn signal_published(&self, _sequence: i64) {
        self.signal.fetch_add(1, SeqCst);
        if self.waiters.load(SeqCst) > 0 {
            futex_wake_all(&self.signal);
        }
    }

    fn name(&self) -> &'static str {
        "BlockingWaitStrategy"
    }
}

impl fmt::Debug for BlockingWaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingWaitStrategy")
            .field("signal", &self.signal.load(SeqCst))
            .field("waiters", &self.waiters.load(SeqCst))
            .finish()
    }
}

/// Spins, then yields, then sleeps for `sleep` between re-checks.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    retries: u32,
    sleep: Duration,
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self {
            retries: 200,
            sleep: Duration::from_micros(100),
        }
    }
}

impl SleepingWaitStrategy {
    pub fn new(retries: u32, sleep: Duration) -> Self {
        Self { retries, sleep }
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn await_sequence(
        &self,
        target: i64,
        available: &dyn Fn() -> i64,
        halted: &dyn Fn() -> bool,
    ) -> Result<i64, Halted> {
        let mut counter = self.retries;
        loop {
            let seen = available();
            if seen >= target {
                return Ok(seen);
            }
            if halted() {
                return Err(Halted);
            }

            if counter > self.retries / 2 {
                counter -= 1;
                std::hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                thread::sleep(self.sleep);
            }
        }
    }

    fn signal_published(&self, _sequence: i64) {}

    fn name(&self) -> &'static str {
        "SleepingWaitStrategy"
    }
}

// Plain configuration and state types for the buffer; no atomics here.

use crate::error::BufferError;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which [`WaitStrategy`](crate::Core::wait_strategy::WaitStrategy) processors
/// and blocked producers use.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum WaitStrategyKind {
    BusySpin,
    Yielding,
    #[default]
    Blocking,
    Sleeping,
}

impl WaitStrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            WaitStrategyKind::BusySpin => "busy_spinning",
            WaitStrategyKind::Yielding => "yielding",
            WaitStrategyKind::Blocking => "blocking",
            WaitStrategyKind::Sleeping => "sleeping",
        }
    }
}

impl fmt::Display for WaitStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WaitStrategyKind {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "busy_spinning" | "busy_spin" | "busyspin" => Ok(WaitStrategyKind::BusySpin),
            "yielding" => Ok(WaitStrategyKind::Yielding),
            "blocking" => Ok(WaitStrategyKind::Blocking),
            "sleeping" => Ok(WaitStrategyKind::Sleeping),
            other => Err(BufferError::InvalidConfig(format!(
                "unknown wait strategy {other:?} (expected busy_spinning, yielding, blocking or sleeping)"
            ))),
        }
    }
}

/// Lifecycle of a buffer instance. States only move forward.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    ShuttingDown = 3,
    ShutDown = 4,
}

impl LifecycleState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Initialized,
            2 => LifecycleState::Running,
            3 => LifecycleState::ShuttingDown,
            _ => LifecycleState::ShutDown,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::ShutDown => "shut down",
        };
        f.write_str(name)
    }
}

/// Validated buffer configuration. Build one with
/// [`BufferBuilder`](crate::MPMC::BufferBuilder).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// Number of slots; a power of two.
    pub ring_size: usize,
    /// Number of processor threads, each owning one partition.
    pub processor_count: usize,
    pub wait_strategy: WaitStrategyKind,
    /// Bound on draining in-flight inserts and on joining processor threads.
    pub shutdown_timeout: Duration,
    /// Processor threads are named `<prefix>-<ordinal>`.
    pub thread_name_prefix: String,
    /// Prefix for every meter the buffer registers.
    pub metric_prefix: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ring_size: 65536,
            processor_count: 3,
            wait_strategy: WaitStrategyKind::Blocking,
            shutdown_timeout: Duration::from_secs(10),
            thread_name_prefix: "outputbufferprocessor".to_string(),
            metric_prefix: "OutputBuffer".to_string(),
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.ring_size < 2 || !self.ring_size.is_power_of_two() {
            return Err(BufferError::InvalidConfig(format!(
                "ring size must be a power of two and at least 2, got {}",
                self.ring_size
            )));
        }
        if self.ring_size > (i64::MAX as usize) / 2 {
            return Err(BufferError::InvalidConfig(format!(
                "ring size {} is too large",
                self.ring_size
            )));
        }
        if self.processor_count == 0 {
            return Err(BufferError::InvalidConfig(
                "processor count must be at least 1".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(BufferError::InvalidConfig(
                "shutdown timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub mod futex;
pub mod metrics;
pub mod wait_strategy;

pub use metrics::{metric_name, Meter, MetricRegistry};
pub use wait_strategy::{
    wait_strategy_for, BlockingWaitStrategy, BusySpinWaitStrategy, Halted, SleepingWaitStrategy,
    WaitStrategy, YieldingWaitStrategy,
};

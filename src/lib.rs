//! Ingestion-side ring buffer for a log pipeline.
//!
//! Producers hand payload references to an [`OutputBuffer`]; a fixed pool of
//! processor threads consumes them from a preallocated ring, each handling the
//! events its partition owns.

// Module naming follows project convention (MPMC = Multi-Producer Multi-Consumer)
#[allow(non_snake_case)]
pub mod MPMC;
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}
pub mod error;

pub use error::{BufferError, HandlerError, InsertError};
pub use Core::metrics::{Meter, MetricRegistry};
pub use Core::wait_strategy::WaitStrategy;
pub use MPMC::{
    BufferBuilder, BufferConfig, EventHandler, LifecycleState, OutputBuffer, Partitioner,
    Payload, ProcessorFactory, Sha256Partitioner, ShutdownSummary, WaitStrategyKind,
};

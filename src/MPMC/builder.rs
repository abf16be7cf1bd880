use super::controller::OutputBuffer;
use super::partition::Payload;
use super::processor::ProcessorFactory;
use super::Structs::{BufferConfig, WaitStrategyKind};
use crate::error::BufferError;
use crate::Core::metrics::MetricRegistry;

use std::sync::Arc;
use std::time::Duration;

pub struct BufferBuilder {
    config: BufferConfig,
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self {
            config: BufferConfig::default(), // 65536 slots, 3 processors, blocking
        }
    }
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ring_size(mut self, ring_size: usize) -> Self {
        self.config.ring_size = ring_size;
        self
    }

    pub fn with_processor_count(mut self, count: usize) -> Self {
        self.config.processor_count = count;
        self
    }

    pub fn with_wait_strategy(mut self, kind: WaitStrategyKind) -> Self {
        self.config.wait_strategy = kind;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metric_prefix = prefix.into();
        self
    }

    /// Validated configuration, ready for [`OutputBuffer::initialize`].
    pub fn build(self) -> Result<BufferConfig, BufferError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Construct and initialize a running buffer in one step.
    pub fn build_buffer<T, F>(
        self,
        factory: F,
        registry: Arc<MetricRegistry>,
    ) -> Result<OutputBuffer<T, F>, BufferError>
    where
        T: Payload,
        F: ProcessorFactory<T>,
    {
        let config = self.build()?;
        let buffer = OutputBuffer::new(factory, registry);
        buffer.initialize(config)?;
        Ok(buffer)
    }
}

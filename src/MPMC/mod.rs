mod builder;
pub mod controller;
pub mod partition;
pub mod processor;

pub use builder::BufferBuilder;
pub use controller::{OutputBuffer, ShutdownSummary};
pub use partition::{Partitioner, Payload, Sha256Partitioner};
pub use processor::{EventHandler, ProcessorFactory, ProcessorPool};

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::{RingBuffer, Slot, SlotArena}; // re-export for stable path
    pub use Buffer_impl::ClaimedSlot;
    pub use layout::Cursor;
}

pub mod Structs {
    pub mod Buffer_Structs;
    pub use Buffer_Structs::{BufferConfig, LifecycleState, WaitStrategyKind}; // re-export for stable path
}

pub use Structs::{BufferConfig, LifecycleState, WaitStrategyKind};

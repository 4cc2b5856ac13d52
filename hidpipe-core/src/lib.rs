//! hidpipe Core Library
//!
//! Producer/consumer delivery pipeline for discrete, strongly-typed input
//! and sensor events. Provides the event record codec, the lock-free
//! shared-memory event queue, and session/ownership arbitration between a
//! privileged producer and one unprivileged consumer.

pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod shm;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigLoader, PipelineConfig, QueueConfig};
pub use error::{CodecError, HidError, HidResult, QueueError, SessionError};
pub use event::{Event, EventField, EventOptions, EventPhase, EventType, FieldValue};
pub use session::{
    CopyEventOptions, EntitlementChecker, MemoryProvider, OpenOptions, SessionHandle, SessionState,
};
pub use shm::{EventQueue, EventQueueReader, QueueNotifier, QueueOptions, SharedMemoryRegion};
pub use types::{ClientId, DeviceId, Fixed, Timestamp};

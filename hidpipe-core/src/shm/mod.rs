// SPDX-License-Identifier: Apache-2.0

//! Shared Memory transport.
//!
//! POSIX shared memory regions and the lock-free SPSC event queue layered on
//! top of them. Producer and consumer each hold their own mapping; the only
//! fields either side mutates concurrently are the atomic head and tail
//! cursors in the queue header.

mod queue;
mod region;

pub use queue::{
    EventQueue, EventQueueReader, NullNotifier, QueueNotifier, QueueOptions, ENTRY_HEADER_SIZE,
    MIN_CAPACITY, QUEUE_HEADER_SIZE,
};
pub use region::SharedMemoryRegion;

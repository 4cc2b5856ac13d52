// SPDX-License-Identifier: Apache-2.0

//! Session management.
//!
//! Ownership arbitration between one device's event queue and its consumer:
//! at most one active attachment per client, with every administrative
//! operation serialized through a single command task shared with teardown.

mod manager;
mod state;

pub use manager::{
    AllowAll, CopyEventOptions, EntitlementChecker, MemoryProvider, OpenOptions,
    PosixShmProvider, QueueAttachment, SessionHandle, QUEUE_CAPABILITY,
};
pub use state::{SessionLifecycle, SessionState};

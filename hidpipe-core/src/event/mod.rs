// SPDX-License-Identifier: Apache-2.0

//! Event Record codec.
//!
//! Typed, possibly-composite event records and their self-describing byte
//! encoding. Records are immutable from the consumer's point of view once
//! serialized; reconstruction yields an independent copy.

mod codec;
mod payload;
mod record;

pub use codec::NODE_HEADER_SIZE;
pub use payload::{
    AxisData, EventField, EventOptions, EventPayload, EventPhase, EventType, FieldValue,
    MAX_VENDOR_DATA,
};
pub use record::{Event, EventNode, MAX_EVENT_DEPTH};

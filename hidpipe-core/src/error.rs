//! Custom error types for hidpipe.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

use crate::event::{EventField, EventType};
use crate::types::ClientId;

/// Top-level error type for the hidpipe event pipeline.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum HidError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Event Codec Errors - Rejected at the Serialization Boundary
    // =========================================================================
    #[error("Event codec error: {0}")]
    Codec(#[from] CodecError),

    // =========================================================================
    // Event Queue Errors - Recoverable Except Corruption
    // =========================================================================
    #[error("Event queue error: {0}")]
    Queue(#[from] QueueError),

    // =========================================================================
    // Session Errors - Authorization and Lifecycle
    // =========================================================================
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors cause immediate startup failure.
/// Used when configuration is invalid and the pipeline cannot safely start.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Queue capacity out of bounds: {capacity} bytes (min: {min}, max: {max})")]
    CapacityOutOfBounds {
        capacity: usize,
        min: usize,
        max: usize,
    },
}

/// Event codec errors - malformed input rejected at the boundary,
/// never partially applied.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unrecognized event type tag: {tag:#010x}")]
    UnknownType { tag: u32 },

    #[error("Truncated event data: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("Declared length {declared} does not match bytes consumed {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    #[error("Declared type mask {declared:#010x} does not match computed mask {computed:#010x}")]
    MaskMismatch { declared: u32, computed: u32 },

    #[error("Output buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("Field {field:?} does not apply to event type {event_type:?}")]
    FieldNotApplicable {
        field: EventField,
        event_type: EventType,
    },

    #[error("Vendor payload size exceeds maximum: {size} > {max}")]
    VendorPayloadTooLarge { size: usize, max: usize },

    #[error("Event record index {index} out of bounds (arena holds {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Event tree depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("Size arithmetic overflowed during {operation}")]
    ArithmeticOverflow { operation: &'static str },
}

/// Event queue errors. Full and Empty are recoverable by the caller;
/// CorruptedState is fatal to the owning session.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Event queue full - cannot enqueue {size} bytes")]
    Full { size: usize },

    #[error("Event queue empty - no data available")]
    Empty,

    #[error("Corrupted queue state: head={head} tail={tail} capacity={capacity}")]
    CorruptedState { head: u32, tail: u32, capacity: u32 },

    #[error("Malformed entry at offset {offset}: {reason}")]
    MalformedEntry { offset: u32, reason: String },

    #[error("Region too small for a queue: {size} bytes")]
    RegionTooSmall { size: usize },
}

/// Session lifecycle and authorization errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Client {client} is not entitled to open this queue")]
    NotEntitled { client: ClientId },

    #[error("Client {client} already holds an open session")]
    AlreadyOpen { client: ClientId },

    #[error("Client {client} has no open session")]
    NotOpen { client: ClientId },

    #[error("Session manager is shutting down - request not accepted")]
    Unavailable,

    #[error("No event of type {event_type:?} is available")]
    NoSuchEvent { event_type: EventType },

    #[error("Bad argument: {reason}")]
    BadArgument { reason: String },

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Result type alias using HidError.
pub type HidResult<T> = Result<T, HidError>;

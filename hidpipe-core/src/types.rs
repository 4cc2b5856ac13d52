// SPDX-License-Identifier: Apache-2.0

//! Newtype wrappers for validated inputs and numeric primitives.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by
//! construction. Identifier types validate their invariants at creation time;
//! `Fixed` carries the 16.16 fixed-point representation used for every
//! spatial or angular quantity so that encoded bytes are bit-reproducible
//! across producer and consumer.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Validated device identifier.
/// Must be non-empty, alphanumeric with hyphens/underscores, max 64 chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new DeviceId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();
        validate_identifier("device_id", &id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Validated client identifier - the consumer process requesting a session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Create a new ClientId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();
        validate_identifier("client_id", &id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ClientId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// Shared identifier validation: non-empty, max 64 chars, alphanumeric
/// plus hyphens and underscores.
fn validate_identifier(field: &'static str, id: &str) -> Result<(), HardValidationError> {
    if id.is_empty() {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: id.to_string(),
            reason: "Identifier cannot be empty".to_string(),
        });
    }

    if id.len() > 64 {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: id.to_string(),
            reason: format!("Identifier too long: {} chars (max 64)", id.len()),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: id.to_string(),
            reason: "Identifier must contain only alphanumeric characters, hyphens, and underscores"
                .to_string(),
        });
    }

    Ok(())
}

/// Monotonic event timestamp in nanoseconds.
///
/// Producers stamp events from a monotonic clock; the value is carried
/// verbatim on the wire and never interpreted by the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from raw nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get the raw nanosecond value.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Signed 16.16 fixed-point scalar.
///
/// All spatial and angular event fields use this representation rather than
/// floating point, so serialized payloads are identical regardless of the
/// FPU on either side of the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Fixed(i32);

impl Fixed {
    /// Number of fractional bits.
    pub const FRACTION_BITS: u32 = 16;

    /// The value 0.0.
    pub const ZERO: Fixed = Fixed(0);

    /// The value 1.0.
    pub const ONE: Fixed = Fixed(1 << Self::FRACTION_BITS);

    /// Construct from the raw 16.16 bit pattern.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw 16.16 bit pattern.
    pub const fn to_raw(self) -> i32 {
        self.0
    }

    /// Construct from a whole integer. Saturates at the representable range.
    pub const fn from_int(value: i32) -> Self {
        Self(value.saturating_mul(1 << Self::FRACTION_BITS))
    }

    /// Truncate to the whole part.
    pub const fn to_int(self) -> i32 {
        self.0 >> Self::FRACTION_BITS
    }

    /// Convert from f64, saturating outside the representable range.
    pub fn from_f64(value: f64) -> Self {
        let scaled = value * f64::from(1i32 << Self::FRACTION_BITS);
        if scaled >= f64::from(i32::MAX) {
            Self(i32::MAX)
        } else if scaled <= f64::from(i32::MIN) {
            Self(i32::MIN)
        } else {
            Self(scaled as i32)
        }
    }

    /// Convert to f64 (exact - every 16.16 value is representable).
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / f64::from(1i32 << Self::FRACTION_BITS)
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    fn neg(self) -> Fixed {
        Fixed(self.0.saturating_neg())
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Event type tags, fixed-layout payloads, and typed field access.
//!
//! Every event type has a payload whose size is a pure function of the type
//! tag. This is what lets the queue size an enqueue exactly once: the encoded
//! length of a record depends only on its tag and its child list.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::types::Fixed;

/// Maximum vendor-defined payload bytes. Fixed so that the vendor payload
/// layout stays a pure function of the type tag.
pub const MAX_VENDOR_DATA: usize = 64;

/// Closed set of event types with stable wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventType {
    Vendor = 0,
    Button = 1,
    Keyboard = 2,
    Translation = 3,
    Rotation = 4,
    Scroll = 5,
    Velocity = 6,
    Orientation = 7,
    Accelerometer = 8,
    Gyro = 9,
    Compass = 10,
    Temperature = 11,
    AmbientLight = 12,
    Proximity = 13,
}

impl EventType {
    /// Wire tag for this type.
    pub const fn tag(self) -> u32 {
        self as u32
    }

    /// Decode a wire tag. Unknown tags are a format error at the boundary.
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Vendor),
            1 => Some(Self::Button),
            2 => Some(Self::Keyboard),
            3 => Some(Self::Translation),
            4 => Some(Self::Rotation),
            5 => Some(Self::Scroll),
            6 => Some(Self::Velocity),
            7 => Some(Self::Orientation),
            8 => Some(Self::Accelerometer),
            9 => Some(Self::Gyro),
            10 => Some(Self::Compass),
            11 => Some(Self::Temperature),
            12 => Some(Self::AmbientLight),
            13 => Some(Self::Proximity),
            _ => None,
        }
    }

    /// One bit per type, OR-accumulated into record type masks.
    pub const fn type_mask(self) -> u32 {
        1 << self.tag()
    }

    /// Fixed payload size in bytes, known from the tag alone.
    pub const fn payload_size(self) -> usize {
        match self {
            Self::Translation
            | Self::Rotation
            | Self::Scroll
            | Self::Velocity
            | Self::Orientation
            | Self::Accelerometer
            | Self::Gyro
            | Self::Compass => 12,
            Self::Button => 16,
            Self::Keyboard => 12,
            Self::Temperature => 4,
            Self::AmbientLight => 20,
            Self::Proximity => 8,
            Self::Vendor => 16 + MAX_VENDOR_DATA,
        }
    }

    /// Whether this type carries a 3-axis fixed-point vector payload.
    pub const fn is_axis(self) -> bool {
        matches!(
            self,
            Self::Translation
                | Self::Rotation
                | Self::Scroll
                | Self::Velocity
                | Self::Orientation
                | Self::Accelerometer
                | Self::Gyro
                | Self::Compass
        )
    }
}

bitflags! {
    /// Phase bits for continuous gestures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventPhase: u32 {
        const BEGAN = 1 << 0;
        const CHANGED = 1 << 1;
        const ENDED = 1 << 2;
    }
}

bitflags! {
    /// Per-event delivery hints.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventOptions: u32 {
        /// Always signal the consumer for this event.
        const FORCE_NOTIFY = 1 << 0;
        /// Publish the entry but send no notification at all.
        const SUPPRESS_NOTIFY = 1 << 1;
    }
}

/// 3-axis fixed-point vector shared by the spatial/angular event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisData {
    pub x: Fixed,
    pub y: Fixed,
    pub z: Fixed,
}

impl AxisData {
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }
}

/// Fixed-layout payload, one variant per event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Used by every axis type; the node's tag disambiguates.
    Axis(AxisData),
    Button {
        mask: u32,
        number: u32,
        click_count: u32,
        pressed: bool,
    },
    Keyboard {
        usage_page: u32,
        usage: u32,
        down: bool,
    },
    Temperature {
        level: Fixed,
    },
    AmbientLight {
        level: u32,
        channels: [u32; 4],
    },
    Proximity {
        detection_mask: u32,
        level: u32,
    },
    Vendor {
        usage_page: u32,
        usage: u32,
        version: u32,
        length: u32,
        data: [u8; MAX_VENDOR_DATA],
    },
}

impl EventPayload {
    /// Whether this payload shape is the one `event_type` requires.
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            Self::Axis(_) => event_type.is_axis(),
            Self::Button { .. } => event_type == EventType::Button,
            Self::Keyboard { .. } => event_type == EventType::Keyboard,
            Self::Temperature { .. } => event_type == EventType::Temperature,
            Self::AmbientLight { .. } => event_type == EventType::AmbientLight,
            Self::Proximity { .. } => event_type == EventType::Proximity,
            Self::Vendor { .. } => event_type == EventType::Vendor,
        }
    }

    /// Write the fixed payload into `out` (little endian).
    /// `out` must be exactly `event_type.payload_size()` bytes; the
    /// serializer sizes the slice from `payload_size()` before calling.
    pub(crate) fn write_to(&self, out: &mut [u8]) {
        match self {
            Self::Axis(axis) => {
                out[0..4].copy_from_slice(&axis.x.to_raw().to_le_bytes());
                out[4..8].copy_from_slice(&axis.y.to_raw().to_le_bytes());
                out[8..12].copy_from_slice(&axis.z.to_raw().to_le_bytes());
            }
            Self::Button {
                mask,
                number,
                click_count,
                pressed,
            } => {
                out[0..4].copy_from_slice(&mask.to_le_bytes());
                out[4..8].copy_from_slice(&number.to_le_bytes());
                out[8..12].copy_from_slice(&click_count.to_le_bytes());
                out[12..16].copy_from_slice(&u32::from(*pressed).to_le_bytes());
            }
            Self::Keyboard {
                usage_page,
                usage,
                down,
            } => {
                out[0..4].copy_from_slice(&usage_page.to_le_bytes());
                out[4..8].copy_from_slice(&usage.to_le_bytes());
                out[8..12].copy_from_slice(&u32::from(*down).to_le_bytes());
            }
            Self::Temperature { level } => {
                out[0..4].copy_from_slice(&level.to_raw().to_le_bytes());
            }
            Self::AmbientLight { level, channels } => {
                out[0..4].copy_from_slice(&level.to_le_bytes());
                for (i, ch) in channels.iter().enumerate() {
                    out[4 + i * 4..8 + i * 4].copy_from_slice(&ch.to_le_bytes());
                }
            }
            Self::Proximity {
                detection_mask,
                level,
            } => {
                out[0..4].copy_from_slice(&detection_mask.to_le_bytes());
                out[4..8].copy_from_slice(&level.to_le_bytes());
            }
            Self::Vendor {
                usage_page,
                usage,
                version,
                length,
                data,
            } => {
                out[0..4].copy_from_slice(&usage_page.to_le_bytes());
                out[4..8].copy_from_slice(&usage.to_le_bytes());
                out[8..12].copy_from_slice(&version.to_le_bytes());
                out[12..16].copy_from_slice(&length.to_le_bytes());
                out[16..16 + MAX_VENDOR_DATA].copy_from_slice(data);
            }
        }
    }

    /// Read a fixed payload of the given type from `bytes` (little endian).
    pub fn read_from(event_type: EventType, bytes: &[u8]) -> Result<Self, CodecError> {
        let needed = event_type.payload_size();
        if bytes.len() < needed {
            return Err(CodecError::Truncated {
                needed,
                have: bytes.len(),
            });
        }

        let u32_at = |offset: usize| u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        let fixed_at =
            |offset: usize| Fixed::from_raw(i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()));

        let payload = match event_type {
            ty if ty.is_axis() => Self::Axis(AxisData {
                x: fixed_at(0),
                y: fixed_at(4),
                z: fixed_at(8),
            }),
            EventType::Button => Self::Button {
                mask: u32_at(0),
                number: u32_at(4),
                click_count: u32_at(8),
                pressed: u32_at(12) != 0,
            },
            EventType::Keyboard => Self::Keyboard {
                usage_page: u32_at(0),
                usage: u32_at(4),
                down: u32_at(8) != 0,
            },
            EventType::Temperature => Self::Temperature { level: fixed_at(0) },
            EventType::AmbientLight => Self::AmbientLight {
                level: u32_at(0),
                channels: [u32_at(4), u32_at(8), u32_at(12), u32_at(16)],
            },
            EventType::Proximity => Self::Proximity {
                detection_mask: u32_at(0),
                level: u32_at(4),
            },
            EventType::Vendor => {
                let mut data = [0u8; MAX_VENDOR_DATA];
                data.copy_from_slice(&bytes[16..16 + MAX_VENDOR_DATA]);
                let length = u32_at(12);
                if length as usize > MAX_VENDOR_DATA {
                    return Err(CodecError::VendorPayloadTooLarge {
                        size: length as usize,
                        max: MAX_VENDOR_DATA,
                    });
                }
                Self::Vendor {
                    usage_page: u32_at(0),
                    usage: u32_at(4),
                    version: u32_at(8),
                    length,
                    data,
                }
            }
            // All axis types handled by the guard arm above.
            _ => unreachable!("non-axis types are matched explicitly"),
        };

        Ok(payload)
    }
}

/// Typed keys into the fixed payload of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventField {
    /// X component of any 3-axis type.
    AxisX,
    AxisY,
    AxisZ,
    ButtonMask,
    ButtonNumber,
    ButtonClickCount,
    ButtonPressed,
    KeyboardUsagePage,
    KeyboardUsage,
    KeyboardDown,
    TemperatureLevel,
    LightLevel,
    LightChannel0,
    LightChannel1,
    LightChannel2,
    LightChannel3,
    ProximityDetectionMask,
    ProximityLevel,
    VendorUsagePage,
    VendorUsage,
    VendorVersion,
    VendorLength,
}

/// Value read from or written to a payload field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Fixed(Fixed),
}

impl FieldValue {
    /// Coerce to an integer, truncating a fixed-point value.
    pub fn as_integer(self) -> i64 {
        match self {
            Self::Integer(v) => v,
            Self::Fixed(f) => i64::from(f.to_int()),
        }
    }

    /// Coerce to fixed point, converting from a whole integer.
    pub fn as_fixed(self) -> Fixed {
        match self {
            Self::Fixed(f) => f,
            Self::Integer(v) => Fixed::from_int(v as i32),
        }
    }
}

impl EventPayload {
    /// Read one typed field. `event_type` is the owning node's tag, used to
    /// report precise errors for keys that do not apply.
    pub fn field(&self, event_type: EventType, key: EventField) -> Result<FieldValue, CodecError> {
        let not_applicable = || CodecError::FieldNotApplicable {
            field: key,
            event_type,
        };

        let value = match (self, key) {
            (Self::Axis(a), EventField::AxisX) => FieldValue::Fixed(a.x),
            (Self::Axis(a), EventField::AxisY) => FieldValue::Fixed(a.y),
            (Self::Axis(a), EventField::AxisZ) => FieldValue::Fixed(a.z),
            (Self::Button { mask, .. }, EventField::ButtonMask) => {
                FieldValue::Integer(i64::from(*mask))
            }
            (Self::Button { number, .. }, EventField::ButtonNumber) => {
                FieldValue::Integer(i64::from(*number))
            }
            (Self::Button { click_count, .. }, EventField::ButtonClickCount) => {
                FieldValue::Integer(i64::from(*click_count))
            }
            (Self::Button { pressed, .. }, EventField::ButtonPressed) => {
                FieldValue::Integer(i64::from(*pressed))
            }
            (Self::Keyboard { usage_page, .. }, EventField::KeyboardUsagePage) => {
                FieldValue::Integer(i64::from(*usage_page))
            }
            (Self::Keyboard { usage, .. }, EventField::KeyboardUsage) => {
                FieldValue::Integer(i64::from(*usage))
            }
            (Self::Keyboard { down, .. }, EventField::KeyboardDown) => {
                FieldValue::Integer(i64::from(*down))
            }
            (Self::Temperature { level }, EventField::TemperatureLevel) => {
                FieldValue::Fixed(*level)
            }
            (Self::AmbientLight { level, .. }, EventField::LightLevel) => {
                FieldValue::Integer(i64::from(*level))
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel0) => {
                FieldValue::Integer(i64::from(channels[0]))
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel1) => {
                FieldValue::Integer(i64::from(channels[1]))
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel2) => {
                FieldValue::Integer(i64::from(channels[2]))
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel3) => {
                FieldValue::Integer(i64::from(channels[3]))
            }
            (Self::Proximity { detection_mask, .. }, EventField::ProximityDetectionMask) => {
                FieldValue::Integer(i64::from(*detection_mask))
            }
            (Self::Proximity { level, .. }, EventField::ProximityLevel) => {
                FieldValue::Integer(i64::from(*level))
            }
            (Self::Vendor { usage_page, .. }, EventField::VendorUsagePage) => {
                FieldValue::Integer(i64::from(*usage_page))
            }
            (Self::Vendor { usage, .. }, EventField::VendorUsage) => {
                FieldValue::Integer(i64::from(*usage))
            }
            (Self::Vendor { version, .. }, EventField::VendorVersion) => {
                FieldValue::Integer(i64::from(*version))
            }
            (Self::Vendor { length, .. }, EventField::VendorLength) => {
                FieldValue::Integer(i64::from(*length))
            }
            _ => return Err(not_applicable()),
        };

        Ok(value)
    }

    /// Write one typed field. Fails without side effects if the key does not
    /// apply to this payload's type.
    pub fn set_field(
        &mut self,
        event_type: EventType,
        key: EventField,
        value: FieldValue,
    ) -> Result<(), CodecError> {
        let not_applicable = || CodecError::FieldNotApplicable {
            field: key,
            event_type,
        };

        match (self, key) {
            (Self::Axis(a), EventField::AxisX) => a.x = value.as_fixed(),
            (Self::Axis(a), EventField::AxisY) => a.y = value.as_fixed(),
            (Self::Axis(a), EventField::AxisZ) => a.z = value.as_fixed(),
            (Self::Button { mask, .. }, EventField::ButtonMask) => {
                *mask = value.as_integer() as u32
            }
            (Self::Button { number, .. }, EventField::ButtonNumber) => {
                *number = value.as_integer() as u32
            }
            (Self::Button { click_count, .. }, EventField::ButtonClickCount) => {
                *click_count = value.as_integer() as u32
            }
            (Self::Button { pressed, .. }, EventField::ButtonPressed) => {
                *pressed = value.as_integer() != 0
            }
            (Self::Keyboard { usage_page, .. }, EventField::KeyboardUsagePage) => {
                *usage_page = value.as_integer() as u32
            }
            (Self::Keyboard { usage, .. }, EventField::KeyboardUsage) => {
                *usage = value.as_integer() as u32
            }
            (Self::Keyboard { down, .. }, EventField::KeyboardDown) => {
                *down = value.as_integer() != 0
            }
            (Self::Temperature { level }, EventField::TemperatureLevel) => {
                *level = value.as_fixed()
            }
            (Self::AmbientLight { level, .. }, EventField::LightLevel) => {
                *level = value.as_integer() as u32
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel0) => {
                channels[0] = value.as_integer() as u32
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel1) => {
                channels[1] = value.as_integer() as u32
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel2) => {
                channels[2] = value.as_integer() as u32
            }
            (Self::AmbientLight { channels, .. }, EventField::LightChannel3) => {
                channels[3] = value.as_integer() as u32
            }
            (Self::Proximity { detection_mask, .. }, EventField::ProximityDetectionMask) => {
                *detection_mask = value.as_integer() as u32
            }
            (Self::Proximity { level, .. }, EventField::ProximityLevel) => {
                *level = value.as_integer() as u32
            }
            (Self::Vendor { usage_page, .. }, EventField::VendorUsagePage) => {
                *usage_page = value.as_integer() as u32
            }
            (Self::Vendor { usage, .. }, EventField::VendorUsage) => {
                *usage = value.as_integer() as u32
            }
            (Self::Vendor { version, .. }, EventField::VendorVersion) => {
                *version = value.as_integer() as u32
            }
            // VendorLength is set by the factory and fixed thereafter.
            _ => return Err(not_applicable()),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in 0..14 {
            let ty = EventType::from_tag(tag).expect("tag in closed set");
            assert_eq!(ty.tag(), tag);
        }
        assert!(EventType::from_tag(14).is_none());
        assert!(EventType::from_tag(u32::MAX).is_none());
    }

    #[test]
    fn test_payload_size_is_fixed_per_type() {
        assert_eq!(EventType::Translation.payload_size(), 12);
        assert_eq!(EventType::Button.payload_size(), 16);
        assert_eq!(EventType::AmbientLight.payload_size(), 20);
        assert_eq!(EventType::Vendor.payload_size(), 16 + MAX_VENDOR_DATA);
    }

    #[test]
    fn test_payload_write_read_round_trip() {
        let payload = EventPayload::Button {
            mask: 0b101,
            number: 2,
            click_count: 1,
            pressed: true,
        };
        let mut buf = vec![0u8; EventType::Button.payload_size()];
        payload.write_to(&mut buf);
        let decoded = EventPayload::read_from(EventType::Button, &buf).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_axis_payload_round_trip() {
        let payload = EventPayload::Axis(AxisData::new(
            Fixed::from_f64(1.5),
            Fixed::from_f64(-0.25),
            Fixed::ZERO,
        ));
        let mut buf = vec![0u8; EventType::Gyro.payload_size()];
        payload.write_to(&mut buf);
        let decoded = EventPayload::read_from(EventType::Gyro, &buf).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_read_truncated_payload() {
        let err = EventPayload::read_from(EventType::Button, &[0u8; 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: 16, have: 3 }));
    }

    #[test]
    fn test_field_access() {
        let payload = EventPayload::Axis(AxisData::new(
            Fixed::from_int(3),
            Fixed::from_int(4),
            Fixed::from_int(5),
        ));
        let x = payload.field(EventType::Scroll, EventField::AxisX).unwrap();
        assert_eq!(x.as_integer(), 3);

        let err = payload
            .field(EventType::Scroll, EventField::ButtonMask)
            .unwrap_err();
        assert!(matches!(err, CodecError::FieldNotApplicable { .. }));
    }

    #[test]
    fn test_set_field() {
        let mut payload = EventPayload::Keyboard {
            usage_page: 7,
            usage: 4,
            down: false,
        };
        payload
            .set_field(
                EventType::Keyboard,
                EventField::KeyboardDown,
                FieldValue::Integer(1),
            )
            .unwrap();
        assert_eq!(
            payload
                .field(EventType::Keyboard, EventField::KeyboardDown)
                .unwrap()
                .as_integer(),
            1
        );
    }
}

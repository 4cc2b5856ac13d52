// SPDX-License-Identifier: Apache-2.0

//! Wire codec for event records.
//!
//! A record is encoded depth-first: a fixed 32-byte node header, the node's
//! fixed payload, then each child subtree in append order. The header carries
//! the subtree's total encoded length, so a reader can skip a subtree without
//! understanding its payload, and the whole blob is self-describing.
//!
//! Wire layout per node (little endian):
//!
//! ```text
//! offset  size  field
//!      0     4  type tag
//!      4     4  subtree encoded length
//!      8     4  type mask (own | descendants)
//!     12     4  phase bits
//!     16     4  option bits
//!     20     4  child count
//!     24     8  timestamp (nanoseconds)
//!     32     -  fixed payload, then children
//! ```

use crate::error::CodecError;
use crate::event::payload::{EventOptions, EventPayload, EventPhase, EventType};
use crate::event::record::{Event, EventNode, MAX_EVENT_DEPTH};
use crate::types::Timestamp;

/// Size of the per-node wire header.
pub const NODE_HEADER_SIZE: usize = 32;

impl Event {
    /// Total encoded length of this record, a pure function of the type tags
    /// and the child list. Stable across calls absent mutation; the queue
    /// relies on that to size an enqueue exactly once.
    pub fn encoded_length(&self) -> Result<usize, CodecError> {
        self.subtree_len(Self::ROOT)
    }

    fn subtree_len(&self, index: usize) -> Result<usize, CodecError> {
        let node = &self.nodes[index];
        let mut total = NODE_HEADER_SIZE
            .checked_add(node.event_type.payload_size())
            .ok_or(CodecError::ArithmeticOverflow {
                operation: "node length",
            })?;

        for &child in &node.children {
            total = total
                .checked_add(self.subtree_len(child)?)
                .ok_or(CodecError::ArithmeticOverflow {
                    operation: "subtree length",
                })?;
        }

        Ok(total)
    }

    /// Serialize depth-first into `out`. Returns the number of bytes written,
    /// which always equals `encoded_length()`. Fails without writing if `out`
    /// is too small.
    pub fn serialize(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let needed = self.encoded_length()?;
        if out.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                have: out.len(),
            });
        }

        let written = self.write_node(Self::ROOT, out, 0)?;
        debug_assert_eq!(written, needed);
        Ok(written)
    }

    fn write_node(&self, index: usize, out: &mut [u8], at: usize) -> Result<usize, CodecError> {
        let node = &self.nodes[index];
        let subtree_len = self.subtree_len(index)?;

        let header = &mut out[at..at + NODE_HEADER_SIZE];
        header[0..4].copy_from_slice(&node.event_type.tag().to_le_bytes());
        header[4..8].copy_from_slice(&(subtree_len as u32).to_le_bytes());
        header[8..12].copy_from_slice(&node.type_mask.to_le_bytes());
        header[12..16].copy_from_slice(&node.phase.bits().to_le_bytes());
        header[16..20].copy_from_slice(&node.options.bits().to_le_bytes());
        header[20..24].copy_from_slice(&(node.children.len() as u32).to_le_bytes());
        header[24..32].copy_from_slice(&node.timestamp.as_nanos().to_le_bytes());

        let payload_size = node.event_type.payload_size();
        node.payload
            .write_to(&mut out[at + NODE_HEADER_SIZE..at + NODE_HEADER_SIZE + payload_size]);

        let mut cursor = at + NODE_HEADER_SIZE + payload_size;
        for &child in &node.children {
            cursor += self.write_node(child, out, cursor)?;
        }

        Ok(cursor - at)
    }

    /// Reconstruct a record from its encoded bytes. Validates that the
    /// declared subtree length matches the bytes actually consumed and that
    /// the declared type mask matches the recomputed one; fails with a format
    /// error on truncation or an unrecognized type tag.
    pub fn deserialize(bytes: &[u8]) -> Result<Event, CodecError> {
        let mut nodes = Vec::new();
        let (_, consumed) = parse_node(bytes, 0, &mut nodes, None, 1)?;

        // Trailing garbage after the root subtree is a framing error.
        if consumed != bytes.len() {
            return Err(CodecError::LengthMismatch {
                declared: consumed,
                consumed: bytes.len(),
            });
        }

        Ok(Event { nodes })
    }
}

/// Parse one node subtree starting at `at`. Appends nodes to `arena` in
/// depth-first pre-order and returns (arena index, bytes consumed).
fn parse_node(
    bytes: &[u8],
    at: usize,
    arena: &mut Vec<EventNode>,
    parent: Option<usize>,
    depth: usize,
) -> Result<(usize, usize), CodecError> {
    // Nesting is capped before recursing, so a hostile blob cannot drive
    // the parse off the stack.
    if depth > MAX_EVENT_DEPTH {
        return Err(CodecError::DepthExceeded {
            depth,
            max: MAX_EVENT_DEPTH,
        });
    }

    let remaining = bytes.len().saturating_sub(at);
    if remaining < NODE_HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: NODE_HEADER_SIZE,
            have: remaining,
        });
    }

    let header = &bytes[at..at + NODE_HEADER_SIZE];
    let u32_at = |offset: usize| u32::from_le_bytes(header[offset..offset + 4].try_into().unwrap());

    let tag = u32_at(0);
    let event_type = EventType::from_tag(tag).ok_or(CodecError::UnknownType { tag })?;
    let declared_len = u32_at(4) as usize;
    let declared_mask = u32_at(8);
    let phase = EventPhase::from_bits_truncate(u32_at(12));
    let options = EventOptions::from_bits_truncate(u32_at(16));
    let child_count = u32_at(20) as usize;
    let timestamp = Timestamp::from_nanos(u64::from_le_bytes(header[24..32].try_into().unwrap()));

    // A child costs at least a header; reject absurd counts before recursing.
    if child_count > remaining / NODE_HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: child_count * NODE_HEADER_SIZE,
            have: remaining,
        });
    }

    let payload_size = event_type.payload_size();
    if remaining < NODE_HEADER_SIZE + payload_size {
        return Err(CodecError::Truncated {
            needed: NODE_HEADER_SIZE + payload_size,
            have: remaining,
        });
    }

    let payload = EventPayload::read_from(
        event_type,
        &bytes[at + NODE_HEADER_SIZE..at + NODE_HEADER_SIZE + payload_size],
    )?;

    let index = arena.len();
    arena.push(EventNode {
        event_type,
        timestamp,
        phase,
        options,
        type_mask: event_type.type_mask(),
        payload,
        children: Vec::with_capacity(child_count),
        parent,
    });

    let mut consumed = NODE_HEADER_SIZE + payload_size;
    let mut mask = event_type.type_mask();

    for _ in 0..child_count {
        let (child_index, child_consumed) =
            parse_node(bytes, at + consumed, arena, Some(index), depth + 1)?;
        mask |= arena[child_index].type_mask;
        arena[index].children.push(child_index);
        consumed += child_consumed;
    }

    if consumed != declared_len {
        return Err(CodecError::LengthMismatch {
            declared: declared_len,
            consumed,
        });
    }

    if mask != declared_mask {
        return Err(CodecError::MaskMismatch {
            declared: declared_mask,
            computed: mask,
        });
    }

    arena[index].type_mask = mask;
    Ok((index, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload::EventField;
    use crate::types::Fixed;

    fn ts(n: u64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    fn composite_pointer() -> Event {
        let mut pointer = Event::translation(
            ts(1_000),
            Fixed::from_f64(0.5),
            Fixed::from_f64(-1.25),
            Fixed::ZERO,
        )
        .with_phase(EventPhase::CHANGED);
        pointer.append_child(Event::button(ts(1_000), 0b1, 0, 1, true)).unwrap();
        pointer.append_child(Event::scroll(ts(1_000), Fixed::ZERO, Fixed::ONE, Fixed::ZERO)).unwrap();
        pointer
    }

    #[test]
    fn test_round_trip_single_node() {
        let e = Event::keyboard(ts(42), 7, 4, true).with_options(EventOptions::FORCE_NOTIFY);
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        let written = e.serialize(&mut buf).unwrap();
        assert_eq!(written, buf.len());

        let decoded = Event::deserialize(&buf).unwrap();
        assert_eq!(decoded, e);
        assert_eq!(decoded.options(), EventOptions::FORCE_NOTIFY);
    }

    #[test]
    fn test_round_trip_composite() {
        let e = composite_pointer();
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        e.serialize(&mut buf).unwrap();

        let decoded = Event::deserialize(&buf).unwrap();
        assert_eq!(decoded, e);
        assert_eq!(decoded.type_mask(), e.type_mask());
        assert_eq!(decoded.node_count(), 3);

        // Children are reconstructed in append order.
        let button = decoded.find_event(EventType::Button).unwrap();
        assert_eq!(decoded.field_at(button, EventField::ButtonMask).unwrap().as_integer(), 1);
    }

    #[test]
    fn test_encoded_length_stability() {
        let e = composite_pointer();
        let first = e.encoded_length().unwrap();
        let second = e.encoded_length().unwrap();
        assert_eq!(first, second);

        let mut buf = vec![0u8; first];
        assert_eq!(e.serialize(&mut buf).unwrap(), first);
    }

    #[test]
    fn test_encoded_length_grows_by_child() {
        let mut e = Event::translation(ts(1), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let before = e.encoded_length().unwrap();
        let child = Event::button(ts(1), 1, 0, 1, true);
        let child_len = child.encoded_length().unwrap();
        e.append_child(child).unwrap();
        assert_eq!(e.encoded_length().unwrap(), before + child_len);
    }

    #[test]
    fn test_serialize_buffer_too_small() {
        let e = composite_pointer();
        let needed = e.encoded_length().unwrap();
        let mut buf = vec![0u8; needed - 1];
        let err = e.serialize(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_deserialize_truncated() {
        let e = composite_pointer();
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        e.serialize(&mut buf).unwrap();

        let err = Event::deserialize(&buf[..buf.len() - 8]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Truncated { .. } | CodecError::LengthMismatch { .. }
        ));
    }

    #[test]
    fn test_deserialize_unknown_tag() {
        let e = Event::keyboard(ts(1), 7, 4, false);
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        e.serialize(&mut buf).unwrap();

        buf[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        let err = Event::deserialize(&buf).unwrap_err();
        assert!(matches!(err, CodecError::UnknownType { tag: 0xdead_beef }));
    }

    #[test]
    fn test_deserialize_length_mismatch() {
        let e = Event::keyboard(ts(1), 7, 4, false);
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        e.serialize(&mut buf).unwrap();

        // Corrupt the declared subtree length.
        buf[4..8].copy_from_slice(&9999u32.to_le_bytes());
        let err = Event::deserialize(&buf).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }

    #[test]
    fn test_deserialize_mask_mismatch() {
        let e = Event::keyboard(ts(1), 7, 4, false);
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        e.serialize(&mut buf).unwrap();

        buf[8..12].copy_from_slice(&0xffff_ffffu32.to_le_bytes());
        let err = Event::deserialize(&buf).unwrap_err();
        assert!(matches!(err, CodecError::MaskMismatch { .. }));
    }

    #[test]
    fn test_deserialize_rejects_trailing_garbage() {
        let e = Event::keyboard(ts(1), 7, 4, false);
        let len = e.encoded_length().unwrap();
        let mut buf = vec![0u8; len + 4];
        e.serialize(&mut buf[..len]).unwrap();

        let err = Event::deserialize(&buf).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }

    /// Hand-built blob of single-child keyboard nodes nested `depth` deep.
    fn nested_keyboard_blob(depth: usize) -> Vec<u8> {
        let node_size = NODE_HEADER_SIZE + EventType::Keyboard.payload_size();
        let total = node_size * depth;
        let mut buf = vec![0u8; total];
        let mask = EventType::Keyboard.type_mask();

        for level in 0..depth {
            let at = level * node_size;
            let subtree = (total - at) as u32;
            let children: u32 = if level + 1 < depth { 1 } else { 0 };
            buf[at..at + 4].copy_from_slice(&EventType::Keyboard.tag().to_le_bytes());
            buf[at + 4..at + 8].copy_from_slice(&subtree.to_le_bytes());
            buf[at + 8..at + 12].copy_from_slice(&mask.to_le_bytes());
            buf[at + 20..at + 24].copy_from_slice(&children.to_le_bytes());
        }

        buf
    }

    #[test]
    fn test_deserialize_depth_cap() {
        let at_cap = nested_keyboard_blob(MAX_EVENT_DEPTH);
        let decoded = Event::deserialize(&at_cap).unwrap();
        assert_eq!(decoded.node_count(), MAX_EVENT_DEPTH);

        let over = nested_keyboard_blob(MAX_EVENT_DEPTH + 1);
        let err = Event::deserialize(&over).unwrap_err();
        assert!(matches!(err, CodecError::DepthExceeded { .. }));
    }

    #[test]
    fn test_vendor_round_trip() {
        let data = [0x11u8, 0x22, 0x33, 0x44, 0x55];
        let e = Event::vendor(ts(9), 0xff00, 0x42, 1, &data).unwrap();
        let mut buf = vec![0u8; e.encoded_length().unwrap()];
        e.serialize(&mut buf).unwrap();

        let decoded = Event::deserialize(&buf).unwrap();
        assert_eq!(decoded, e);
        assert_eq!(decoded.field(EventField::VendorLength).unwrap().as_integer(), 5);
    }
}

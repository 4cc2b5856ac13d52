// SPDX-License-Identifier: Apache-2.0

//! Arena-backed event records.
//!
//! A composite event is a tree of typed nodes stored in one flat arena
//! (`Vec<EventNode>`, root at index 0). Children are referenced by integer
//! index and carry a non-owning parent back-reference, so there are no
//! reference cycles and serialization is a linear depth-first walk.

use crate::error::CodecError;
use crate::event::payload::{
    AxisData, EventField, EventOptions, EventPayload, EventPhase, EventType, FieldValue,
    MAX_VENDOR_DATA,
};
use crate::types::{Fixed, Timestamp};

/// Maximum nesting depth of an event tree, counted in nodes from the root.
///
/// Composite input events are shallow in practice; the cap keeps the
/// recursive encode and decode walks on a small, known stack and lets a
/// hostile wire blob be rejected instead of exhausting it.
pub const MAX_EVENT_DEPTH: usize = 64;

/// One node of an event tree.
#[derive(Debug, Clone)]
pub struct EventNode {
    pub(crate) event_type: EventType,
    pub(crate) timestamp: Timestamp,
    pub(crate) phase: EventPhase,
    pub(crate) options: EventOptions,
    /// Own type bit OR'd with the mask of every descendant.
    pub(crate) type_mask: u32,
    pub(crate) payload: EventPayload,
    pub(crate) children: Vec<usize>,
    /// Non-owning back-reference; never used to extend lifetime.
    pub(crate) parent: Option<usize>,
}

impl EventNode {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn phase(&self) -> EventPhase {
        self.phase
    }

    pub fn options(&self) -> EventOptions {
        self.options
    }

    pub fn type_mask(&self) -> u32 {
        self.type_mask
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }
}

/// A typed event record, possibly composite.
///
/// Owned exclusively by the producer until serialized into a queue, and
/// exclusively by the consumer once reconstructed from queue bytes.
#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) nodes: Vec<EventNode>,
}

impl Event {
    /// Index of the root node.
    pub const ROOT: usize = 0;

    /// Create a single-node event. Fails if the payload shape does not match
    /// the type tag.
    pub fn new(
        event_type: EventType,
        timestamp: Timestamp,
        payload: EventPayload,
    ) -> Result<Self, CodecError> {
        if !payload.matches(event_type) {
            return Err(CodecError::UnknownType {
                tag: event_type.tag(),
            });
        }

        Ok(Self {
            nodes: vec![EventNode {
                event_type,
                timestamp,
                phase: EventPhase::empty(),
                options: EventOptions::empty(),
                type_mask: event_type.type_mask(),
                payload,
                children: Vec::new(),
                parent: None,
            }],
        })
    }

    fn axis(event_type: EventType, timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        // Payload shape always matches for the axis constructors.
        Self::new(
            event_type,
            timestamp,
            EventPayload::Axis(AxisData::new(x, y, z)),
        )
        .expect("axis payload matches axis type")
    }

    pub fn translation(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Translation, timestamp, x, y, z)
    }

    pub fn rotation(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Rotation, timestamp, x, y, z)
    }

    pub fn scroll(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Scroll, timestamp, x, y, z)
    }

    pub fn velocity(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Velocity, timestamp, x, y, z)
    }

    pub fn orientation(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Orientation, timestamp, x, y, z)
    }

    pub fn accelerometer(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Accelerometer, timestamp, x, y, z)
    }

    pub fn gyro(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Gyro, timestamp, x, y, z)
    }

    pub fn compass(timestamp: Timestamp, x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self::axis(EventType::Compass, timestamp, x, y, z)
    }

    pub fn button(
        timestamp: Timestamp,
        mask: u32,
        number: u32,
        click_count: u32,
        pressed: bool,
    ) -> Self {
        Self::new(
            EventType::Button,
            timestamp,
            EventPayload::Button {
                mask,
                number,
                click_count,
                pressed,
            },
        )
        .expect("button payload matches button type")
    }

    pub fn keyboard(timestamp: Timestamp, usage_page: u32, usage: u32, down: bool) -> Self {
        Self::new(
            EventType::Keyboard,
            timestamp,
            EventPayload::Keyboard {
                usage_page,
                usage,
                down,
            },
        )
        .expect("keyboard payload matches keyboard type")
    }

    pub fn temperature(timestamp: Timestamp, level: Fixed) -> Self {
        Self::new(
            EventType::Temperature,
            timestamp,
            EventPayload::Temperature { level },
        )
        .expect("temperature payload matches temperature type")
    }

    pub fn ambient_light(timestamp: Timestamp, level: u32, channels: [u32; 4]) -> Self {
        Self::new(
            EventType::AmbientLight,
            timestamp,
            EventPayload::AmbientLight { level, channels },
        )
        .expect("ambient light payload matches ambient light type")
    }

    pub fn proximity(timestamp: Timestamp, detection_mask: u32, level: u32) -> Self {
        Self::new(
            EventType::Proximity,
            timestamp,
            EventPayload::Proximity {
                detection_mask,
                level,
            },
        )
        .expect("proximity payload matches proximity type")
    }

    /// Vendor-defined event carrying raw bytes. Fails if `data` exceeds the
    /// type's fixed maximum.
    pub fn vendor(
        timestamp: Timestamp,
        usage_page: u32,
        usage: u32,
        version: u32,
        data: &[u8],
    ) -> Result<Self, CodecError> {
        if data.len() > MAX_VENDOR_DATA {
            return Err(CodecError::VendorPayloadTooLarge {
                size: data.len(),
                max: MAX_VENDOR_DATA,
            });
        }

        let mut buf = [0u8; MAX_VENDOR_DATA];
        buf[..data.len()].copy_from_slice(data);

        Self::new(
            EventType::Vendor,
            timestamp,
            EventPayload::Vendor {
                usage_page,
                usage,
                version,
                length: data.len() as u32,
                data: buf,
            },
        )
    }

    /// Set gesture phase bits on the root node.
    pub fn with_phase(mut self, phase: EventPhase) -> Self {
        self.nodes[Self::ROOT].phase = phase;
        self
    }

    /// Set delivery hint options on the root node.
    pub fn with_options(mut self, options: EventOptions) -> Self {
        self.nodes[Self::ROOT].options = options;
        self
    }

    /// Root node accessor shortcuts.
    pub fn event_type(&self) -> EventType {
        self.nodes[Self::ROOT].event_type
    }

    pub fn timestamp(&self) -> Timestamp {
        self.nodes[Self::ROOT].timestamp
    }

    pub fn phase(&self) -> EventPhase {
        self.nodes[Self::ROOT].phase
    }

    pub fn options(&self) -> EventOptions {
        self.nodes[Self::ROOT].options
    }

    /// Own type bit OR'd with every descendant's mask.
    pub fn type_mask(&self) -> u32 {
        self.nodes[Self::ROOT].type_mask
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Borrow a node by arena index.
    pub fn node(&self, index: usize) -> Result<&EventNode, CodecError> {
        self.nodes.get(index).ok_or(CodecError::IndexOutOfBounds {
            index,
            len: self.nodes.len(),
        })
    }

    /// Nesting depth of this tree: 1 for a single node.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(Self::ROOT, 1usize)];
        while let Some((index, depth)) = stack.pop() {
            max = max.max(depth);
            for &child in &self.nodes[index].children {
                stack.push((child, depth + 1));
            }
        }
        max
    }

    /// Append `child` under the node at `parent_index`, preserving append
    /// order. The child's arena is merged with index remapping, and the
    /// child's type mask is OR-propagated up the ancestor chain. Fails when
    /// the combined tree would exceed `MAX_EVENT_DEPTH`.
    ///
    /// Returns the arena index of the appended child's root.
    pub fn append_child_at(
        &mut self,
        parent_index: usize,
        child: Event,
    ) -> Result<usize, CodecError> {
        if parent_index >= self.nodes.len() {
            return Err(CodecError::IndexOutOfBounds {
                index: parent_index,
                len: self.nodes.len(),
            });
        }

        let mut parent_depth = 1;
        let mut current = self.nodes[parent_index].parent;
        while let Some(idx) = current {
            parent_depth += 1;
            current = self.nodes[idx].parent;
        }
        let depth = parent_depth + child.depth();
        if depth > MAX_EVENT_DEPTH {
            return Err(CodecError::DepthExceeded {
                depth,
                max: MAX_EVENT_DEPTH,
            });
        }

        let offset = self.nodes.len();
        let child_mask = child.type_mask();

        for mut node in child.nodes {
            node.children.iter_mut().for_each(|c| *c += offset);
            node.parent = Some(match node.parent {
                Some(p) => p + offset,
                None => parent_index,
            });
            self.nodes.push(node);
        }

        self.nodes[parent_index].children.push(offset);

        // Recompute masks along the ancestor chain.
        let mut current = Some(parent_index);
        while let Some(idx) = current {
            self.nodes[idx].type_mask |= child_mask;
            current = self.nodes[idx].parent;
        }

        Ok(offset)
    }

    /// Append `child` under the root. Fails only on the depth cap.
    pub fn append_child(&mut self, child: Event) -> Result<usize, CodecError> {
        self.append_child_at(Self::ROOT, child)
    }

    /// Find the nearest record of `event_type`: the node itself, then its
    /// descendants depth-first in append order, then the ancestor chain.
    ///
    /// This is how a composite record exposes a sub-event without the caller
    /// knowing the tree shape.
    pub fn find_event_from(&self, start: usize, event_type: EventType) -> Option<usize> {
        if start >= self.nodes.len() {
            return None;
        }

        // Quick reject: the subtree mask says whether the type is below us.
        if self.nodes[start].type_mask & event_type.type_mask() != 0 {
            if let Some(found) = self.find_in_subtree(start, event_type) {
                return Some(found);
            }
        }

        // Walk up: an ancestor itself may match.
        let mut current = self.nodes[start].parent;
        while let Some(idx) = current {
            if self.nodes[idx].event_type == event_type {
                return Some(idx);
            }
            current = self.nodes[idx].parent;
        }

        None
    }

    fn find_in_subtree(&self, index: usize, event_type: EventType) -> Option<usize> {
        if self.nodes[index].event_type == event_type {
            return Some(index);
        }
        for &child in &self.nodes[index].children {
            if let Some(found) = self.find_in_subtree(child, event_type) {
                return Some(found);
            }
        }
        None
    }

    /// Find the nearest record of `event_type` starting at the root.
    pub fn find_event(&self, event_type: EventType) -> Option<usize> {
        self.find_event_from(Self::ROOT, event_type)
    }

    /// Read a typed field from the node at `index`.
    pub fn field_at(&self, index: usize, key: EventField) -> Result<FieldValue, CodecError> {
        let node = self.node(index)?;
        node.payload.field(node.event_type, key)
    }

    /// Read a typed field from the root node.
    pub fn field(&self, key: EventField) -> Result<FieldValue, CodecError> {
        self.field_at(Self::ROOT, key)
    }

    /// Write a typed field on the node at `index`.
    pub fn set_field_at(
        &mut self,
        index: usize,
        key: EventField,
        value: FieldValue,
    ) -> Result<(), CodecError> {
        if index >= self.nodes.len() {
            return Err(CodecError::IndexOutOfBounds {
                index,
                len: self.nodes.len(),
            });
        }
        let event_type = self.nodes[index].event_type;
        self.nodes[index].payload.set_field(event_type, key, value)
    }

    /// Write a typed field on the root node.
    pub fn set_field(&mut self, key: EventField, value: FieldValue) -> Result<(), CodecError> {
        self.set_field_at(Self::ROOT, key, value)
    }

    /// Structural equality of the subtrees rooted at `a` in `self` and `b`
    /// in `other`. Arena index layout is allowed to differ.
    fn subtree_eq(&self, a: usize, other: &Event, b: usize) -> bool {
        let na = &self.nodes[a];
        let nb = &other.nodes[b];

        na.event_type == nb.event_type
            && na.timestamp == nb.timestamp
            && na.phase == nb.phase
            && na.options == nb.options
            && na.type_mask == nb.type_mask
            && na.payload == nb.payload
            && na.children.len() == nb.children.len()
            && na
                .children
                .iter()
                .zip(nb.children.iter())
                .all(|(&ca, &cb)| self.subtree_eq(ca, other, cb))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.subtree_eq(Self::ROOT, other, Self::ROOT)
    }
}

impl Eq for Event {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: u64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    #[test]
    fn test_single_node_mask() {
        let e = Event::keyboard(ts(1), 7, 4, true);
        assert_eq!(e.type_mask(), EventType::Keyboard.type_mask());
        assert_eq!(e.node_count(), 1);
    }

    #[test]
    fn test_append_child_accumulates_mask() {
        let mut pointer = Event::translation(ts(10), Fixed::ONE, Fixed::ZERO, Fixed::ZERO);
        pointer.append_child(Event::button(ts(10), 1, 0, 1, true)).unwrap();
        pointer.append_child(Event::scroll(ts(10), Fixed::ZERO, Fixed::ONE, Fixed::ZERO)).unwrap();

        let expected = EventType::Translation.type_mask()
            | EventType::Button.type_mask()
            | EventType::Scroll.type_mask();
        assert_eq!(pointer.type_mask(), expected);
        assert_eq!(pointer.node_count(), 3);
    }

    #[test]
    fn test_nested_append_propagates_to_ancestors() {
        let mut root = Event::translation(ts(1), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let mid = root.append_child(Event::button(ts(1), 1, 0, 1, true)).unwrap();
        root.append_child_at(mid, Event::keyboard(ts(1), 7, 4, false))
            .unwrap();

        assert_ne!(root.type_mask() & EventType::Keyboard.type_mask(), 0);
        assert_ne!(
            root.node(mid).unwrap().type_mask() & EventType::Keyboard.type_mask(),
            0
        );
    }

    #[test]
    fn test_find_event_in_children() {
        let mut pointer = Event::translation(ts(5), Fixed::ONE, Fixed::ZERO, Fixed::ZERO);
        let button_idx = pointer.append_child(Event::button(ts(5), 0b10, 1, 1, true)).unwrap();

        assert_eq!(pointer.find_event(EventType::Button), Some(button_idx));
        assert_eq!(pointer.find_event(EventType::Translation), Some(Event::ROOT));
        assert_eq!(pointer.find_event(EventType::Gyro), None);
    }

    #[test]
    fn test_find_event_walks_parent_chain() {
        let mut root = Event::translation(ts(5), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let child = root.append_child(Event::button(ts(5), 1, 0, 1, true)).unwrap();

        assert_eq!(
            root.find_event_from(child, EventType::Translation),
            Some(Event::ROOT)
        );
    }

    #[test]
    fn test_vendor_size_limit() {
        let ok = Event::vendor(ts(1), 0xff00, 1, 1, &[0xab; MAX_VENDOR_DATA]);
        assert!(ok.is_ok());

        let err = Event::vendor(ts(1), 0xff00, 1, 1, &[0xab; MAX_VENDOR_DATA + 1]).unwrap_err();
        assert!(matches!(err, CodecError::VendorPayloadTooLarge { .. }));
    }

    #[test]
    fn test_field_round_trip_on_root() {
        let mut e = Event::scroll(ts(2), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        e.set_field(EventField::AxisY, FieldValue::Fixed(Fixed::from_int(7)))
            .unwrap();
        assert_eq!(e.field(EventField::AxisY).unwrap().as_integer(), 7);
    }

    #[test]
    fn test_append_order_is_preserved() {
        let mut root = Event::translation(ts(1), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let a = root.append_child(Event::button(ts(1), 1, 0, 1, true)).unwrap();
        let b = root.append_child(Event::button(ts(1), 2, 1, 1, false)).unwrap();

        assert_eq!(root.node(Event::ROOT).unwrap().children(), &[a, b]);
    }

    #[test]
    fn test_depth_capped_on_append() {
        let mut chain = Event::keyboard(ts(0), 7, 4, false);
        let mut tip = Event::ROOT;
        for i in 1..MAX_EVENT_DEPTH {
            tip = chain
                .append_child_at(tip, Event::keyboard(ts(i as u64), 7, 4, false))
                .unwrap();
        }
        assert_eq!(chain.depth(), MAX_EVENT_DEPTH);

        let err = chain
            .append_child_at(tip, Event::keyboard(ts(99), 7, 4, false))
            .unwrap_err();
        assert!(matches!(err, CodecError::DepthExceeded { .. }));

        // A tree at the cap still encodes.
        let mut buf = vec![0u8; chain.encoded_length().unwrap()];
        chain.serialize(&mut buf).unwrap();
    }

    #[test]
    fn test_deep_child_rejected_under_deep_parent() {
        let mut deep = Event::keyboard(ts(0), 7, 4, false);
        let mut tip = Event::ROOT;
        for i in 1..MAX_EVENT_DEPTH / 2 + 1 {
            tip = deep
                .append_child_at(tip, Event::keyboard(ts(i as u64), 7, 4, false))
                .unwrap();
        }

        let mut subtree = Event::keyboard(ts(100), 7, 4, false);
        let mut sub_tip = Event::ROOT;
        for i in 1..MAX_EVENT_DEPTH / 2 + 1 {
            sub_tip = subtree
                .append_child_at(sub_tip, Event::keyboard(ts(100 + i as u64), 7, 4, false))
                .unwrap();
        }

        // Both halves fit alone, but grafting one under the other's tip
        // would exceed the cap.
        let err = deep.append_child_at(tip, subtree).unwrap_err();
        assert!(matches!(err, CodecError::DepthExceeded { .. }));
    }

    #[test]
    fn test_structural_equality_ignores_arena_layout() {
        // Same logical tree built in two different append sequences.
        let mut left = Event::translation(ts(1), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let mut inner = Event::button(ts(1), 1, 0, 1, true);
        inner.append_child(Event::keyboard(ts(1), 7, 4, true)).unwrap();
        left.append_child(inner).unwrap();

        let mut right = Event::translation(ts(1), Fixed::ZERO, Fixed::ZERO, Fixed::ZERO);
        let btn = right.append_child(Event::button(ts(1), 1, 0, 1, true)).unwrap();
        right
            .append_child_at(btn, Event::keyboard(ts(1), 7, 4, true))
            .unwrap();

        assert_eq!(left, right);
    }
}

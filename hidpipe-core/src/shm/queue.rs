// SPDX-License-Identifier: Apache-2.0

//! EventQueue - lock-free SPSC ring over shared memory.
//!
//! The producer serializes event records into a bounded circular byte buffer
//! and the consumer drains them from its own mapping, with no lock shared
//! between the two sides. head and tail are bounded offsets into the data
//! area (`0 <= head, tail <= capacity`); `head == tail` means exactly
//! "empty", which is why the full check keeps a strict inequality - tail is
//! never allowed to catch up to head while entries remain.
//!
//! Entries are contiguous: an entry that does not fit before the end of the
//! buffer is written at offset 0 instead, with a wrap sentinel left at the
//! old tail (when there is room for one) so a reader scanning forward knows
//! to wrap.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CodecError, HidError, HidResult, QueueError};
use crate::event::{Event, EventOptions};
use crate::shm::SharedMemoryRegion;

/// Size of the shared queue header at the start of the region.
pub const QUEUE_HEADER_SIZE: usize = 16;

/// Per-entry length header (u32).
pub const ENTRY_HEADER_SIZE: usize = 4;

/// Length-field value marking "wrap to offset 0".
const WRAP_SENTINEL: u32 = u32::MAX;

/// Entries start on 4-byte boundaries.
const ENTRY_ALIGNMENT: usize = 4;

/// Smallest useful data capacity.
pub const MIN_CAPACITY: usize = 64;

/// Shared queue header stored at the start of the region.
///
/// head is mutated only by the consumer, tail only by the producer; these
/// are the only two fields requiring atomic access. Entry bytes are written
/// once by the producer and never mutated afterward.
#[repr(C)]
struct QueueHeader {
    /// Next byte to be consumed (owned by consumer).
    head: AtomicU32,
    /// Next byte to be written (owned by producer).
    tail: AtomicU32,
    /// Data area capacity in bytes, written once at creation.
    capacity: AtomicU32,
    /// Reserved padding to keep the data area 16-byte aligned.
    _reserved: u32,
}

/// Per-queue notification behavior, passed in explicitly at construction
/// rather than read from process-wide state.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueOptions {
    /// Notify the consumer on every enqueue.
    pub force_notify: bool,
    /// When an enqueue fills the queue, record a statistic instead of
    /// notifying a consumer that has no room to receive anyway.
    pub suppress_full_notify: bool,
}

/// Fire-and-forget "data available" signal to the consumer. Best-effort and
/// payload-free; lost notifications are tolerated because the queue state
/// transition, not the signal, is the source of truth.
pub trait QueueNotifier: Send + Sync {
    fn notify(&self);
}

/// A notifier that drops every signal. Useful for producer-internal queues
/// and tests that assert on queue state rather than wakeups.
pub struct NullNotifier;

impl QueueNotifier for NullNotifier {
    fn notify(&self) {}
}

/// Producer-side handle to a shared event queue.
pub struct EventQueue {
    region: SharedMemoryRegion,
    /// Creation-time data capacity. The consumer can scribble over the
    /// shared header, so every bounds decision uses this copy and treats a
    /// disagreeing header as corruption.
    capacity: usize,
    options: QueueOptions,
    notifier: Arc<dyn QueueNotifier>,
    /// Monotonically increasing count of notifications actually sent.
    notify_count: AtomicU64,
    /// Full-queue notifications suppressed by `suppress_full_notify`.
    suppressed_full: AtomicU64,
}

impl EventQueue {
    /// Create a queue in a freshly created region, with `capacity` data
    /// bytes. `capacity` must be 4-byte aligned and fit in the region after
    /// the header.
    pub fn create(
        region: SharedMemoryRegion,
        capacity: usize,
        options: QueueOptions,
        notifier: Arc<dyn QueueNotifier>,
    ) -> Result<Self, QueueError> {
        if capacity < MIN_CAPACITY || capacity % ENTRY_ALIGNMENT != 0 {
            return Err(QueueError::RegionTooSmall { size: capacity });
        }
        if region.size() < QUEUE_HEADER_SIZE + capacity {
            return Err(QueueError::RegionTooSmall {
                size: region.size(),
            });
        }

        let queue = Self {
            region,
            capacity,
            options,
            notifier,
            notify_count: AtomicU64::new(0),
            suppressed_full: AtomicU64::new(0),
        };

        // SAFETY: the region was just created and zeroed; we have exclusive
        // access until a consumer maps it.
        unsafe {
            let header = queue.header();
            (*header).head.store(0, Ordering::Release);
            (*header).tail.store(0, Ordering::Release);
            (*header).capacity.store(capacity as u32, Ordering::Release);
        }

        tracing::debug!(
            name = %queue.region.name(),
            capacity = capacity,
            force_notify = options.force_notify,
            suppress_full_notify = options.suppress_full_notify,
            "Created event queue"
        );

        Ok(queue)
    }

    fn header(&self) -> *mut QueueHeader {
        self.region.as_ptr() as *mut QueueHeader
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: QUEUE_HEADER_SIZE is within the region bounds
        unsafe { self.region.as_ptr().add(QUEUE_HEADER_SIZE) }
    }

    /// Data area capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Backing region name, for consumers to map.
    pub fn region_name(&self) -> &str {
        self.region.name()
    }

    /// Total region size a consumer must map.
    pub fn region_size(&self) -> usize {
        self.region.size()
    }

    /// Notifications actually delivered so far.
    pub fn notify_count(&self) -> u64 {
        self.notify_count.load(Ordering::Relaxed)
    }

    /// Full-queue notifications suppressed so far - a backpressure signal
    /// for diagnostics.
    pub fn suppressed_full_count(&self) -> u64 {
        self.suppressed_full.load(Ordering::Relaxed)
    }

    /// Whether the queue currently holds no entries.
    pub fn is_empty(&self) -> bool {
        // SAFETY: header is always mapped
        unsafe {
            let header = self.header();
            (*header).head.load(Ordering::Acquire) == (*header).tail.load(Ordering::Relaxed)
        }
    }

    /// Whether an entry of `entry_size` bytes fits given the observed
    /// cursor positions. Mirrors the placement cases in `enqueue`.
    fn fits(head: usize, tail: usize, capacity: usize, entry_size: usize) -> bool {
        if tail >= head {
            capacity - tail >= entry_size || head > entry_size
        } else {
            head - tail > entry_size
        }
    }

    /// Serialize `event` and publish it to the queue.
    ///
    /// Never blocks; completes in bounded time aside from the O(tree) encode
    /// step. Returns `QueueError::Full` (recoverable, nothing written) when
    /// the entry cannot be placed, codec errors for malformed events, and
    /// `QueueError::CorruptedState` (fatal to the session) when the shared
    /// cursors are out of range.
    pub fn enqueue(&self, event: &Event) -> HidResult<()> {
        let encoded_len = event.encoded_length()?;

        // Steps 1-2: overflow-checked sizing. A size that does not survive
        // alignment is malformed, not a reason to touch the buffer.
        let data_size = encoded_len
            .checked_add(ENTRY_ALIGNMENT - 1)
            .map(|v| v & !(ENTRY_ALIGNMENT - 1))
            .ok_or(HidError::Codec(CodecError::ArithmeticOverflow {
                operation: "entry alignment",
            }))?;
        let entry_size = data_size
            .checked_add(ENTRY_HEADER_SIZE)
            .filter(|&v| v <= u32::MAX as usize)
            .ok_or(HidError::Codec(CodecError::ArithmeticOverflow {
                operation: "entry size",
            }))?;

        // Step 3: snapshot tail (producer-owned) relaxed, then head acquire.
        // Head must be observed no earlier than tail, or the producer could
        // believe there is more free space than truly exists.
        let header = self.header();
        // SAFETY: header is always mapped
        let (tail, head, shared_capacity) = unsafe {
            (
                (*header).tail.load(Ordering::Relaxed) as usize,
                (*header).head.load(Ordering::Acquire) as usize,
                (*header).capacity.load(Ordering::Relaxed) as usize,
            )
        };

        // Step 4: invariant check. The shared header is writable by the
        // consumer, so cursors are validated against the creation-time
        // capacity, never against what the header claims; a rewritten
        // capacity or an out-of-range cursor means the buffer is corrupted
        // and writing anything would make it worse.
        let capacity = self.capacity;
        if shared_capacity != capacity || head > capacity || tail > capacity {
            return Err(QueueError::CorruptedState {
                head: head as u32,
                tail: tail as u32,
                capacity: shared_capacity as u32,
            }
            .into());
        }

        // Step 5: placement.
        let write_at = if tail >= head {
            if capacity - tail >= entry_size {
                tail
            } else if head > entry_size {
                // Doesn't fit at the tail but fits at the front. Leave a
                // sentinel so a forward-scanning reader knows to wrap.
                if capacity - tail >= ENTRY_HEADER_SIZE {
                    // SAFETY: tail + ENTRY_HEADER_SIZE <= capacity, within the
                    // data area.
                    unsafe {
                        let sentinel = self.data_ptr().add(tail) as *mut u32;
                        std::ptr::write_unaligned(sentinel, WRAP_SENTINEL);
                    }
                }
                0
            } else {
                return Err(QueueError::Full { size: entry_size }.into());
            }
        } else {
            // Wrapped: strictly greater, so tail can never equal head while
            // the queue is non-empty.
            if head - tail > entry_size {
                tail
            } else {
                return Err(QueueError::Full { size: entry_size }.into());
            }
        };

        // Header + payload. The entry is contiguous by construction.
        // SAFETY: write_at + entry_size <= capacity in every accepted case.
        unsafe {
            let entry = self.data_ptr().add(write_at);
            std::ptr::write_unaligned(entry as *mut u32, encoded_len as u32);

            let payload =
                std::slice::from_raw_parts_mut(entry.add(ENTRY_HEADER_SIZE), data_size);
            event.serialize(payload)?;
        }

        // Step 6: publish. The release store makes the entry bytes visible
        // to the consumer before it can observe the new tail.
        let new_tail = (write_at + entry_size) as u32;
        // SAFETY: header is always mapped
        unsafe {
            (*header).tail.store(new_tail, Ordering::Release);
        }

        // Step 7: decide whether the consumer may be asleep. If the snapshot
        // already proved the queue empty there is no ambiguity; otherwise a
        // SeqCst fence pairs with the consumer's drain-side fence, and head
        // is re-read to close the missed-wakeup race.
        let became_nonempty = if tail == head {
            true
        } else {
            fence(Ordering::SeqCst);
            // SAFETY: header is always mapped
            let head_now = unsafe { (*header).head.load(Ordering::Relaxed) as usize };
            head_now == tail
        };

        // Step 8: notification policy.
        let head_for_full = if became_nonempty {
            head
        } else {
            // SAFETY: header is always mapped
            unsafe { (*header).head.load(Ordering::Relaxed) as usize }
        };
        let became_full = !Self::fits(head_for_full, new_tail as usize, capacity, entry_size);

        let mut should_notify = became_nonempty
            || self.options.force_notify
            || event.options().contains(EventOptions::FORCE_NOTIFY);

        if !should_notify && became_full {
            if self.options.suppress_full_notify {
                self.suppressed_full.fetch_add(1, Ordering::Relaxed);
            } else {
                should_notify = true;
            }
        }

        // Step 9: per-event veto over all delivery.
        if event.options().contains(EventOptions::SUPPRESS_NOTIFY) {
            should_notify = false;
        }

        if should_notify {
            self.notifier.notify();
            self.notify_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }
}

/// Consumer-side handle: drains published entries from its own mapping of
/// the queue region.
#[derive(Debug)]
pub struct EventQueueReader {
    region: SharedMemoryRegion,
    /// Capacity validated against the mapped size at open. Bounds decisions
    /// use this copy; a header that later disagrees is corruption.
    capacity: usize,
}

impl EventQueueReader {
    /// Open a reader over a mapping of the producer's region.
    ///
    /// The header's capacity is validated against the mapped size here and
    /// pinned: it must fit the region alongside the header, and a later
    /// rewrite of the shared field fails `dequeue` instead of steering reads
    /// out of the mapping.
    pub fn open(region: SharedMemoryRegion) -> Result<Self, QueueError> {
        if region.size() < QUEUE_HEADER_SIZE + MIN_CAPACITY {
            return Err(QueueError::RegionTooSmall {
                size: region.size(),
            });
        }

        let header = region.as_ptr() as *mut QueueHeader;
        // SAFETY: the region is at least QUEUE_HEADER_SIZE bytes
        let (head, tail, capacity) = unsafe {
            (
                (*header).head.load(Ordering::Relaxed),
                (*header).tail.load(Ordering::Relaxed),
                (*header).capacity.load(Ordering::Acquire) as usize,
            )
        };

        if capacity < MIN_CAPACITY
            || capacity % ENTRY_ALIGNMENT != 0
            || QUEUE_HEADER_SIZE + capacity > region.size()
        {
            return Err(QueueError::CorruptedState {
                head,
                tail,
                capacity: capacity as u32,
            });
        }

        Ok(Self { region, capacity })
    }

    fn header(&self) -> *mut QueueHeader {
        self.region.as_ptr() as *mut QueueHeader
    }

    fn data_ptr(&self) -> *const u8 {
        // SAFETY: QUEUE_HEADER_SIZE is within the region bounds
        unsafe { self.region.as_ptr().add(QUEUE_HEADER_SIZE) }
    }

    /// Data area capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the queue currently holds no entries.
    pub fn is_empty(&self) -> bool {
        // SAFETY: header is always mapped
        unsafe {
            let header = self.header();
            (*header).head.load(Ordering::Relaxed) == (*header).tail.load(Ordering::Acquire)
        }
    }

    /// Pop the next entry's raw encoded bytes, or `None` when empty.
    ///
    /// Advances head only past fully-published entries (the acquire load of
    /// tail bounds the scan), and executes the fence paired with the
    /// producer when the pop drains the queue. A malformed entry poisons the
    /// rest of the read pass: the remaining content is discarded and the
    /// error returned, so the reader resynchronizes at the producer's next
    /// entry boundary instead of crashing.
    pub fn dequeue(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let header = self.header();
        // SAFETY: header is always mapped
        let (mut head, tail, shared_capacity) = unsafe {
            (
                (*header).head.load(Ordering::Relaxed) as usize,
                (*header).tail.load(Ordering::Acquire) as usize,
                (*header).capacity.load(Ordering::Relaxed) as usize,
            )
        };

        // Cursors are bounded by the capacity pinned at open, not by the
        // shared field a peer can rewrite.
        let capacity = self.capacity;
        if shared_capacity != capacity || head > capacity || tail > capacity {
            return Err(QueueError::CorruptedState {
                head: head as u32,
                tail: tail as u32,
                capacity: shared_capacity as u32,
            });
        }

        if head == tail {
            return Ok(None);
        }

        // Wrap when the producer could not have placed a header here: either
        // an explicit sentinel, or no room left for even a header.
        let must_wrap = if capacity - head < ENTRY_HEADER_SIZE {
            true
        } else {
            // SAFETY: head + ENTRY_HEADER_SIZE <= capacity
            let len = unsafe {
                std::ptr::read_unaligned(self.data_ptr().add(head) as *const u32)
            };
            len == WRAP_SENTINEL
        };

        if must_wrap {
            head = 0;
            // SAFETY: header is always mapped
            unsafe {
                (*header).head.store(0, Ordering::Release);
            }
            if head == tail {
                // Only the sentinel remained; nothing published past the wrap.
                return Ok(None);
            }
        }

        // SAFETY: head + ENTRY_HEADER_SIZE <= capacity after wrap handling
        let encoded_len =
            unsafe { std::ptr::read_unaligned(self.data_ptr().add(head) as *const u32) } as usize;

        let data_size = (encoded_len + ENTRY_ALIGNMENT - 1) & !(ENTRY_ALIGNMENT - 1);
        let entry_size = ENTRY_HEADER_SIZE + data_size;

        // The entry must lie entirely within the published contiguous span.
        let published = if tail >= head {
            tail - head
        } else {
            capacity - head
        };

        if encoded_len == 0 || entry_size > published {
            // Untrustworthy length: discard this read pass entirely.
            // SAFETY: header is always mapped
            unsafe {
                (*header).head.store(tail as u32, Ordering::Release);
            }
            tracing::warn!(
                offset = head,
                declared = encoded_len,
                published = published,
                "Malformed queue entry; discarding read pass"
            );
            return Err(QueueError::MalformedEntry {
                offset: head as u32,
                reason: format!("declared {} bytes, {} published", encoded_len, published),
            });
        }

        // SAFETY: head + entry_size <= capacity, and the producer published
        // these bytes before the tail we acquired.
        let payload = unsafe {
            std::slice::from_raw_parts(self.data_ptr().add(head + ENTRY_HEADER_SIZE), encoded_len)
                .to_vec()
        };

        let new_head = (head + entry_size) as u32;
        // SAFETY: header is always mapped
        unsafe {
            (*header).head.store(new_head, Ordering::Release);
        }

        // Drained the queue: pair with the producer's enqueue-side fence so
        // neither side misses the empty/non-empty transition.
        if new_head as usize == tail {
            fence(Ordering::SeqCst);
        }

        Ok(Some(payload))
    }

    /// Pop and decode the next event record.
    pub fn dequeue_event(&self) -> HidResult<Option<Event>> {
        match self.dequeue()? {
            Some(bytes) => Ok(Some(Event::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

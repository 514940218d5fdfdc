//! # Frame slot pool
//!
//! A fixed set of slots, each holding a raw staging buffer and a compressed output buffer. All
//! memory is reserved when the pool is created and slots are reused in round-robin order for the
//! lifetime of the pipeline.
//!
//! Slots are shared through reference counting. A [`FrameHandle`] keeps its slot leased, and the
//! producer can only get write access to a slot once every handle to it has been dropped, so a
//! frame being read by a stream client is never overwritten underneath it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use comms_if::eqpt::cam::{FrameFormat, Geometry};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One reusable raw + compressed buffer pair and the metadata of the frame it holds.
pub struct FrameSlot {
    index: usize,

    raw: Box<[u8]>,

    /// Number of bytes of `raw` holding the staged frame
    raw_len: usize,

    compressed: Box<[u8]>,

    /// Number of bytes of `compressed` holding the encoded frame
    length: usize,

    geometry: Geometry,

    format: FrameFormat,

    /// Capture sequence number of the frame, starting at 1. Zero if the slot was never written.
    sequence: u64,
}

/// The pool of frame slots, owned by the producer.
pub struct FramePool {
    slots: Vec<Arc<FrameSlot>>,
    next: usize,
    raw_capacity: usize,
    compressed_capacity: usize,
}

/// A read-only lease on a slot holding an encoded frame.
///
/// Handles cannot be cloned, each one is created by the producer for exactly one queue entry.
pub struct FrameHandle(Arc<FrameSlot>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    #[error("A frame pool must contain at least one slot")]
    Empty,

    #[error("Slot buffers must have a non-zero capacity")]
    ZeroCapacity,

    #[error("Could not reserve {bytes} bytes for slot {index}")]
    AllocFailed { index: usize, bytes: usize },

    #[error("Slot {0} does not exist")]
    NoSuchSlot(usize),

    #[error("Slot {0} is still leased by the queue or a stream client")]
    SlotLeased(usize),

    #[error("Raw frame of {len} bytes does not fit the {capacity} byte staging buffer")]
    RawTooLarge { len: usize, capacity: usize },

    #[error("Encoded length {len} exceeds the {capacity} byte compressed buffer")]
    LengthExceedsCapacity { len: usize, capacity: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FramePool {
    /// Allocate a pool of `num_slots` slots.
    ///
    /// Fails if `num_slots` or either capacity is zero, or if the memory cannot be reserved.
    pub fn new(
        num_slots: usize,
        raw_capacity: usize,
        compressed_capacity: usize,
    ) -> Result<Self, PoolError> {
        if num_slots == 0 {
            return Err(PoolError::Empty);
        }
        if raw_capacity == 0 || compressed_capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        let mut slots = Vec::with_capacity(num_slots);
        for index in 0..num_slots {
            slots.push(Arc::new(FrameSlot {
                index,
                raw: alloc_buffer(index, raw_capacity)?,
                raw_len: 0,
                compressed: alloc_buffer(index, compressed_capacity)?,
                length: 0,
                geometry: Geometry::default(),
                format: FrameFormat::Jpeg,
                sequence: 0,
            }));
        }

        Ok(Self {
            slots,
            next: 0,
            raw_capacity,
            compressed_capacity,
        })
    }

    /// Number of slots in the pool.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false, a pool cannot be created empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn raw_capacity(&self) -> usize {
        self.raw_capacity
    }

    pub fn compressed_capacity(&self) -> usize {
        self.compressed_capacity
    }

    /// Return the index of the next slot in cyclic order, wrapping after `len()` calls.
    pub fn next_slot_round_robin(&mut self) -> usize {
        let index = self.next;
        self.next = (self.next + 1) % self.slots.len();
        index
    }

    /// Get write access to a slot, only possible while no handle to it exists.
    pub fn writable(&mut self, index: usize) -> Result<&mut FrameSlot, PoolError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PoolError::NoSuchSlot(index))?;

        Arc::get_mut(slot).ok_or(PoolError::SlotLeased(index))
    }

    /// True if a handle to the slot is alive.
    pub fn is_leased(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map(|s| Arc::strong_count(s) > 1)
            .unwrap_or(false)
    }

    /// Create a read-only handle to a slot.
    pub fn handle(&self, index: usize) -> Result<FrameHandle, PoolError> {
        self.slots
            .get(index)
            .map(|s| FrameHandle(Arc::clone(s)))
            .ok_or(PoolError::NoSuchSlot(index))
    }
}

impl FrameSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The encoded frame.
    pub fn data(&self) -> &[u8] {
        &self.compressed[..self.length]
    }

    /// Length of the encoded frame in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn compressed_capacity(&self) -> usize {
        self.compressed.len()
    }

    /// Copy a raw frame into the staging buffer.
    pub fn stage(&mut self, raw: &[u8]) -> Result<(), PoolError> {
        let capacity = self.raw.len();
        if raw.len() > capacity {
            return Err(PoolError::RawTooLarge {
                len: raw.len(),
                capacity,
            });
        }

        self.raw[..raw.len()].copy_from_slice(raw);
        self.raw_len = raw.len();
        Ok(())
    }

    /// The staged raw frame and the whole compressed buffer, for the encoder.
    pub fn buffers_mut(&mut self) -> (&[u8], &mut [u8]) {
        (&self.raw[..self.raw_len], &mut self.compressed[..])
    }

    /// Record the metadata of a frame just encoded into the compressed buffer.
    pub fn commit(
        &mut self,
        length: usize,
        geometry: Geometry,
        format: FrameFormat,
        sequence: u64,
    ) -> Result<(), PoolError> {
        if length > self.compressed.len() {
            return Err(PoolError::LengthExceedsCapacity {
                len: length,
                capacity: self.compressed.len(),
            });
        }

        self.length = length;
        self.geometry = geometry;
        self.format = format;
        self.sequence = sequence;
        Ok(())
    }
}

impl Deref for FrameHandle {
    type Target = FrameSlot;

    fn deref(&self) -> &FrameSlot {
        &self.0
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("slot", &self.0.index)
            .field("sequence", &self.0.sequence)
            .field("length", &self.0.length)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn alloc_buffer(index: usize, bytes: usize) -> Result<Box<[u8]>, PoolError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| PoolError::AllocFailed { index, bytes })?;
    buf.resize(bytes, 0u8);

    Ok(buf.into_boxed_slice())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! Buffer memory: allocation of aligned block storage and shared output
//! buffers that requests read into.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A heap buffer whose visible bytes start at an aligned address.
///
/// The backing vector is over-allocated by `alignment - 1` bytes and never
/// resized, so the aligned window stays valid for the buffer's lifetime.
pub struct AlignedBuffer {
    storage: Vec<u8>,
    base: usize,
    len: usize,
    alignment: usize,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    pub fn zeroed(len: usize, alignment: usize) -> Result<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "alignment {} is not a power of two",
                alignment
            )));
        }
        let total = len
            .checked_add(alignment - 1)
            .ok_or_else(|| Error::invalid_argument("buffer size overflows usize"))?;
        let storage = vec![0u8; total];
        let base = storage.as_ptr().align_offset(alignment);
        if base >= alignment {
            return Err(Error::internal("unable to align buffer"));
        }
        Ok(Self { storage, base, len, alignment })
    }

    /// Number of usable bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer has no usable bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment the buffer was allocated with.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// The aligned bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.base..self.base + self.len]
    }

    /// The aligned bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.base..self.base + self.len]
    }

    /// Whether the first usable byte sits on an `alignment` boundary.
    pub fn is_aligned(&self) -> bool {
        (self.as_slice().as_ptr() as usize) % self.alignment == 0
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// Source of block memory for a cache.
pub trait BlockAllocator: Send + Sync + fmt::Debug {
    /// Allocate `size` zeroed bytes with the given alignment.
    fn allocate(&self, size: usize, alignment: usize) -> Result<AlignedBuffer>;

    /// Return a previously allocated buffer's budget.
    fn release(&self, _size: usize) {}
}

/// Allocator that takes memory straight from the heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BlockAllocator for HeapAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<AlignedBuffer> {
        AlignedBuffer::zeroed(size, alignment)
    }
}

/// Allocator that refuses to hand out more than a fixed number of bytes.
#[derive(Debug)]
pub struct BoundedAllocator {
    budget: usize,
    used: Mutex<usize>,
}

impl BoundedAllocator {
    /// Create an allocator with `budget` bytes available.
    pub fn new(budget: usize) -> Self {
        Self { budget, used: Mutex::new(0) }
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    /// Bytes still available.
    pub fn available(&self) -> usize {
        self.budget - *self.used.lock()
    }
}

impl BlockAllocator for BoundedAllocator {
    fn allocate(&self, size: usize, alignment: usize) -> Result<AlignedBuffer> {
        let mut used = self.used.lock();
        let available = self.budget - *used;
        if size > available {
            return Err(Error::AllocationFailed { requested: size, available });
        }
        let buffer = AlignedBuffer::zeroed(size, alignment)?;
        *used += size;
        Ok(buffer)
    }

    fn release(&self, size: usize) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(size);
    }
}

/// A byte buffer shared between a request's owner and the stages that
/// write into it.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<Mutex<AlignedBuffer>>,
}

impl SharedBuffer {
    /// Create a zeroed, byte-aligned buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        let buffer = AlignedBuffer {
            storage: vec![0u8; len],
            base: 0,
            len,
            alignment: 1,
        };
        Self::from_aligned(buffer)
    }

    /// Share an already allocated buffer.
    pub fn from_aligned(buffer: AlignedBuffer) -> Self {
        Self { inner: Arc::new(Mutex::new(buffer)) }
    }

    /// Number of usable bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the buffer has no usable bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the full contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.lock().as_slice().to_vec()
    }

    /// Copy of `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let guard = self.inner.lock();
        let range = checked_range(offset, len, guard.len())?;
        Ok(guard.as_slice()[range].to_vec())
    }

    /// Whether both handles refer to the same memory.
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` with mutable access to the bytes.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.inner.lock();
        f(guard.as_mut_slice())
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer").field("len", &self.len()).finish()
    }
}

/// Destination for read data: a buffer plus the offset writes start at.
#[derive(Clone, Debug)]
pub struct OutputTarget {
    buffer: SharedBuffer,
    offset: usize,
}

impl OutputTarget {
    /// Target the start of `buffer`.
    pub fn new(buffer: SharedBuffer) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Target `buffer` starting at `offset`.
    pub fn at(buffer: SharedBuffer, offset: usize) -> Self {
        Self { buffer, offset }
    }

    /// Underlying buffer.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Start offset within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The same target moved forward by `by` bytes.
    pub fn offset_by(&self, by: u64) -> Result<OutputTarget> {
        let by = usize::try_from(by)
            .map_err(|_| Error::invalid_argument("output offset overflows usize"))?;
        let offset = self
            .offset
            .checked_add(by)
            .ok_or_else(|| Error::invalid_argument("output offset overflows usize"))?;
        Ok(Self { buffer: self.buffer.clone(), offset })
    }

    /// Bytes available from the target offset to the end of the buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    /// Write `data` at the target.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.buffer.with_mut(|bytes| {
            let range = checked_range(self.offset, data.len(), bytes.len())?;
            bytes[range].copy_from_slice(data);
            Ok(())
        })
    }

    /// Copy `len` bytes from `source` at `source_offset` into the target.
    pub fn copy_from(&self, source: &SharedBuffer, source_offset: usize, len: usize) -> Result<()> {
        if source.ptr_eq(&self.buffer) {
            return self.buffer.with_mut(|bytes| {
                let from = checked_range(source_offset, len, bytes.len())?;
                checked_range(self.offset, len, bytes.len())?;
                bytes.copy_within(from, self.offset);
                Ok(())
            });
        }
        let source = source.inner.lock();
        let from = checked_range(source_offset, len, source.len())?;
        self.write(&source.as_slice()[from])
    }
}

fn checked_range(offset: usize, len: usize, limit: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(offset..end),
        _ => Err(Error::invalid_argument(format!(
            "range {}+{} exceeds buffer of {} bytes",
            offset, len, limit
        ))),
    }
}

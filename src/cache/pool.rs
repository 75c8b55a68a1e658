//! Fixed pool of cache blocks and the lookup/recycle engine over it.
//!
//! The pool is a flat array of `num_blocks` slots backed by one contiguous
//! allocation. Slot `i` owns bytes `[i * block_size, (i + 1) * block_size)`.
//! Lookups and recycling are linear scans over the slots.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::memory::{AlignedBuffer, OutputTarget, SharedBuffer};
use crate::request::{RequestId, RequestPath};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Metadata for one slot of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheBlock {
    owner: Option<RequestPath>,
    block_offset: u64,
    last_touched: Option<Instant>,
    in_flight: Option<RequestId>,
    invalidate_on_completion: bool,
}

impl CacheBlock {
    /// File occupying the slot, or `None` when free.
    pub fn owner(&self) -> Option<&RequestPath> {
        self.owner.as_ref()
    }

    /// File offset the slot's data starts at.
    pub fn block_offset(&self) -> u64 {
        self.block_offset
    }

    /// Last time the slot was hit or claimed. `None` sorts before any time.
    pub fn last_touched(&self) -> Option<Instant> {
        self.last_touched
    }

    /// Outstanding device read filling this slot.
    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }

    /// Whether a flush arrived while the slot was being filled.
    pub fn is_invalidated(&self) -> bool {
        self.invalidate_on_completion
    }

    fn holds(&self, path: &RequestPath, offset: u64) -> bool {
        !self.invalidate_on_completion
            && self.block_offset == offset
            && self.owner.as_ref() == Some(path)
    }

    fn reset(&mut self) {
        *self = CacheBlock::default();
    }
}

/// The block pool: slot metadata plus the memory the slots live in.
#[derive(Debug)]
pub struct BlockPool {
    blocks: Vec<CacheBlock>,
    memory: SharedBuffer,
    block_size: u64,
    clock: Arc<dyn Clock>,
}

impl BlockPool {
    /// Create a pool of `num_blocks` slots over `memory`.
    pub fn new(
        num_blocks: usize,
        block_size: u64,
        memory: AlignedBuffer,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if num_blocks == 0 || !block_size.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "a pool needs at least one block of a power-of-two size, got {} x {}",
                num_blocks, block_size
            )));
        }
        let required = (num_blocks as u64)
            .checked_mul(block_size)
            .ok_or_else(|| Error::invalid_argument("pool size overflows u64"))?;
        if (memory.len() as u64) < required {
            return Err(Error::invalid_argument(format!(
                "pool memory of {} bytes cannot hold {} bytes of blocks",
                memory.len(),
                required
            )));
        }
        Ok(Self {
            blocks: vec![CacheBlock::default(); num_blocks],
            memory: SharedBuffer::from_aligned(memory),
            block_size,
            clock,
        })
    }

    /// Number of slots.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Size of a slot in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Metadata of slot `index`.
    pub fn block(&self, index: usize) -> Option<&CacheBlock> {
        self.blocks.get(index)
    }

    /// Memory backing all slots.
    pub fn memory(&self) -> &SharedBuffer {
        &self.memory
    }

    /// Number of slots with an outstanding read.
    pub fn num_in_flight(&self) -> usize {
        self.blocks.iter().filter(|b| b.in_flight.is_some()).count()
    }

    fn check_aligned(&self, offset: u64) -> Result<()> {
        if offset % self.block_size != 0 {
            return Err(Error::invalid_argument(format!(
                "offset {} is not aligned to block size {}",
                offset, self.block_size
            )));
        }
        Ok(())
    }

    fn block_mut(&mut self, index: usize) -> Result<&mut CacheBlock> {
        let num_blocks = self.blocks.len();
        self.blocks.get_mut(index).ok_or_else(|| {
            Error::invalid_argument(format!("block index {} out of range 0..{}", index, num_blocks))
        })
    }

    /// Slot holding `(path, offset)`, if any.
    pub fn find_in_cache(&self, path: &RequestPath, offset: u64) -> Result<Option<usize>> {
        self.check_aligned(offset)?;
        Ok(self.blocks.iter().position(|b| b.holds(path, offset)))
    }

    /// Claim the least recently touched slot that has no read in flight and
    /// bind it to `(path, offset)`. Ties go to the lowest index. Returns
    /// `None` when every slot is in flight.
    pub fn recycle_oldest_block(&mut self, path: &RequestPath, offset: u64) -> Result<Option<usize>> {
        self.check_aligned(offset)?;

        let mut oldest: Option<(usize, Option<Instant>)> = None;
        for (index, block) in self.blocks.iter().enumerate() {
            if block.in_flight.is_some() {
                continue;
            }
            match oldest {
                Some((_, touched)) if block.last_touched >= touched => {}
                _ => oldest = Some((index, block.last_touched)),
            }
        }

        let Some((index, _)) = oldest else {
            return Ok(None);
        };
        let now = self.clock.now();
        let block = &mut self.blocks[index];
        if let Some(previous) = &block.owner {
            log::trace!("Evicting {}@{} from block {}", previous, block.block_offset, index);
        }
        block.owner = Some(path.clone());
        block.block_offset = offset;
        block.last_touched = Some(now);
        block.invalidate_on_completion = false;
        Ok(Some(index))
    }

    /// Mark slot `index` as just used.
    pub fn touch_block(&mut self, index: usize) -> Result<()> {
        let now = self.clock.now();
        self.block_mut(index)?.last_touched = Some(now);
        Ok(())
    }

    /// Bind or clear the outstanding read of slot `index`.
    pub fn set_in_flight(&mut self, index: usize, request: Option<RequestId>) -> Result<()> {
        self.block_mut(index)?.in_flight = request;
        Ok(())
    }

    /// Return slot `index` to the free state.
    pub fn reset_block(&mut self, index: usize) -> Result<()> {
        self.block_mut(index)?.reset();
        Ok(())
    }

    fn flush_where(&mut self, mut matches: impl FnMut(&CacheBlock) -> bool) -> usize {
        let mut flushed = 0;
        for block in self.blocks.iter_mut().filter(|b| b.owner.is_some() && matches(b)) {
            if block.in_flight.is_some() {
                // The read still targets this memory; drop the slot once it lands.
                block.invalidate_on_completion = true;
            } else {
                block.reset();
            }
            flushed += 1;
        }
        flushed
    }

    /// Drop every slot owned by `path`. Returns the number of slots dropped.
    pub fn flush_path(&mut self, path: &RequestPath) -> usize {
        self.flush_where(|b| b.owner.as_ref() == Some(path))
    }

    /// Drop every slot. Returns the number of slots dropped.
    pub fn flush_all(&mut self) -> usize {
        self.flush_where(|_| true)
    }

    /// Write target covering slot `index`.
    pub fn block_target(&self, index: usize) -> Result<OutputTarget> {
        if index >= self.blocks.len() {
            return Err(Error::invalid_argument(format!("block index {} out of range", index)));
        }
        OutputTarget::new(self.memory.clone()).offset_by(index as u64 * self.block_size)
    }

    /// Copy `len` bytes from slot `index`, starting `block_offset` bytes in,
    /// to `output`.
    pub fn copy_to(
        &self,
        index: usize,
        block_offset: u64,
        output: &OutputTarget,
        len: u64,
    ) -> Result<()> {
        if index >= self.blocks.len() {
            return Err(Error::invalid_argument(format!("block index {} out of range", index)));
        }
        if block_offset.checked_add(len).map_or(true, |end| end > self.block_size) {
            return Err(Error::invalid_argument(format!(
                "copy of {} bytes at {} exceeds block size {}",
                len, block_offset, self.block_size
            )));
        }
        let start = index as u64 * self.block_size + block_offset;
        let start = usize::try_from(start)
            .map_err(|_| Error::invalid_argument("block offset overflows usize"))?;
        let len = usize::try_from(len)
            .map_err(|_| Error::invalid_argument("copy size overflows usize"))?;
        output.copy_from(&self.memory, start, len)
    }

    /// Distinct files with at least one valid slot.
    pub fn cached_paths(&self) -> Vec<RequestPath> {
        self.blocks
            .iter()
            .filter(|b| !b.invalidate_on_completion)
            .filter_map(|b| b.owner.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

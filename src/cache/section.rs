//! Decomposition of a read into block-aware sections.
//!
//! A read of `[offset, offset + size)` is split into at most three parts:
//!
//! ```text
//!  block 0          block 1          block 2          block 3
//! |----------------|----------------|----------------|--------|  <- EOF
//!        [ prolog  ][      main                      ][ epi ]
//!        ^offset                                            ^offset + size
//! ```
//!
//! The prolog and epilog each read one whole block (or the short block at
//! the end of the file) so the block can be cached. Only part of that block
//! is copied to the caller. The main section is block aligned and is read
//! straight into the caller's buffer.

use crate::error::{Error, Result};
use crate::memory::OutputTarget;
use crate::request::{RequestId, RequestPath};

/// One contiguous part of a caller's read.
#[derive(Debug, Clone)]
pub struct Section {
    /// File the section reads from.
    pub path: RequestPath,
    /// File offset to read from. Block aligned for cacheable sections.
    pub read_offset: u64,
    /// Number of bytes to read from the file.
    pub read_size: u64,
    /// Offset into the fetched block where the caller's bytes begin.
    pub block_offset: u64,
    /// Number of bytes to copy to the caller.
    pub copy_size: u64,
    /// Where the caller's bytes go.
    pub output: OutputTarget,
    /// Pool slot the section is bound to.
    pub cache_block_index: Option<usize>,
    /// The caller's request.
    pub parent: Option<RequestId>,
    /// Keeps `parent` open while the section waits for a slot or for
    /// another request's read.
    pub wait: Option<RequestId>,
    /// Passed on to device reads issued for this section.
    pub shared_read: bool,
}

impl Section {
    fn new(
        path: &RequestPath,
        read_offset: u64,
        read_size: u64,
        block_offset: u64,
        copy_size: u64,
        output: OutputTarget,
    ) -> Self {
        Self {
            path: path.clone(),
            read_offset,
            read_size,
            block_offset,
            copy_size,
            output,
            cache_block_index: None,
            parent: None,
            wait: None,
            shared_read: false,
        }
    }

    /// Attach the caller's request and read flags.
    pub fn bind(&mut self, parent: RequestId, shared_read: bool) {
        self.parent = Some(parent);
        self.shared_read = shared_read;
    }

    /// Merge `front` into the start of this section. The merged section is a
    /// plain read and can no longer be cached.
    pub fn prefix(&mut self, front: &Section) -> Result<()> {
        if front.read_offset >= self.read_offset {
            return Err(Error::invalid_argument(format!(
                "cannot prefix section at {} with section at {}",
                self.read_offset, front.read_offset
            )));
        }
        if self.wait.is_some() || front.wait.is_some() {
            return Err(Error::invalid_state("cannot merge sections that are already waiting"));
        }
        self.read_offset = front.read_offset + front.block_offset;
        self.read_size += front.read_size - front.block_offset;
        self.output = front.output.clone();
        self.copy_size += front.copy_size;
        self.block_offset = 0;
        Ok(())
    }

    /// Turn a cacheable section into a plain read of just the bytes the
    /// caller wants.
    pub fn into_plain_read(self) -> Result<Section> {
        if self.wait.is_some() {
            return Err(Error::invalid_state("cannot convert a section that is already waiting"));
        }
        Ok(Section {
            read_offset: self.read_offset + self.block_offset,
            read_size: self.copy_size,
            block_offset: 0,
            cache_block_index: None,
            ..self
        })
    }
}

/// Result of splitting a read.
#[derive(Debug, Clone, Default)]
pub struct SplitSections {
    /// Unaligned leading part.
    pub prolog: Option<Section>,
    /// Aligned middle part, read directly.
    pub main: Option<Section>,
    /// Unaligned trailing part.
    pub epilog: Option<Section>,
}

impl SplitSections {
    /// Whether a prolog or epilog was produced.
    pub fn is_cacheable(&self) -> bool {
        self.prolog.is_some() || self.epilog.is_some()
    }
}

#[inline]
fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Split a read of `size` bytes at `offset` of a file `file_length` bytes
/// long into prolog, main and epilog sections.
///
/// `block_size` must be a power of two. The read must lie within the file.
pub fn split_request(
    block_size: u64,
    path: &RequestPath,
    file_length: u64,
    offset: u64,
    size: u64,
    output: &OutputTarget,
) -> Result<SplitSections> {
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(Error::invalid_argument(format!(
            "block size {} is not a power of two",
            block_size
        )));
    }
    let end = match offset.checked_add(size) {
        Some(end) if end <= file_length => end,
        _ => return Err(Error::OutOfRange { offset, size, file_length }),
    };

    let mut split = SplitSections::default();

    let rounded_start = align_down(offset, block_size);
    let block_read_size_start = (file_length - rounded_start).min(block_size);
    if rounded_start == offset {
        if end >= file_length {
            // Runs to the end of the file: nothing after it is worth caching.
            split.main = Some(Section::new(path, offset, size, 0, size, output.clone()));
            return Ok(split);
        }
        if size < block_read_size_start {
            split.prolog = Some(Section::new(
                path,
                offset,
                block_read_size_start,
                0,
                size,
                output.clone(),
            ));
            return Ok(split);
        }
    } else {
        let block_offset = offset - rounded_start;
        if block_offset + size <= block_read_size_start {
            split.prolog = Some(Section::new(
                path,
                rounded_start,
                block_read_size_start,
                block_offset,
                size,
                output.clone(),
            ));
            return Ok(split);
        }
        split.prolog = Some(Section::new(
            path,
            rounded_start,
            block_read_size_start,
            block_offset,
            block_read_size_start - block_offset,
            output.clone(),
        ));
    }

    let rounded_end = align_down(end, block_size);
    let epilog_copy_size = end - rounded_end;
    let block_read_size_end = block_size.min(file_length - rounded_end);
    if epilog_copy_size != 0 && epilog_copy_size < block_read_size_end {
        split.epilog = Some(Section::new(
            path,
            rounded_end,
            block_read_size_end,
            0,
            epilog_copy_size,
            output.offset_by(rounded_end - offset)?,
        ));
    }

    let prolog_size = split.prolog.as_ref().map_or(0, |s| s.copy_size);
    let epilog_size = split.epilog.as_ref().map_or(0, |s| s.copy_size);
    let adjusted_offset = offset + prolog_size;
    let remaining_size = size - prolog_size - epilog_size;
    if adjusted_offset % block_size != 0 {
        return Err(Error::internal(format!(
            "main section at {} is not aligned to block size {}",
            adjusted_offset, block_size
        )));
    }
    if remaining_size != 0 {
        split.main = Some(Section::new(
            path,
            adjusted_offset,
            remaining_size,
            0,
            remaining_size,
            output.offset_by(adjusted_offset - offset)?,
        ));
    }

    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SharedBuffer;
    use proptest::prelude::*;

    const BLOCK: u64 = 4096;

    fn split(file_length: u64, offset: u64, size: u64) -> SplitSections {
        let output = OutputTarget::new(SharedBuffer::new(size as usize));
        split_request(BLOCK, &RequestPath::new("file"), file_length, offset, size, &output).unwrap()
    }

    #[test]
    fn test_small_unaligned_read_is_one_prolog() {
        let s = split(10000, 100, 50);
        let prolog = s.prolog.unwrap();
        assert_eq!(prolog.read_offset, 0);
        assert_eq!(prolog.read_size, 4096);
        assert_eq!(prolog.block_offset, 100);
        assert_eq!(prolog.copy_size, 50);
        assert!(s.main.is_none());
        assert!(s.epilog.is_none());
    }

    #[test]
    fn test_aligned_read_with_tail() {
        let s = split(10000, 0, 9000);
        assert!(s.prolog.is_none());

        let main = s.main.unwrap();
        assert_eq!((main.read_offset, main.read_size), (0, 8192));
        assert_eq!(main.output.offset(), 0);

        let epilog = s.epilog.unwrap();
        assert_eq!(epilog.read_offset, 8192);
        assert_eq!(epilog.read_size, 1808);
        assert_eq!(epilog.block_offset, 0);
        assert_eq!(epilog.copy_size, 808);
        assert_eq!(epilog.output.offset(), 8192);
    }

    #[test]
    fn test_aligned_read_to_end_of_file_is_main_only() {
        let s = split(10000, 4096, 5904);
        assert!(s.prolog.is_none());
        assert!(s.epilog.is_none());
        let main = s.main.unwrap();
        assert_eq!((main.read_offset, main.read_size, main.copy_size), (4096, 5904, 5904));
    }

    #[test]
    fn test_aligned_read_inside_one_block() {
        let s = split(10000, 4096, 10);
        let prolog = s.prolog.unwrap();
        assert_eq!((prolog.read_offset, prolog.read_size, prolog.copy_size), (4096, 4096, 10));
        assert!(s.main.is_none() && s.epilog.is_none());
    }

    #[test]
    fn test_unaligned_read_spanning_blocks() {
        let s = split(20000, 100, 12000);
        let prolog = s.prolog.unwrap();
        assert_eq!((prolog.read_offset, prolog.block_offset, prolog.copy_size), (0, 100, 3996));

        let main = s.main.unwrap();
        assert_eq!((main.read_offset, main.read_size), (4096, 4096));
        assert_eq!(main.output.offset(), 3996);

        let epilog = s.epilog.unwrap();
        assert_eq!((epilog.read_offset, epilog.read_size, epilog.copy_size), (8192, 4096, 3908));
        assert_eq!(epilog.output.offset(), 8092);
    }

    #[test]
    fn test_epilog_reaching_end_of_file_joins_main() {
        // The tail ends exactly at EOF, so it is read as part of main.
        let s = split(10000, 100, 9900);
        assert!(s.prolog.is_some());
        assert!(s.epilog.is_none());
        let main = s.main.unwrap();
        assert_eq!((main.read_offset, main.read_size), (4096, 5904));
    }

    #[test]
    fn test_read_past_end_is_out_of_range() {
        let output = OutputTarget::new(SharedBuffer::new(16));
        let err = split_request(BLOCK, &RequestPath::new("f"), 100, 90, 16, &output).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { offset: 90, size: 16, file_length: 100 }));

        let err = split_request(BLOCK, &RequestPath::new("f"), 100, u64::MAX, 2, &output);
        assert!(err.is_err());
    }

    #[test]
    fn test_prefix_merges_prolog_into_main() {
        let s = split(20000, 100, 12000);
        let prolog = s.prolog.unwrap();
        let mut main = s.main.unwrap();

        main.prefix(&prolog).unwrap();
        assert_eq!(main.read_offset, 100);
        assert_eq!(main.read_size, 4096 + 3996);
        assert_eq!(main.copy_size, 4096 + 3996);
        assert_eq!(main.block_offset, 0);
        assert_eq!(main.output.offset(), 0);
    }

    #[test]
    fn test_prefix_rejects_wrong_order_and_waits() {
        let s = split(20000, 100, 12000);
        let mut prolog = s.prolog.unwrap();
        let mut main = s.main.unwrap();

        assert!(prolog.prefix(&main).is_err());

        main.wait = Some(RequestId(1));
        assert!(main.prefix(&prolog).is_err());
        main.wait = None;
        prolog.wait = Some(RequestId(2));
        assert!(matches!(main.prefix(&prolog), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_into_plain_read() {
        let s = split(20000, 100, 4000);
        let prolog = s.prolog.unwrap();
        let plain = prolog.into_plain_read().unwrap();
        assert_eq!((plain.read_offset, plain.read_size, plain.block_offset), (100, 3996, 0));
    }

    proptest! {
        #[test]
        fn prop_sections_cover_request_exactly(
            file_length in 1u64..40_000,
            offset_seed in any::<u64>(),
            size_seed in any::<u64>(),
        ) {
            let offset = offset_seed % file_length;
            let size = size_seed % (file_length - offset + 1);
            let s = split(file_length, offset, size);

            // [start, end) in the file and the output offset they are copied to.
            let mut pieces = Vec::new();
            for section in [&s.prolog, &s.main, &s.epilog].into_iter().flatten() {
                prop_assert!(section.copy_size <= section.read_size);
                prop_assert!(section.block_offset < BLOCK);
                let start = section.read_offset + section.block_offset;
                pieces.push((start, start + section.copy_size, section.output.offset() as u64));
            }
            pieces.sort();

            let mut cursor = offset;
            for (start, end, output_offset) in pieces {
                prop_assert_eq!(start, cursor);
                prop_assert_eq!(output_offset, start - offset);
                cursor = end;
            }
            prop_assert_eq!(cursor, offset + size);
        }

        #[test]
        fn prop_main_is_block_aligned(
            file_length in 1u64..40_000,
            offset_seed in any::<u64>(),
            size_seed in any::<u64>(),
        ) {
            let offset = offset_seed % file_length;
            let size = size_seed % (file_length - offset + 1);
            let s = split(file_length, offset, size);
            if let Some(main) = &s.main {
                prop_assert_eq!(main.read_offset % BLOCK, 0);
            }
            for section in [&s.prolog, &s.epilog].into_iter().flatten() {
                prop_assert_eq!(section.read_offset % BLOCK, 0);
                prop_assert!(section.read_offset + section.read_size <= file_length);
            }
        }

        #[test]
        fn prop_aligned_tail_read_is_main_only(blocks in 0u64..8, tail in 1u64..20_000) {
            let offset = blocks * BLOCK;
            let file_length = offset + tail;
            let s = split(file_length, offset, tail);
            prop_assert!(s.prolog.is_none());
            prop_assert!(s.epilog.is_none());
            let main = s.main.unwrap();
            prop_assert_eq!((main.read_offset, main.read_size), (offset, tail));
        }

        #[test]
        fn prop_single_block_read_is_one_prolog(
            block in 0u64..8,
            start in 0u64..BLOCK,
            len_seed in any::<u64>(),
            extra in 1u64..10_000,
        ) {
            let offset = block * BLOCK + start;
            let size = len_seed % (BLOCK - start);
            // The file continues past the block.
            let file_length = (block + 1) * BLOCK + extra;
            let s = split(file_length, offset, size);
            prop_assert!(s.main.is_none());
            prop_assert!(s.epilog.is_none());
            let prolog = s.prolog.unwrap();
            prop_assert_eq!(prolog.copy_size, size);
        }
    }
}

//! Segment entry planning for SELF containers.
//!
//! The planner classifies upstream segment descriptors into container
//! entries: loadable segments receive a 4-bit segment index and, when large
//! enough, a per-block digest table; metadata-only descriptors become plain
//! entries. The 64-bit flags word packed into the entry table is modeled as
//! an explicit [`EntryFlags`] structure so bit-mask literals stay confined
//! to this module.

use super::constants::*;
use crate::{Error, Result};

/// One program segment as laid out by the upstream linking step.
///
/// The builder only reads descriptors; offsets and sizes are final file
/// placements within the raw executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// File offset of the segment's bytes within the raw image
    pub file_offset: u64,
    /// Byte size of the segment in the raw image
    pub size: u64,
    /// Permission/type flags, carried opaquely from the linker
    pub flags: u32,
    /// Whether the segment is loadable and therefore indexable
    pub loadable: bool,
    /// Whether block digesting is requested for this segment
    pub digested: bool,
}

/// Unpacked form of the 64-bit entry flags word.
///
/// The wire layout packs three booleans and a 4-bit segment index into one
/// integer; this structure keeps business logic free of mask literals and
/// makes the index bound explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags {
    /// Entry payload is split into fixed-size blocks (bit 0)
    pub has_blocks: bool,
    /// Entry declares the container's block size (bit 1)
    pub block_size_present: bool,
    /// Entry has a digest table in the metadata region (bit 2)
    pub has_digests: bool,
    /// Segment index (bits 8-11, 0-15)
    pub segment_index: u16,
}

impl EntryFlags {
    /// Pack into the on-disk flags word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if the segment index does not fit
    /// the 4-bit field. The index is never truncated: a wrong index would
    /// make the loader verify a segment against another segment's digests.
    pub fn pack(&self) -> Result<u64> {
        if usize::from(self.segment_index) > SELF_MAX_SEGMENT_INDEX {
            return Err(Error::CapacityExceeded {
                count: usize::from(self.segment_index) + 1,
            });
        }

        let mut word = 0u64;
        if self.has_blocks {
            word |= SELF_PROPERTY_HAS_BLOCKS;
        }
        if self.block_size_present {
            word |= SELF_PROPERTY_BLOCK_SIZE;
        }
        if self.has_digests {
            word |= SELF_PROPERTY_HAS_DIGESTS;
        }
        word |= u64::from(self.segment_index) << SELF_PROPERTY_SEGMENT_INDEX_SHIFT;

        Ok(word)
    }

    /// Unpack an on-disk flags word.
    pub fn unpack(word: u64) -> Self {
        Self {
            has_blocks: word & SELF_PROPERTY_HAS_BLOCKS != 0,
            block_size_present: word & SELF_PROPERTY_BLOCK_SIZE != 0,
            has_digests: word & SELF_PROPERTY_HAS_DIGESTS != 0,
            segment_index: ((word & SELF_PROPERTY_SEGMENT_INDEX)
                >> SELF_PROPERTY_SEGMENT_INDEX_SHIFT) as u16,
        }
    }
}

/// One container entry, derived 1:1 from a segment descriptor.
///
/// Created by [`plan`] and immutable afterwards except for the offset
/// rebase the layout assembler performs once the embedded image's placement
/// is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// Offset of the entry's bytes: image-relative after planning, rebased
    /// to the final container offset by the layout assembler
    pub offset: u64,
    /// Byte size of the entry's payload
    pub size: u64,
    /// Entry describes a loadable, indexable segment
    pub is_segment: bool,
    /// Payload is split into fixed-size blocks
    pub has_blocks: bool,
    /// Index within the loadable-segment subsequence (0-15)
    pub segment_index: u16,
    /// A per-block digest table exists for this entry
    pub has_digest: bool,
    /// Payload is addressed at block granularity
    pub is_blocked: bool,
    /// Declared block size, 0 for plain entries
    pub block_size: u32,
    /// Number of digest blocks, `ceil(size / block_size)` when blocked
    pub block_count: u64,
}

impl EntryInfo {
    /// The entry's flags word in unpacked form.
    pub fn flags(&self) -> EntryFlags {
        EntryFlags {
            has_blocks: self.has_blocks,
            block_size_present: self.block_size != 0,
            has_digests: self.has_digest,
            segment_index: if self.is_segment { self.segment_index } else { 0 },
        }
    }
}

/// Plan container entries from upstream segment descriptors.
///
/// Pure and deterministic: input order is preserved, output length equals
/// input length, and segment indices form a gap-free sequence from 0 over
/// the loadable descriptors. A segment is block-digested when digesting was
/// requested and it spans at least one full block; smaller segments stay
/// plain entries.
///
/// # Errors
///
/// - [`Error::Config`] if `block_size` is not a power of two
/// - [`Error::CapacityExceeded`] if more than 16 descriptors are loadable
/// - [`Error::InvalidSegment`] if a zero-size segment requests digesting
pub fn plan(segments: &[SegmentDescriptor], block_size: u32) -> Result<Vec<EntryInfo>> {
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(Error::Config(format!(
            "block size {block_size:#x} is not a power of two"
        )));
    }

    let indexable = segments.iter().filter(|s| s.loadable).count();
    if indexable > SELF_MAX_SEGMENT_INDEX + 1 {
        return Err(Error::CapacityExceeded { count: indexable });
    }

    let mut entries = Vec::with_capacity(segments.len());
    let mut next_index: u16 = 0;

    for seg in segments {
        if seg.digested && seg.size == 0 {
            return Err(Error::InvalidSegment(
                "zero-size segment requested block digesting".into(),
            ));
        }

        let blocked = seg.digested && seg.size >= u64::from(block_size);
        let segment_index = if seg.loadable {
            let index = next_index;
            next_index += 1;
            index
        } else {
            0
        };
        let block_count = if blocked {
            seg.size.div_ceil(u64::from(block_size))
        } else {
            0
        };

        entries.push(EntryInfo {
            offset: seg.file_offset,
            size: seg.size,
            is_segment: seg.loadable,
            has_blocks: blocked,
            segment_index,
            has_digest: blocked,
            is_blocked: blocked,
            block_size: if blocked { block_size } else { 0 },
            block_count,
        });
    }

    Ok(entries)
}

//! Block digesting for SELF metadata tables.
//!
//! Segment bytes are partitioned into fixed-size blocks; block `i` covers
//! `[i*block_size, min((i+1)*block_size, len))`, so blocks tile the segment
//! exactly and the last block may be short. Digests are unkeyed and
//! deterministic, which is what lets the loader recompute and compare them.

use sha2::{Digest, Sha256};

/// Fixed-output-width content hash used for block and whole-image digests.
///
/// The container declares a single digest width; any implementation whose
/// [`output_len`](Digester::output_len) matches can be plugged in.
pub trait Digester: Send + Sync {
    /// Digest output width in bytes.
    fn output_len(&self) -> usize;

    /// Digest one contiguous byte range.
    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

/// SHA-256 digester, the shipped default (32-byte output).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl Digester for Sha256Digester {
    fn output_len(&self) -> usize {
        Sha256::output_size()
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().to_vec()
    }
}

/// Iterator over the block byte ranges of a segment.
///
/// Yields `(start, end)` pairs that tile `[0, len)` with no overlap and no
/// gap. An empty segment yields no ranges.
pub fn block_ranges(len: u64, block_size: u32) -> impl Iterator<Item = (u64, u64)> {
    let block_size = u64::from(block_size);
    let count = if len == 0 { 0 } else { len.div_ceil(block_size) };
    (0..count).map(move |i| {
        let start = i * block_size;
        (start, (start + block_size).min(len))
    })
}

/// Lazily digest a segment block by block.
///
/// One digest per block, in block order; the tail block digests only the
/// remaining bytes, with no zero padding.
pub fn digest_blocks<'a>(
    bytes: &'a [u8],
    block_size: u32,
    digester: &'a dyn Digester,
) -> impl Iterator<Item = Vec<u8>> + 'a {
    block_ranges(bytes.len() as u64, block_size)
        .map(move |(start, end)| digester.digest(&bytes[start as usize..end as usize]))
}

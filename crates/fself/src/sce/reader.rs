//! Parsing and verification of assembled containers.
//!
//! [`SelfFile`] recovers the header, entry table, and region placements
//! from container bytes — the inverse of the layout assembler — and can
//! recompute every digest the way a loader would before honoring the image.

use super::constants::*;
use super::digest::{digest_blocks, Digester};
use super::entry::EntryFlags;
use super::layout::SelfHeader;
use super::meta::{AuthInfo, ExtendedInfo};
use crate::{Error, Result};

/// One parsed entry-table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfEntry {
    /// Unpacked flags word
    pub flags: EntryFlags,
    /// Absolute file offset of the entry's payload
    pub offset: u64,
    /// Payload size in bytes
    pub size: u64,
}

impl SelfEntry {
    /// Number of digest blocks for this entry, 0 for plain entries.
    pub fn block_count(&self, block_size: u32) -> u64 {
        if self.flags.has_digests {
            self.size.div_ceil(u64::from(block_size))
        } else {
            0
        }
    }
}

/// A parsed SELF container.
pub struct SelfFile<'a> {
    data: &'a [u8],
    header: SelfHeader,
    entries: Vec<SelfEntry>,
    block_size: u32,
}

impl<'a> SelfFile<'a> {
    /// Parse a container that uses the default block size.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        Self::parse_with_block_size(data, SELF_DEFAULT_BLOCK_SIZE)
    }

    /// Parse a container built with a non-default global block size.
    ///
    /// The flags word has no room for a width field, so the block size is
    /// build input; entries merely advertise that they use it.
    pub fn parse_with_block_size(data: &'a [u8], block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "block size {block_size:#x} is not a power of two"
            )));
        }
        let header = SelfHeader::parse(data)?;

        if header.file_size != data.len() as u64 {
            return Err(Error::Elf(format!(
                "container size {:#x} does not match declared file size {:#x}",
                data.len(),
                header.file_size
            )));
        }

        let trailing = (SELF_SIGNATURE_SIZE + SELF_AUTH_INFO_SIZE + SELF_EX_INFO_SIZE) as u64;
        if header.file_size < u64::from(header.header_size) + trailing {
            return Err(Error::Elf(format!(
                "container of {:#x} bytes too small for trailing info",
                header.file_size
            )));
        }

        let expected_header = SELF_HEADER_SIZE + usize::from(header.entry_count) * SELF_ENTRY_SIZE;
        if usize::from(header.header_size) != expected_header {
            return Err(Error::Elf(format!(
                "declared header size {:#x} does not match {} entries",
                header.header_size, header.entry_count
            )));
        }

        let mut entries = Vec::with_capacity(usize::from(header.entry_count));
        for i in 0..usize::from(header.entry_count) {
            let at = SELF_HEADER_SIZE + i * SELF_ENTRY_SIZE;
            let field = |j: usize| {
                u64::from_le_bytes(data[at + j * 8..at + j * 8 + 8].try_into().unwrap())
            };
            entries.push(SelfEntry {
                flags: EntryFlags::unpack(field(0)),
                offset: field(1),
                size: field(2),
            });
        }

        // bound extents before any block-count arithmetic on them
        for (i, entry) in entries.iter().enumerate() {
            if entry.offset > header.file_size || entry.size > header.file_size {
                return Err(Error::Elf(format!(
                    "entry {i} extent exceeds the container"
                )));
            }
        }

        let file = Self {
            data,
            header,
            entries,
            block_size,
        };
        if file.meta_end() != u64::from(header.header_size) + u64::from(header.meta_size) {
            return Err(Error::Elf(format!(
                "declared metadata size {:#x} does not match entry block counts",
                header.meta_size
            )));
        }
        if file.extended_info_offset() < file.image_offset() {
            return Err(Error::Elf(
                "metadata region overlaps the trailing info".into(),
            ));
        }

        Ok(file)
    }

    /// The parsed container header.
    pub fn header(&self) -> &SelfHeader {
        &self.header
    }

    /// Parsed entry-table records.
    pub fn entries(&self) -> &[SelfEntry] {
        &self.entries
    }

    /// Offset of the embedded raw image region.
    pub fn image_offset(&self) -> u64 {
        let meta_end = self.meta_end();
        meta_end + (SELF_IMAGE_ALIGN - meta_end % SELF_IMAGE_ALIGN) % SELF_IMAGE_ALIGN
    }

    /// The embedded image region, alignment tail included.
    pub fn image(&self) -> &[u8] {
        &self.data[self.image_offset() as usize..self.extended_info_offset() as usize]
    }

    /// The parsed extended info record.
    pub fn extended_info(&self) -> Result<ExtendedInfo> {
        ExtendedInfo::parse(&self.data[self.extended_info_offset() as usize..])
    }

    /// The parsed authentication info record.
    pub fn auth_info(&self) -> Result<AuthInfo> {
        let at = self.extended_info_offset() as usize + SELF_EX_INFO_SIZE;
        AuthInfo::parse(&self.data[at..])
    }

    /// The signature region bytes.
    pub fn signature(&self) -> &[u8] {
        let at = self.data.len() - SELF_SIGNATURE_SIZE;
        &self.data[at..]
    }

    /// Whether the signature region holds a spliced blob rather than the
    /// zero-filled placeholder.
    pub fn is_signed(&self) -> bool {
        self.signature().iter().any(|&b| b != 0)
    }

    /// Digest sub-table bytes for the entry at `index`.
    ///
    /// Tables are contiguous after the entry table, in entry order; plain
    /// entries own an empty slice.
    pub fn digest_table(&self, index: usize) -> Result<&[u8]> {
        if index >= self.entries.len() {
            return Err(Error::Elf(format!("no entry at index {index}")));
        }

        let mut at = u64::from(self.header.header_size);
        for entry in &self.entries[..index] {
            at += entry.block_count(self.block_size) * SELF_DIGEST_SIZE as u64;
        }
        let size = self.entries[index].block_count(self.block_size) * SELF_DIGEST_SIZE as u64;
        Ok(&self.data[at as usize..(at + size) as usize])
    }

    /// Recompute every digest and compare against the stored tables.
    ///
    /// Returns `Ok(true)` when the whole-image digest and all per-block
    /// digests match, `Ok(false)` on any mismatch, and an error only for
    /// structural problems (out-of-range entries, wrong digester width).
    pub fn verify(&self, digester: &dyn Digester) -> Result<bool> {
        if digester.output_len() != SELF_DIGEST_SIZE {
            return Err(Error::Config(format!(
                "digester output width {} does not match declared digest size {}",
                digester.output_len(),
                SELF_DIGEST_SIZE
            )));
        }

        let ex_info = self.extended_info()?;
        if digester.digest(self.image()) != ex_info.digest {
            return Ok(false);
        }

        let image_offset = self.image_offset();
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.flags.has_digests {
                continue;
            }
            let start = entry
                .offset
                .checked_sub(image_offset)
                .ok_or_else(|| Error::Elf(format!("entry {index} precedes the image")))?;
            let end = start + entry.size;
            if end > self.image().len() as u64 {
                return Err(Error::Elf(format!("entry {index} exceeds the image")));
            }

            let stored = self.digest_table(index)?;
            let bytes = &self.image()[start as usize..end as usize];
            let recomputed: Vec<u8> =
                digest_blocks(bytes, self.block_size, digester).flatten().collect();
            if stored != recomputed.as_slice() {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn meta_end(&self) -> u64 {
        let mut at = u64::from(self.header.header_size);
        for entry in &self.entries {
            at += entry.block_count(self.block_size) * SELF_DIGEST_SIZE as u64;
        }
        at
    }

    fn extended_info_offset(&self) -> u64 {
        self.data.len() as u64
            - (SELF_SIGNATURE_SIZE + SELF_AUTH_INFO_SIZE + SELF_EX_INFO_SIZE) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sce::digest::Sha256Digester;
    use crate::sce::entry::{plan, SegmentDescriptor};
    use crate::sce::layout::{assemble, AssembledSelf, BuildContext};

    fn sample() -> (AssembledSelf, Vec<u8>) {
        let segments = [
            SegmentDescriptor {
                file_offset: 0,
                size: 0x4000,
                flags: 0x5,
                loadable: true,
                digested: true,
            },
            SegmentDescriptor {
                file_offset: 0x4000,
                size: 0x4801,
                flags: 0x6,
                loadable: true,
                digested: true,
            },
        ];
        let image: Vec<u8> = (0..0x8801u32).map(|i| (i % 239) as u8).collect();
        let entries = plan(&segments, 0x4000).unwrap();
        let out = assemble(
            &entries,
            &image,
            &BuildContext::default(),
            &AuthInfo {
                paid: 0x3100000000000002,
                ..AuthInfo::default()
            },
            &Sha256Digester,
        )
        .unwrap();
        (out, image)
    }

    #[test]
    fn test_parse_recovers_entry_records() {
        let (out, _) = sample();
        let file = SelfFile::parse(&out.bytes).unwrap();

        assert_eq!(file.entries().len(), out.entries.len());
        for (parsed, built) in file.entries().iter().zip(&out.entries) {
            assert_eq!(parsed.offset, built.offset);
            assert_eq!(parsed.size, built.size);
            assert_eq!(parsed.flags, built.flags());
        }
    }

    #[test]
    fn test_parse_rejects_truncated_container() {
        let (out, _) = sample();
        let result = SelfFile::parse(&out.bytes[..out.bytes.len() - 1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_image_region_matches_input() {
        let (out, image) = sample();
        let file = SelfFile::parse(&out.bytes).unwrap();
        assert_eq!(&file.image()[..image.len()], &image[..]);
        assert_eq!(file.image_offset(), out.plan.image_offset());
    }

    #[test]
    fn test_verify_accepts_intact_container() {
        let (out, _) = sample();
        let file = SelfFile::parse(&out.bytes).unwrap();
        assert!(file.verify(&Sha256Digester).unwrap());
    }

    #[test]
    fn test_verify_detects_flipped_image_byte() {
        let (mut out, _) = sample();
        let offset = out.plan.image_offset() as usize + 0x100;
        out.bytes[offset] ^= 0xFF;

        let file = SelfFile::parse(&out.bytes).unwrap();
        assert!(!file.verify(&Sha256Digester).unwrap());
    }

    #[test]
    fn test_unsigned_container_reports_unsigned() {
        let (out, _) = sample();
        let file = SelfFile::parse(&out.bytes).unwrap();
        assert!(!file.is_signed());
    }

    #[test]
    fn test_auth_and_extended_info_roundtrip() {
        let (out, _) = sample();
        let file = SelfFile::parse(&out.bytes).unwrap();

        assert_eq!(file.auth_info().unwrap().paid, 0x3100000000000002);
        let ex = file.extended_info().unwrap();
        assert_eq!(ex.paid, BuildContext::default().paid);
        assert_eq!(ex.ptype, BuildContext::default().ptype);
    }

    #[test]
    fn test_digest_table_offsets_cumulative() {
        let (out, _) = sample();
        let file = SelfFile::parse(&out.bytes).unwrap();

        // entry 0: one block, entry 1: two blocks
        assert_eq!(file.digest_table(0).unwrap().len(), 0x20);
        assert_eq!(file.digest_table(1).unwrap().len(), 0x40);
        assert!(file.digest_table(2).is_err());
    }
}

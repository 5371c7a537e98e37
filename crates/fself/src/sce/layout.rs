//! Two-pass container layout and serialization.
//!
//! ## Structure
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ SELF header (0x20 bytes)           │
//! │  - magic, version, mode, endian    │
//! │  - key type, header/meta sizes     │
//! │  - file size, entry count, flags   │
//! ├────────────────────────────────────┤
//! │ Entry 0 (0x20 bytes)               │
//! │  - flags word, offset, size, rsvd  │
//! ├────────────────────────────────────┤
//! │ ... more entries                   │
//! ├────────────────────────────────────┤
//! │ Digest tables (blocked entries,    │
//! │  entry order, 0x20 per block)      │
//! ├────────────────────────────────────┤
//! │ Embedded raw image (verbatim)      │
//! ├────────────────────────────────────┤
//! │ Extended info (0x40 bytes)         │
//! ├────────────────────────────────────┤
//! │ Auth info (0x88 bytes)             │
//! ├────────────────────────────────────┤
//! │ Signature (0x100 bytes, zeroed     │
//! │  until the backend blob is spliced)│
//! └────────────────────────────────────┘
//! ```
//!
//! The header depends on every other region's final size but is written
//! first, so assembly is two passes: a size pass that produces an explicit
//! [`LayoutPlan`], then a single write pass that serializes against it.
//! All header fields are little-endian.

use super::constants::*;
use super::digest::{digest_blocks, Digester};
use super::entry::EntryInfo;
use super::meta::{AuthInfo, ExtendedInfo};
use crate::{Error, Result};

/// Explicit per-build context, scoped to one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildContext {
    /// Program authentication identifier
    pub paid: u64,
    /// Program type
    pub ptype: u64,
    /// Application version
    pub app_version: u64,
    /// Firmware version
    pub fw_version: u64,
    /// Global block size for segment digesting
    pub block_size: u32,
    /// Header flags word
    pub header_flags: u16,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self {
            // fake-signing defaults from the make_fself lineage
            paid: 0x3100000000000002,
            ptype: 0x1,
            app_version: 0,
            fw_version: 0,
            block_size: SELF_DEFAULT_BLOCK_SIZE,
            header_flags: SELF_HEADER_FLAGS,
        }
    }
}

/// The kind of one laid-out container region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Header,
    EntryTable,
    /// Digest sub-table for the entry at this index
    DigestTable(usize),
    Image,
    ExtendedInfo,
    AuthInfo,
    Signature,
}

/// One region of the final file: kind, resolved offset, byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub offset: u64,
    pub size: u64,
}

/// The resolved layout of a container, produced by the size pass.
///
/// Regions appear in written order. The write pass and the signature shim
/// consume this instead of patching shared header state.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    pub regions: Vec<Region>,
    /// Declared header size: header plus entry table
    pub header_size: u16,
    /// Declared metadata size: total digest-table bytes
    pub meta_size: u16,
    /// Total container file size
    pub file_size: u64,
}

impl LayoutPlan {
    /// Find a region by kind.
    pub fn find(&self, kind: RegionKind) -> Option<&Region> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// Offset of the embedded raw image.
    pub fn image_offset(&self) -> u64 {
        self.find(RegionKind::Image).map(|r| r.offset).unwrap_or(0)
    }

    /// The reserved signature region.
    pub fn signature_region(&self) -> Region {
        // the size pass always appends it last
        *self.regions.last().expect("layout plan has regions")
    }

    /// Compute the layout for `entries` over an image of `image_len` bytes.
    ///
    /// Returns the plan together with the entries rebased to their final
    /// container offsets. Input entries carry image-relative offsets and
    /// are left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSegment`] if an entry's range lies outside the image
    /// - [`Error::LayoutOverflow`] if a declared header field cannot hold
    ///   its computed value or offset arithmetic overflows
    pub fn compute(entries: &[EntryInfo], image_len: u64) -> Result<(Self, Vec<EntryInfo>)> {
        let mut regions = Vec::with_capacity(entries.len() + 6);

        regions.push(Region {
            kind: RegionKind::Header,
            offset: 0,
            size: SELF_HEADER_SIZE as u64,
        });

        let entry_table_size = (entries.len() as u64)
            .checked_mul(SELF_ENTRY_SIZE as u64)
            .ok_or_else(|| Error::LayoutOverflow("entry table size".into()))?;
        regions.push(Region {
            kind: RegionKind::EntryTable,
            offset: SELF_HEADER_SIZE as u64,
            size: entry_table_size,
        });

        let header_size = SELF_HEADER_SIZE as u64 + entry_table_size;
        let header_size = u16::try_from(header_size).map_err(|_| {
            Error::LayoutOverflow(format!(
                "declared header size {header_size:#x} exceeds the 16-bit header field"
            ))
        })?;

        let mut cursor = u64::from(header_size);
        let mut meta_total: u64 = 0;
        for (index, entry) in entries.iter().enumerate() {
            if !entry.has_digest {
                continue;
            }
            let table_size = entry
                .block_count
                .checked_mul(SELF_DIGEST_SIZE as u64)
                .ok_or_else(|| Error::LayoutOverflow("digest table size".into()))?;
            regions.push(Region {
                kind: RegionKind::DigestTable(index),
                offset: cursor,
                size: table_size,
            });
            cursor = cursor
                .checked_add(table_size)
                .ok_or_else(|| Error::LayoutOverflow("digest table offset".into()))?;
            meta_total += table_size;
        }
        let meta_size = u16::try_from(meta_total).map_err(|_| {
            Error::LayoutOverflow(format!(
                "declared metadata size {meta_total:#x} exceeds the 16-bit header field"
            ))
        })?;

        let image_offset = align_up(cursor, SELF_IMAGE_ALIGN)?;
        regions.push(Region {
            kind: RegionKind::Image,
            offset: image_offset,
            size: image_len,
        });

        let mut rebased = Vec::with_capacity(entries.len());
        for entry in entries {
            let end = entry
                .offset
                .checked_add(entry.size)
                .ok_or_else(|| Error::LayoutOverflow("segment extent".into()))?;
            if end > image_len {
                return Err(Error::InvalidSegment(format!(
                    "segment range {:#x}..{end:#x} lies outside the {image_len:#x}-byte image",
                    entry.offset
                )));
            }
            let mut moved = *entry;
            moved.offset = image_offset
                .checked_add(entry.offset)
                .ok_or_else(|| Error::LayoutOverflow("entry offset".into()))?;
            rebased.push(moved);
        }

        let image_end = image_offset
            .checked_add(image_len)
            .ok_or_else(|| Error::LayoutOverflow("image extent".into()))?;
        let ex_info_offset = align_up(image_end, 8)?;
        regions.push(Region {
            kind: RegionKind::ExtendedInfo,
            offset: ex_info_offset,
            size: SELF_EX_INFO_SIZE as u64,
        });

        let auth_offset = ex_info_offset + SELF_EX_INFO_SIZE as u64;
        regions.push(Region {
            kind: RegionKind::AuthInfo,
            offset: auth_offset,
            size: SELF_AUTH_INFO_SIZE as u64,
        });

        let signature_offset = auth_offset + SELF_AUTH_INFO_SIZE as u64;
        regions.push(Region {
            kind: RegionKind::Signature,
            offset: signature_offset,
            size: SELF_SIGNATURE_SIZE as u64,
        });

        let file_size = signature_offset
            .checked_add(SELF_SIGNATURE_SIZE as u64)
            .ok_or_else(|| Error::LayoutOverflow("file size".into()))?;

        Ok((
            Self {
                regions,
                header_size,
                meta_size,
                file_size,
            },
            rebased,
        ))
    }
}

/// The SELF container header (0x20 bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfHeader {
    pub version: u8,
    pub mode: u8,
    pub endianness: u8,
    pub attributes: u8,
    pub key_type: u32,
    pub header_size: u16,
    pub meta_size: u16,
    pub file_size: u64,
    pub entry_count: u16,
    pub flags: u16,
}

impl SelfHeader {
    /// Serialize to the on-disk layout, magic first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SELF_HEADER_SIZE);
        buf.extend(&SELF_MAGIC);
        buf.push(self.version);
        buf.push(self.mode);
        buf.push(self.endianness);
        buf.push(self.attributes);
        buf.extend(&self.key_type.to_le_bytes());
        buf.extend(&self.header_size.to_le_bytes());
        buf.extend(&self.meta_size.to_le_bytes());
        buf.extend(&self.file_size.to_le_bytes());
        buf.extend(&self.entry_count.to_le_bytes());
        buf.extend(&self.flags.to_le_bytes());
        buf.extend(&0u32.to_le_bytes()); // reserved
        buf
    }

    /// Parse a header from the start of container bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SELF_HEADER_SIZE {
            return Err(Error::Elf(format!(
                "truncated SELF header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != SELF_MAGIC {
            return Err(Error::Elf("bad SELF magic".into()));
        }

        Ok(Self {
            version: bytes[4],
            mode: bytes[5],
            endianness: bytes[6],
            attributes: bytes[7],
            key_type: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            header_size: u16::from_le_bytes(bytes[12..14].try_into().unwrap()),
            meta_size: u16::from_le_bytes(bytes[14..16].try_into().unwrap()),
            file_size: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            entry_count: u16::from_le_bytes(bytes[24..26].try_into().unwrap()),
            flags: u16::from_le_bytes(bytes[26..28].try_into().unwrap()),
        })
    }
}

/// A fully assembled (but not yet signed) container.
#[derive(Debug)]
pub struct AssembledSelf {
    /// Container bytes with a zero-filled signature placeholder
    pub bytes: Vec<u8>,
    /// The layout the bytes were written against
    pub plan: LayoutPlan,
    /// Entries rebased to final container offsets
    pub entries: Vec<EntryInfo>,
}

/// Assemble a container from planned entries and a finalized raw image.
///
/// Runs the size pass, then serializes every region in written order. The
/// signature region is zero-filled; [`super::signature::embed_signature`]
/// splices the backend blob in afterwards.
///
/// `entries` must carry image-relative offsets as produced by
/// [`super::entry::plan`]; the same image the upstream writer produced is
/// embedded verbatim.
pub fn assemble(
    entries: &[EntryInfo],
    image: &[u8],
    ctx: &BuildContext,
    auth: &AuthInfo,
    digester: &dyn Digester,
) -> Result<AssembledSelf> {
    if digester.output_len() != SELF_DIGEST_SIZE {
        return Err(Error::Config(format!(
            "digester output width {} does not match declared digest size {}",
            digester.output_len(),
            SELF_DIGEST_SIZE
        )));
    }

    let (plan, rebased) = LayoutPlan::compute(entries, image.len() as u64)?;
    tracing::debug!(
        entries = entries.len(),
        meta_size = plan.meta_size,
        file_size = plan.file_size,
        "computed container layout"
    );

    let header = SelfHeader {
        version: SELF_VERSION,
        mode: SELF_MODE,
        endianness: SELF_ENDIANNESS,
        attributes: SELF_ATTRIBUTES,
        key_type: SELF_KEY_TYPE,
        header_size: plan.header_size,
        meta_size: plan.meta_size,
        file_size: plan.file_size,
        entry_count: entries.len() as u16,
        flags: ctx.header_flags,
    };

    let mut buf = Vec::with_capacity(plan.file_size as usize);
    buf.extend(header.to_bytes());

    for entry in &rebased {
        buf.extend(&entry.flags().pack()?.to_le_bytes());
        buf.extend(&entry.offset.to_le_bytes());
        buf.extend(&entry.size.to_le_bytes());
        buf.extend(&0u64.to_le_bytes()); // reserved
    }

    // digest tables, contiguous, in entry order; slicing uses the
    // image-relative offsets
    for entry in entries {
        if !entry.has_digest {
            continue;
        }
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        for digest in digest_blocks(&image[start..end], entry.block_size, digester) {
            buf.extend(digest);
        }
    }

    buf.resize(plan.image_offset() as usize, 0);
    buf.extend(image);

    let ex_region = plan
        .find(RegionKind::ExtendedInfo)
        .expect("layout plan has an extended info region");
    buf.resize(ex_region.offset as usize, 0);
    // the whole-image digest covers the image region as written, alignment
    // tail included, so a reader can recompute it from the container alone
    let ex_info = ExtendedInfo::for_image(
        ctx.paid,
        ctx.ptype,
        ctx.app_version,
        ctx.fw_version,
        &buf[plan.image_offset() as usize..],
        digester,
    )?;
    buf.extend(ex_info.to_bytes());
    buf.extend(auth.to_bytes());

    buf.resize(plan.file_size as usize, 0);
    debug_assert_eq!(buf.len() as u64, plan.file_size);

    Ok(AssembledSelf {
        bytes: buf,
        plan,
        entries: rebased,
    })
}

fn align_up(value: u64, align: u64) -> Result<u64> {
    let rem = value % align;
    if rem == 0 {
        return Ok(value);
    }
    value
        .checked_add(align - rem)
        .ok_or_else(|| Error::LayoutOverflow("alignment padding".into()))
}

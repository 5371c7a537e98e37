//! SELF container constants and magic numbers
//!
//! These constants define the binary format of the SELF container: header
//! identification bytes, fixed structure sizes, and the bit layout of the
//! per-entry flags word.

// =============================================================================
// Header identification
// =============================================================================

/// SELF magic bytes at offset 0
pub const SELF_MAGIC: [u8; 4] = [0x4F, 0x15, 0x3D, 0x1D];

/// Container format version
pub const SELF_VERSION: u8 = 0x00;

/// Container mode byte
pub const SELF_MODE: u8 = 0x01;

/// Endianness byte (1 = little-endian)
pub const SELF_ENDIANNESS: u8 = 0x01;

/// Attribute byte
pub const SELF_ATTRIBUTES: u8 = 0x12;

/// Key-type identifier
pub const SELF_KEY_TYPE: u32 = 0x101;

/// Default header flags word
pub const SELF_HEADER_FLAGS: u16 = 0x02;

// =============================================================================
// Fixed structure sizes
// =============================================================================

/// SELF header size in bytes
pub const SELF_HEADER_SIZE: usize = 0x20;

/// Entry table stride: one serialized entry (flags, offset, size, reserved)
pub const SELF_ENTRY_SIZE: usize = 0x20;

/// Extended info size (paid, ptype, versions, whole-image digest)
pub const SELF_EX_INFO_SIZE: usize = 0x40;

/// Authentication info size (paid, capability words, attribute words, pad)
pub const SELF_AUTH_INFO_SIZE: usize = 0x88;

/// Reserved signature region size
pub const SELF_SIGNATURE_SIZE: usize = 0x100;

/// Width of one block digest in the metadata tables
pub const SELF_DIGEST_SIZE: usize = 0x20;

/// Default block size for segment digesting
pub const SELF_DEFAULT_BLOCK_SIZE: u32 = 0x4000;

/// Alignment of the embedded raw image within the container
pub const SELF_IMAGE_ALIGN: u64 = 0x10;

// =============================================================================
// Entry flags word bit layout
// =============================================================================

/// Entry payload is split into fixed-size blocks
pub const SELF_PROPERTY_HAS_BLOCKS: u64 = 0x01;

/// Entry declares the container's block size
pub const SELF_PROPERTY_BLOCK_SIZE: u64 = 0x02;

/// Entry has a per-block digest table in the metadata region
pub const SELF_PROPERTY_HAS_DIGESTS: u64 = 0x04;

/// 4-bit segment index field (bits 8-11)
pub const SELF_PROPERTY_SEGMENT_INDEX: u64 = 0x0F00;

/// Shift of the segment index field
pub const SELF_PROPERTY_SEGMENT_INDEX_SHIFT: u32 = 8;

/// Highest representable segment index
pub const SELF_MAX_SEGMENT_INDEX: usize = 15;

//! ELF parsing into segment descriptors using goblin

use crate::sce::entry::SegmentDescriptor;
use crate::{Error, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use std::path::Path;

/// A parsed ELF executable, ready to be wrapped into a container.
///
/// The raw file bytes become the embedded image verbatim; one descriptor is
/// derived per program header with file content. `PT_LOAD` headers are
/// loadable, block-digested segments, everything else becomes a
/// metadata-only plain entry.
pub struct ElfImage {
    /// Raw file data
    data: Vec<u8>,
    /// Derived segment descriptors, in program-header order
    segments: Vec<SegmentDescriptor>,
}

impl ElfImage {
    /// Open and parse an ELF file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(data)
    }

    /// Parse an ELF from bytes
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let segments = {
            let elf = Elf::parse(&data).map_err(|e| Error::Elf(format!("Failed to parse: {e}")))?;

            let mut segments = Vec::with_capacity(elf.program_headers.len());
            for (i, ph) in elf.program_headers.iter().enumerate() {
                if ph.p_filesz == 0 {
                    continue;
                }
                let end = ph.p_offset.checked_add(ph.p_filesz).ok_or_else(|| {
                    Error::Elf(format!("program header {i} extent overflows"))
                })?;
                if end > data.len() as u64 {
                    return Err(Error::Elf(format!(
                        "program header {i} range {:#x}..{end:#x} exceeds the {:#x}-byte file",
                        ph.p_offset,
                        data.len()
                    )));
                }

                let loadable = ph.p_type == PT_LOAD;
                segments.push(SegmentDescriptor {
                    file_offset: ph.p_offset,
                    size: ph.p_filesz,
                    flags: ph.p_flags,
                    loadable,
                    digested: loadable,
                });
            }
            segments
        };

        if segments.is_empty() {
            return Err(Error::Elf(
                "no program segments with file content to wrap".into(),
            ));
        }

        Ok(Self { data, segments })
    }

    /// Get raw file data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get derived segment descriptors
    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend(&v.to_le_bytes());
    }
    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend(&v.to_le_bytes());
    }
    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend(&v.to_le_bytes());
    }

    /// A minimal ELF64 executable: one PT_LOAD covering the headers plus
    /// text, one PT_NOTE, 0x200 bytes total.
    fn minimal_elf() -> Vec<u8> {
        let mut buf = Vec::with_capacity(0x200);

        // e_ident
        buf.extend(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
        buf.extend(&[0u8; 8]);
        push_u16(&mut buf, 2); // e_type = ET_EXEC
        push_u16(&mut buf, 0x3E); // e_machine = EM_X86_64
        push_u32(&mut buf, 1); // e_version
        push_u64(&mut buf, 0x400000); // e_entry
        push_u64(&mut buf, 0x40); // e_phoff
        push_u64(&mut buf, 0); // e_shoff
        push_u32(&mut buf, 0); // e_flags
        push_u16(&mut buf, 0x40); // e_ehsize
        push_u16(&mut buf, 0x38); // e_phentsize
        push_u16(&mut buf, 2); // e_phnum
        push_u16(&mut buf, 0); // e_shentsize
        push_u16(&mut buf, 0); // e_shnum
        push_u16(&mut buf, 0); // e_shstrndx

        // PT_LOAD r-x: file 0x0..0x180
        push_u32(&mut buf, 1);
        push_u32(&mut buf, 0x5);
        push_u64(&mut buf, 0);
        push_u64(&mut buf, 0x400000);
        push_u64(&mut buf, 0x400000);
        push_u64(&mut buf, 0x180);
        push_u64(&mut buf, 0x180);
        push_u64(&mut buf, 0x1000);

        // PT_NOTE r--: file 0x180..0x200
        push_u32(&mut buf, 4);
        push_u32(&mut buf, 0x4);
        push_u64(&mut buf, 0x180);
        push_u64(&mut buf, 0x400180);
        push_u64(&mut buf, 0x400180);
        push_u64(&mut buf, 0x80);
        push_u64(&mut buf, 0x80);
        push_u64(&mut buf, 0x8);

        buf.resize(0x200, 0x90);
        buf
    }

    #[test]
    fn test_parse_derives_descriptors() {
        let image = ElfImage::parse(minimal_elf()).unwrap();

        assert_eq!(image.segments().len(), 2);
        let load = &image.segments()[0];
        assert_eq!(load.file_offset, 0);
        assert_eq!(load.size, 0x180);
        assert!(load.loadable);
        assert!(load.digested);

        let note = &image.segments()[1];
        assert_eq!(note.file_offset, 0x180);
        assert!(!note.loadable);
        assert!(!note.digested);
    }

    #[test]
    fn test_parse_keeps_raw_bytes() {
        let bytes = minimal_elf();
        let image = ElfImage::parse(bytes.clone()).unwrap();
        assert_eq!(image.data(), bytes.as_slice());
    }

    #[test]
    fn test_parse_rejects_non_elf() {
        let result = ElfImage::parse(vec![0; 100]);
        assert!(matches!(result, Err(Error::Elf(_))));
    }

    #[test]
    fn test_parse_rejects_truncated_segment() {
        let mut bytes = minimal_elf();
        bytes.truncate(0x1F0); // second segment now reaches past the end
        let result = ElfImage::parse(bytes);
        assert!(matches!(result, Err(Error::Elf(_))));
    }
}

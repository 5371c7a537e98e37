//! SELF builder API
//!
//! Provides a builder pattern interface for wrapping executable images into
//! signed containers. The builder owns the per-build context (program
//! identifiers, versions, block size) and the optional signing backend;
//! with no backend configured it emits the unsigned artifact with a
//! zero-filled signature placeholder.

use crate::elf::ElfImage;
use crate::sce::digest::{Digester, Sha256Digester};
use crate::sce::entry::{plan, SegmentDescriptor};
use crate::sce::layout::{assemble, BuildContext};
use crate::sce::meta::AuthInfo;
use crate::sce::signature::{embed_signature, Signer};
use crate::Result;
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// SELF container builder with chained setters.
///
/// # Example
///
/// ```ignore
/// use fself::SelfBuilder;
///
/// SelfBuilder::new()
///     .paid(0x3100000000000002)
///     .app_version(0x1000000)
///     .wrap_elf_file("eboot.elf", "eboot.self")?;
/// ```
#[derive(Clone)]
pub struct SelfBuilder {
    ctx: BuildContext,
    caps: [u64; 4],
    attrs: [u64; 4],
    signer: Option<Arc<dyn Signer>>,
    digester: Arc<dyn Digester>,
}

impl SelfBuilder {
    /// Create a builder with the fake-signing defaults.
    pub fn new() -> Self {
        Self {
            ctx: BuildContext::default(),
            caps: [0; 4],
            attrs: [0; 4],
            signer: None,
            digester: Arc::new(Sha256Digester),
        }
    }

    /// Set the program authentication identifier.
    pub fn paid(mut self, paid: u64) -> Self {
        self.ctx.paid = paid;
        self
    }

    /// Set the program type.
    pub fn program_type(mut self, ptype: u64) -> Self {
        self.ctx.ptype = ptype;
        self
    }

    /// Set the application version.
    pub fn app_version(mut self, version: u64) -> Self {
        self.ctx.app_version = version;
        self
    }

    /// Set the firmware version.
    pub fn fw_version(mut self, version: u64) -> Self {
        self.ctx.fw_version = version;
        self
    }

    /// Set the authentication capability words.
    pub fn capabilities(mut self, caps: [u64; 4]) -> Self {
        self.caps = caps;
        self
    }

    /// Set the authentication attribute words.
    pub fn attributes(mut self, attrs: [u64; 4]) -> Self {
        self.attrs = attrs;
        self
    }

    /// Set the global block size for segment digesting.
    ///
    /// Must be a power of two; validated when a build runs.
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.ctx.block_size = block_size;
        self
    }

    /// Set the header flags word.
    pub fn header_flags(mut self, flags: u16) -> Self {
        self.ctx.header_flags = flags;
        self
    }

    /// Set the signing backend.
    ///
    /// Without one, builds complete with the zero-filled placeholder.
    pub fn signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    /// Replace the block digester (SHA-256 by default).
    ///
    /// The output width must match the container's declared digest size.
    pub fn digester(mut self, digester: impl Digester + 'static) -> Self {
        self.digester = Arc::new(digester);
        self
    }

    /// The authentication info this builder signs with.
    pub fn auth_info(&self) -> AuthInfo {
        AuthInfo {
            paid: self.ctx.paid,
            caps: self.caps,
            attrs: self.attrs,
        }
    }

    /// Build a container from segment descriptors and a finalized raw image.
    ///
    /// Runs the full pipeline: plan entries, assemble the two-pass layout,
    /// then splice the backend signature if a signer is configured. A
    /// failing build yields no buffer.
    pub fn build(&self, segments: &[SegmentDescriptor], image: &[u8]) -> Result<Vec<u8>> {
        let entries = plan(segments, self.ctx.block_size)?;
        tracing::debug!(
            segments = segments.len(),
            indexable = entries.iter().filter(|e| e.is_segment).count(),
            "planned container entries"
        );

        let auth = self.auth_info();
        let mut out = assemble(&entries, image, &self.ctx, &auth, self.digester.as_ref())?;

        if let Some(signer) = &self.signer {
            embed_signature(
                &mut out.bytes,
                &out.plan,
                &auth.to_bytes(),
                self.ctx.paid,
                signer.as_ref(),
            )?;
        }

        Ok(out.bytes)
    }

    /// Build a container around ELF bytes.
    ///
    /// Derives segment descriptors from the program headers and embeds the
    /// ELF verbatim as the raw image.
    pub fn wrap_elf(&self, elf_bytes: Vec<u8>) -> Result<Vec<u8>> {
        let image = ElfImage::parse(elf_bytes)?;
        self.build(image.segments(), image.data())
    }

    /// Wrap an ELF file into a container file.
    pub fn wrap_elf_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        let file = File::open(input.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };

        let bytes = self.wrap_elf(mmap.to_vec())?;
        std::fs::write(output.as_ref(), &bytes)?;
        tracing::info!(
            input = %input.as_ref().display(),
            output = %output.as_ref().display(),
            size = bytes.len(),
            "wrapped executable"
        );
        Ok(())
    }

    /// Wrap many ELF files, one container per input, in parallel.
    ///
    /// Builds are independent — each gets its own buffer and its own
    /// signing call — so they run across threads without locking. Results
    /// come back in job order.
    pub fn wrap_elf_files<P, Q>(&self, jobs: &[(P, Q)]) -> Vec<Result<()>>
    where
        P: AsRef<Path> + Sync,
        Q: AsRef<Path> + Sync,
    {
        jobs.par_iter()
            .map(|(input, output)| self.wrap_elf_file(input, output))
            .collect()
    }
}

impl Default for SelfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sce::constants::{SELF_DEFAULT_BLOCK_SIZE, SELF_SIGNATURE_SIZE};
    use crate::sce::reader::SelfFile;
    use crate::Error;

    struct XorSigner;

    impl Signer for XorSigner {
        fn sign(&self, auth_info: &[u8], paid: u64) -> Result<Vec<u8>> {
            let mut blob = vec![0u8; SELF_SIGNATURE_SIZE];
            for (i, &b) in auth_info.iter().enumerate() {
                blob[i % SELF_SIGNATURE_SIZE] ^= b ^ (paid as u8);
            }
            Ok(blob)
        }
    }

    fn segments() -> Vec<SegmentDescriptor> {
        vec![
            SegmentDescriptor {
                file_offset: 0,
                size: 0x4000,
                flags: 0x5,
                loadable: true,
                digested: true,
            },
            SegmentDescriptor {
                file_offset: 0x4000,
                size: 0x100,
                flags: 0x4,
                loadable: false,
                digested: false,
            },
        ]
    }

    fn image() -> Vec<u8> {
        (0..0x4100u32).map(|i| (i % 249) as u8).collect()
    }

    #[test]
    fn test_builder_defaults() {
        let builder = SelfBuilder::default();
        assert_eq!(builder.ctx.block_size, SELF_DEFAULT_BLOCK_SIZE);
        assert!(builder.signer.is_none());
        assert_eq!(builder.auth_info().caps, [0; 4]);
    }

    #[test]
    fn test_builder_chain() {
        let builder = SelfBuilder::new()
            .paid(0x3800000000000010)
            .program_type(0x4)
            .app_version(0x5050000)
            .capabilities([0x40, 0, 0, 0]);

        assert_eq!(builder.ctx.paid, 0x3800000000000010);
        assert_eq!(builder.ctx.ptype, 0x4);
        assert_eq!(builder.auth_info().paid, 0x3800000000000010);
        assert_eq!(builder.auth_info().caps[0], 0x40);
    }

    #[test]
    fn test_build_unsigned_round_trip() {
        let bytes = SelfBuilder::new().build(&segments(), &image()).unwrap();

        let file = SelfFile::parse(&bytes).unwrap();
        assert_eq!(file.entries().len(), 2);
        assert!(!file.is_signed());
        assert!(file.verify(&Sha256Digester).unwrap());
    }

    #[test]
    fn test_build_signed_fills_signature_region() {
        let bytes = SelfBuilder::new()
            .signer(XorSigner)
            .build(&segments(), &image())
            .unwrap();

        let file = SelfFile::parse(&bytes).unwrap();
        assert!(file.is_signed());
    }

    #[test]
    fn test_build_idempotent_with_deterministic_signer() {
        let builder = SelfBuilder::new().signer(XorSigner);
        let first = builder.build(&segments(), &image()).unwrap();
        let second = builder.build(&segments(), &image()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_propagates_planner_errors() {
        let bad = vec![SegmentDescriptor {
            file_offset: 0,
            size: 0,
            flags: 0x5,
            loadable: true,
            digested: true,
        }];
        let result = SelfBuilder::new().build(&bad, &image());
        assert!(matches!(result, Err(Error::InvalidSegment(_))));
    }

    #[test]
    fn test_custom_block_size() {
        let bytes = SelfBuilder::new()
            .block_size(0x1000)
            .build(&segments(), &image())
            .unwrap();

        let file = SelfFile::parse_with_block_size(&bytes, 0x1000).unwrap();
        // 0x4000 bytes at 0x1000 granularity
        assert_eq!(file.entries()[0].block_count(0x1000), 4);
        assert!(file.verify(&Sha256Digester).unwrap());
    }
}

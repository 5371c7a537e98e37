//! Signature integration for assembled containers.
//!
//! The signing backend is consumed as one opaque operation: it turns the
//! serialized authentication info plus the program authentication
//! identifier into a fixed-size signature blob. Key management, algorithm
//! choice, and any retry or deadline policy live entirely behind the
//! [`Signer`] trait.

use super::constants::SELF_SIGNATURE_SIZE;
use super::layout::LayoutPlan;
use crate::{Error, Result};

/// External signing backend.
///
/// Implementations may be network-bound internally; the build blocks until
/// `sign` returns. A backend that enforces its own deadline reports expiry
/// as [`Error::SigningFailed`].
pub trait Signer: Send + Sync {
    /// Produce a signature blob over the authentication bytes, scoped by
    /// the program authentication identifier.
    fn sign(&self, auth_info: &[u8], paid: u64) -> Result<Vec<u8>>;
}

/// Splice the backend's signature into an assembled container.
///
/// Calls the backend exactly once. The buffer is only written after the
/// returned blob's length has been checked against the reserved region, so
/// a failing call leaves the zero-filled placeholder untouched and the
/// caller may still emit the unsigned artifact.
///
/// # Errors
///
/// - [`Error::SignatureSizeMismatch`] if the blob length is not the
///   reserved region size
/// - whatever the backend returned, typically [`Error::SigningFailed`]
pub fn embed_signature(
    buf: &mut [u8],
    plan: &LayoutPlan,
    auth_bytes: &[u8],
    paid: u64,
    signer: &dyn Signer,
) -> Result<()> {
    let region = plan.signature_region();
    let blob = signer.sign(auth_bytes, paid)?;

    if blob.len() != SELF_SIGNATURE_SIZE {
        return Err(Error::SignatureSizeMismatch {
            expected: SELF_SIGNATURE_SIZE,
            actual: blob.len(),
        });
    }

    let start = region.offset as usize;
    buf[start..start + SELF_SIGNATURE_SIZE].copy_from_slice(&blob);
    tracing::debug!(offset = region.offset, "spliced signature blob");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sce::digest::Sha256Digester;
    use crate::sce::entry::{plan, SegmentDescriptor};
    use crate::sce::layout::{assemble, BuildContext};
    use crate::sce::meta::AuthInfo;

    struct FixedSigner(Vec<u8>);

    impl Signer for FixedSigner {
        fn sign(&self, _auth_info: &[u8], _paid: u64) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSigner;

    impl Signer for FailingSigner {
        fn sign(&self, _auth_info: &[u8], _paid: u64) -> Result<Vec<u8>> {
            Err(Error::SigningFailed("backend unavailable".into()))
        }
    }

    fn assembled() -> crate::sce::layout::AssembledSelf {
        let segments = [SegmentDescriptor {
            file_offset: 0,
            size: 0x4000,
            flags: 0x5,
            loadable: true,
            digested: true,
        }];
        let entries = plan(&segments, 0x4000).unwrap();
        let image = vec![0x42u8; 0x4000];
        assemble(
            &entries,
            &image,
            &BuildContext::default(),
            &AuthInfo::default(),
            &Sha256Digester,
        )
        .unwrap()
    }

    #[test]
    fn test_embed_signature_splices_blob() {
        let mut out = assembled();
        let auth_bytes = AuthInfo::default().to_bytes();
        let signer = FixedSigner(vec![0xA5; SELF_SIGNATURE_SIZE]);

        embed_signature(&mut out.bytes, &out.plan, &auth_bytes, 0x10, &signer).unwrap();

        let region = out.plan.signature_region();
        let sig = &out.bytes[region.offset as usize..(region.offset + region.size) as usize];
        assert!(sig.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn test_embed_signature_wrong_length_leaves_placeholder() {
        let mut out = assembled();
        let before = out.bytes.clone();
        let auth_bytes = AuthInfo::default().to_bytes();
        let signer = FixedSigner(vec![0xA5; SELF_SIGNATURE_SIZE - 1]);

        let result = embed_signature(&mut out.bytes, &out.plan, &auth_bytes, 0x10, &signer);
        assert!(matches!(
            result,
            Err(Error::SignatureSizeMismatch {
                expected: 0x100,
                actual: 0xFF,
            })
        ));
        assert_eq!(out.bytes, before);
    }

    #[test]
    fn test_embed_signature_backend_failure_propagates() {
        let mut out = assembled();
        let before = out.bytes.clone();
        let auth_bytes = AuthInfo::default().to_bytes();

        let result = embed_signature(&mut out.bytes, &out.plan, &auth_bytes, 0x10, &FailingSigner);
        assert!(matches!(result, Err(Error::SigningFailed(_))));
        assert_eq!(out.bytes, before);
    }
}

//! Authentication and extended info records.
//!
//! Both are fixed-size little-endian structures appended after the embedded
//! image. [`ExtendedInfo`] carries a digest of the *whole* raw image, so it
//! can only be computed once the image bytes are final; the serialized
//! [`AuthInfo`] is in turn what the signing backend signs.

use super::constants::{SELF_AUTH_INFO_SIZE, SELF_DIGEST_SIZE, SELF_EX_INFO_SIZE};
use super::digest::Digester;
use crate::{Error, Result};

/// Program authentication info (136 bytes on disk).
///
/// Produced by caller policy; the builder serializes it verbatim and hands
/// the bytes to the signing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthInfo {
    /// Program authentication identifier
    pub paid: u64,
    /// Capability words
    pub caps: [u64; 4],
    /// Attribute words
    pub attrs: [u64; 4],
}

impl AuthInfo {
    /// Serialize to the on-disk layout: paid, caps, attrs, 64 reserved
    /// zero bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SELF_AUTH_INFO_SIZE);
        buf.extend(&self.paid.to_le_bytes());
        for cap in &self.caps {
            buf.extend(&cap.to_le_bytes());
        }
        for attr in &self.attrs {
            buf.extend(&attr.to_le_bytes());
        }
        buf.resize(SELF_AUTH_INFO_SIZE, 0);
        buf
    }

    /// Parse from the on-disk layout.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SELF_AUTH_INFO_SIZE {
            return Err(Error::Elf(format!(
                "truncated auth info: {} bytes",
                bytes.len()
            )));
        }

        let word = |i: usize| u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap());
        Ok(Self {
            paid: word(0),
            caps: [word(1), word(2), word(3), word(4)],
            attrs: [word(5), word(6), word(7), word(8)],
        })
    }
}

/// Extended program info (64 bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedInfo {
    /// Program authentication identifier
    pub paid: u64,
    /// Program type
    pub ptype: u64,
    /// Application version
    pub app_version: u64,
    /// Firmware version
    pub fw_version: u64,
    /// Digest over the entire embedded raw image
    pub digest: [u8; SELF_DIGEST_SIZE],
}

impl ExtendedInfo {
    /// Build extended info for a finalized raw image.
    ///
    /// The digest covers every byte of `image`; call this only after the
    /// image bytes are final.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the digester's output width does not
    /// match the container's declared digest size.
    pub fn for_image(
        paid: u64,
        ptype: u64,
        app_version: u64,
        fw_version: u64,
        image: &[u8],
        digester: &dyn Digester,
    ) -> Result<Self> {
        let digest: [u8; SELF_DIGEST_SIZE] =
            digester.digest(image).try_into().map_err(|_| {
                Error::Config(format!(
                    "digester output width {} does not match declared digest size {}",
                    digester.output_len(),
                    SELF_DIGEST_SIZE
                ))
            })?;

        Ok(Self {
            paid,
            ptype,
            app_version,
            fw_version,
            digest,
        })
    }

    /// Serialize to the on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SELF_EX_INFO_SIZE);
        buf.extend(&self.paid.to_le_bytes());
        buf.extend(&self.ptype.to_le_bytes());
        buf.extend(&self.app_version.to_le_bytes());
        buf.extend(&self.fw_version.to_le_bytes());
        buf.extend(&self.digest);
        buf
    }

    /// Parse from the on-disk layout.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SELF_EX_INFO_SIZE {
            return Err(Error::Elf(format!(
                "truncated extended info: {} bytes",
                bytes.len()
            )));
        }

        Ok(Self {
            paid: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            ptype: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            app_version: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            fw_version: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            digest: bytes[32..64].try_into().unwrap(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sce::digest::Sha256Digester;

    #[test]
    fn test_auth_info_size_and_layout() {
        let auth = AuthInfo {
            paid: 0x3100000000000002,
            caps: [0x40, 0, 0, 0],
            attrs: [0xC0, 0, 0, 0],
        };

        let bytes = auth.to_bytes();
        assert_eq!(bytes.len(), SELF_AUTH_INFO_SIZE);
        assert_eq!(&bytes[0..8], &0x3100000000000002u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x40u64.to_le_bytes());
        assert_eq!(&bytes[40..48], &0xC0u64.to_le_bytes());
        // reserved tail is zero-filled
        assert!(bytes[72..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_extended_info_size_and_digest() {
        let image = vec![0x5au8; 0x200];
        let digester = Sha256Digester;
        let ex = ExtendedInfo::for_image(0x10, 0x1, 0x1000000, 0x4508101, &image, &digester)
            .unwrap();

        let bytes = ex.to_bytes();
        assert_eq!(bytes.len(), SELF_EX_INFO_SIZE);
        assert_eq!(&bytes[0..8], &0x10u64.to_le_bytes());
        assert_eq!(&bytes[32..64], digester.digest(&image).as_slice());
    }

    #[test]
    fn test_auth_info_parse_roundtrip() {
        let auth = AuthInfo {
            paid: 0x3800000000000011,
            caps: [1, 2, 3, 4],
            attrs: [5, 6, 7, 8],
        };
        assert_eq!(AuthInfo::parse(&auth.to_bytes()).unwrap(), auth);
    }

    #[test]
    fn test_extended_info_parse_roundtrip() {
        let ex = ExtendedInfo::for_image(7, 1, 2, 3, b"image", &Sha256Digester).unwrap();
        assert_eq!(ExtendedInfo::parse(&ex.to_bytes()).unwrap(), ex);
    }

    #[test]
    fn test_extended_info_rejects_wrong_digest_width() {
        struct Short;
        impl Digester for Short {
            fn output_len(&self) -> usize {
                16
            }
            fn digest(&self, _data: &[u8]) -> Vec<u8> {
                vec![0; 16]
            }
        }

        let result = ExtendedInfo::for_image(0, 0, 0, 0, &[1, 2, 3], &Short);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

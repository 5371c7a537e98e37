//! Error types for SELF container builds.
//!
//! This module defines the [`enum@Error`] enum covering all failure cases
//! in container construction: malformed input segments, layout arithmetic
//! overflow, and signing-backend failures.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for SELF container builds.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses
/// this error type. A failing build never yields a partial container; match
/// on variants to decide between aborting and emitting an unsigned artifact.
///
/// # Examples
///
/// ```no_run
/// use fself::{SelfBuilder, Error};
///
/// let result = SelfBuilder::new().wrap_elf_file("eboot.elf", "eboot.self");
/// match result {
///     Ok(()) => println!("Wrapped successfully"),
///     Err(Error::SigningFailed(msg)) => eprintln!("Backend refused: {msg}"),
///     Err(Error::Io(e)) => eprintln!("IO error: {e}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Occurs when reading input executables or writing output containers.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unsupported ELF input.
    ///
    /// The input could not be parsed as an ELF executable, or its program
    /// headers are inconsistent with the file contents.
    #[error("Invalid ELF: {0}")]
    Elf(String),

    /// Malformed segment descriptor.
    ///
    /// A segment requested block digesting with zero size, declared an
    /// invalid block size, or points outside the embedded image.
    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    /// Too many indexable segments for the 4-bit entry index field.
    ///
    /// At most 16 loadable segments can be indexed; the builder refuses to
    /// truncate the index rather than emit a container the loader would
    /// misattribute digests for.
    #[error("Too many indexable segments: {count} (limit 16)")]
    CapacityExceeded {
        /// Number of indexable segments in the input.
        count: usize,
    },

    /// A computed region size or offset exceeds its header field width.
    ///
    /// The SELF header declares `header_size` and `meta_size` as 16-bit
    /// fields; a layout that cannot be represented fails instead of
    /// silently wrapping.
    #[error("Layout overflow: {0}")]
    LayoutOverflow(String),

    /// The signing backend returned a blob of the wrong length.
    ///
    /// The reserved signature region has a fixed size; anything else would
    /// corrupt the regions that follow it.
    #[error("Signature size mismatch: expected {expected} bytes, got {actual}")]
    SignatureSizeMismatch {
        /// Reserved signature region size.
        expected: usize,
        /// Length of the blob the backend returned.
        actual: usize,
    },

    /// The signing backend failed or timed out.
    ///
    /// The container placeholder remains zero-filled; callers may retry the
    /// whole build or emit the unsigned artifact.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Invalid builder configuration.
    ///
    /// A build parameter is out of range, e.g. a non-power-of-two block
    /// size or a digester whose output width does not match the declared
    /// digest size.
    #[error("Configuration error: {0}")]
    Config(String),
}

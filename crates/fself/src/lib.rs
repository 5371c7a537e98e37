pub mod builder;
pub mod elf;
pub mod error;
pub mod sce;

pub use builder::SelfBuilder;
pub use elf::ElfImage;
pub use error::Error;
pub use sce::digest::{Digester, Sha256Digester};
pub use sce::entry::SegmentDescriptor;
pub use sce::reader::SelfFile;
pub use sce::signature::Signer;

pub type Result<T> = std::result::Result<T, Error>;

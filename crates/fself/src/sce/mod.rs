//! SELF container format: planning, digesting, layout, signing.

pub mod constants;
pub mod digest;
pub mod entry;
pub mod layout;
pub mod meta;
pub mod reader;
pub mod signature;

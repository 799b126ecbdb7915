//! Filesystem-backed collaborators for `folio-core`: a directory page
//! supplier, an image decode scheduler and a byte-budget memory service.

mod decoder;
mod memory;
mod supplier;

pub use decoder::ImageDecodeScheduler;
pub use memory::MemoryBudget;
pub use supplier::{book_root, DirectoryPageSupplier};

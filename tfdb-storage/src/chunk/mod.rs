mod file;
mod footer;
mod header;

pub use file::ChunkFile;
pub use footer::{ChunkFooter, FooterFlags};
pub use header::ChunkHeader;

//! Chunk management (chuck)
//!
//! A file's content is the ordered concatenation of fixed-size chunks. This
//! module owns the chunk arithmetic shared by the local write-back buffer and
//! the remote read path.
//!
//! Submodules:
//! - `chunk`: chunk layout (size, index and intra-chunk offset helpers)
//! - `util`: splitting a byte range into per-chunk spans
//! - `buffer`: `ChunkedBuffer`, the uncommitted content of a file being written
pub mod buffer;
pub mod chunk;
pub mod util;

pub use buffer::ChunkedBuffer;
pub use chunk::{ChunkLayout, DEFAULT_CHUNK_SIZE};

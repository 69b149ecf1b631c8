//! Chunk layout helpers.

/// Chunk size used when neither the configuration nor the stored record says
/// otherwise (256 KiB, the GridFS default).
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Fixed chunk geometry of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ChunkLayout {
    pub fn new(chunk_size: u64) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self { chunk_size }
    }

    /// Index of the chunk holding byte `offset`.
    pub fn chunk_index_of(&self, offset: u64) -> u64 {
        offset / self.chunk_size
    }

    /// Position of byte `offset` inside its chunk.
    pub fn within_chunk_offset(&self, offset: u64) -> u64 {
        offset % self.chunk_size
    }

    /// Number of chunks a payload of `len` bytes occupies once stored.
    pub fn chunks_for(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size)
    }
}

//! In-memory write-back buffer for a file that has not been committed yet.

use super::chunk::ChunkLayout;
use super::util::split_file_range_into_chunks;

/// Chunked byte buffer with a logical length and a dirty flag.
///
/// Chunks are allocated zero-filled and never shrink, so gaps left by sparse
/// writes read back as zeros. A fresh buffer already owns one chunk and is
/// dirty, so even an empty file gets committed on the first flush.
#[derive(Debug)]
pub struct ChunkedBuffer {
    layout: ChunkLayout,
    chunks: Vec<Box<[u8]>>,
    length: u64,
    dirty: bool,
}

impl ChunkedBuffer {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            chunks: vec![zeroed_chunk(layout)],
            length: 0,
            dirty: true,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.layout.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Highest byte ever written, plus one.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the current contents as committed to the store.
    pub fn mark_flushed(&mut self) {
        self.dirty = false;
    }

    /// Raw chunk `n`, always `chunk_size` bytes long.
    ///
    /// # Panics
    /// Panics if `n` is not below [`chunk_count`](Self::chunk_count).
    pub fn chunk(&self, n: usize) -> &[u8] {
        assert!(
            n < self.chunks.len(),
            "chunk index {n} out of range ({} chunks)",
            self.chunks.len()
        );
        &self.chunks[n]
    }

    /// Copy `data` in at `offset`, growing the chunk list as needed.
    /// Always accepts the whole slice.
    pub fn write(&mut self, data: &[u8], offset: u64) -> usize {
        let end = offset + data.len() as u64;
        // Cover the chunk that holds `end` itself: a write ending exactly on a
        // boundary leaves one trailing, all-zero chunk.
        let last = self.layout.chunk_index_of(end) as usize;
        while last > self.chunks.len() - 1 {
            self.chunks.push(zeroed_chunk(self.layout));
        }

        let mut cursor = 0usize;
        for span in split_file_range_into_chunks(self.layout, offset, data.len()) {
            let start = span.offset_in_chunk as usize;
            let chunk = &mut self.chunks[span.chunk_index as usize];
            chunk[start..start + span.len].copy_from_slice(&data[cursor..cursor + span.len]);
            cursor += span.len;
        }

        self.length = self.length.max(end);
        self.dirty = true;
        data.len()
    }

    /// Copy bytes starting at `offset` into `buf`, stopping when allocated
    /// chunks run out. Returns how many bytes were copied.
    ///
    /// Reads are bounded by allocated chunks, not by [`len`](Self::len);
    /// callers that must not see bytes past the logical end clamp first.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> usize {
        let mut copied = 0usize;
        for span in split_file_range_into_chunks(self.layout, offset, buf.len()) {
            let Some(chunk) = self.chunks.get(span.chunk_index as usize) else {
                break;
            };
            let start = span.offset_in_chunk as usize;
            buf[copied..copied + span.len].copy_from_slice(&chunk[start..start + span.len]);
            copied += span.len;
        }
        copied
    }

    /// Logical contents (`len()` bytes) as one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.length as usize];
        let copied = self.read(0, &mut out);
        out.truncate(copied);
        out
    }
}

fn zeroed_chunk(layout: ChunkLayout) -> Box<[u8]> {
    vec![0u8; layout.chunk_size as usize].into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ChunkedBuffer {
        ChunkedBuffer::new(ChunkLayout::new(8))
    }

    #[test]
    fn test_new_buffer_is_dirty_with_one_chunk() {
        let buf = small();
        assert!(buf.is_dirty());
        assert!(buf.is_empty());
        assert_eq!(buf.chunk_count(), 1);
        assert_eq!(buf.chunk(0), &[0u8; 8]);
    }

    #[test]
    fn test_write_read_across_chunks() {
        let mut buf = small();
        let data: Vec<u8> = (0u8..20).collect();
        assert_eq!(buf.write(&data, 5), 20);
        assert_eq!(buf.len(), 25);

        let mut out = vec![0u8; 20];
        assert_eq!(buf.read(5, &mut out), 20);
        assert_eq!(out, data);

        // 5..25 touches chunks 0..=3
        assert_eq!(buf.chunk_count(), 4);
        assert_eq!(&buf.chunk(1)[..], &[3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_gap_reads_as_zero() {
        let mut buf = small();
        buf.write(b"xy", 20);
        assert_eq!(buf.len(), 22);
        let all = buf.to_vec();
        assert_eq!(all.len(), 22);
        assert!(all[..20].iter().all(|b| *b == 0));
        assert_eq!(&all[20..], b"xy");
    }

    #[test]
    fn test_exact_boundary_adds_trailing_chunk() {
        let mut buf = small();
        buf.write(&[1u8; 8], 0);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.chunk_count(), 2);
        assert_eq!(buf.chunk(1), &[0u8; 8]);
    }

    #[test]
    fn test_length_only_grows() {
        let mut buf = small();
        buf.write(b"abcdef", 0);
        buf.write(b"Z", 1);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.to_vec(), b"aZcdef");
    }

    #[test]
    fn test_read_stops_at_allocated_chunks() {
        let mut buf = small();
        buf.write(b"abc", 0);
        // one chunk allocated: bytes 0..8 exist even though len is 3
        let mut out = vec![0xffu8; 16];
        assert_eq!(buf.read(4, &mut out), 4);
        assert_eq!(&out[..4], &[0, 0, 0, 0]);
        assert_eq!(buf.read(64, &mut out), 0);
    }

    #[test]
    fn test_flushed_flag() {
        let mut buf = small();
        buf.mark_flushed();
        assert!(!buf.is_dirty());
        buf.write(b"q", 0);
        assert!(buf.is_dirty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_chunk_out_of_range_panics() {
        let buf = small();
        let _ = buf.chunk(1);
    }
}

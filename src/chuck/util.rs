//! Split a file byte range into chunk-local spans.

use super::chunk::ChunkLayout;

/// The part of a file range that falls inside a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub chunk_index: u64,
    pub offset_in_chunk: u64,
    pub len: usize,
}

/// Split `[file_offset, file_offset + len)` into per-chunk spans, in order.
/// The first span may start mid-chunk; every later span starts at 0.
pub fn split_file_range_into_chunks(
    layout: ChunkLayout,
    mut file_offset: u64,
    len: usize,
) -> Vec<ChunkSpan> {
    let mut remaining = len as u64;
    let mut out = Vec::new();
    while remaining > 0 {
        let offset_in_chunk = layout.within_chunk_offset(file_offset);
        let take = (layout.chunk_size - offset_in_chunk).min(remaining);
        out.push(ChunkSpan {
            chunk_index: layout.chunk_index_of(file_offset),
            offset_in_chunk,
            len: take as usize,
        });
        file_offset += take;
        remaining -= take;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_within_single_chunk() {
        let layout = ChunkLayout::default();
        let spans = split_file_range_into_chunks(layout, 123, 4096);
        assert_eq!(
            spans,
            vec![ChunkSpan {
                chunk_index: 0,
                offset_in_chunk: 123,
                len: 4096
            }]
        );
    }

    #[test]
    fn test_split_mid_chunk_then_full_chunks() {
        let layout = ChunkLayout::new(10);
        let spans = split_file_range_into_chunks(layout, 7, 25);
        let lens: Vec<usize> = spans.iter().map(|s| s.len).collect();
        assert_eq!(lens, vec![3, 10, 10, 2]);
        assert_eq!(spans[0].offset_in_chunk, 7);
        assert!(spans[1..].iter().all(|s| s.offset_in_chunk == 0));
        assert_eq!(spans[3].chunk_index, 3);
    }

    #[test]
    fn test_zero_len() {
        let spans = split_file_range_into_chunks(ChunkLayout::default(), 42, 0);
        assert!(spans.is_empty());
    }
}

//! Chunk buffer reassembly (spec.md §3 Chunk Buffer, §4.C, §8 scenario 6 +
//! Chunk reassembly law, §9 Chunk buffer safety).

use std::collections::HashMap;

const MAX_TOTAL_CHUNKS: usize = 2000;

#[derive(Debug)]
struct Buffer {
    total_chunks: usize,
    slots: Vec<Option<String>>,
    filled: usize,
}

/// Accumulates in-progress chunked envelopes, keyed by `messageId`.
///
/// Owned exclusively by one Homebase Link (spec.md §3 ownership); not
/// `Send`-shared across links.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    buffers: HashMap<String, Buffer>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Not all slots filled yet.
    Pending,
    /// All slots filled; here is the concatenated payload.
    Complete(String),
    /// `total_chunks` outside `[1, 2000]`; buffer (if any) rejected/dropped.
    InvalidTotal,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Validates `total_chunks` against the first chunk
    /// seen for a given `message_id` (spec.md §9); later chunks use
    /// whatever the buffer was created with, so a duplicate index is
    /// idempotent and a missing index simply leaves the buffer pending.
    pub fn accept(
        &mut self,
        message_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: String,
    ) -> ChunkOutcome {
        if !(1..=MAX_TOTAL_CHUNKS).contains(&total_chunks) {
            self.buffers.remove(message_id);
            return ChunkOutcome::InvalidTotal;
        }
        if chunk_index >= total_chunks {
            return ChunkOutcome::Pending;
        }

        let buffer = self.buffers.entry(message_id.to_owned()).or_insert_with(|| Buffer {
            total_chunks,
            slots: vec![None; total_chunks],
            filled: 0,
        });

        if buffer.total_chunks != total_chunks {
            // Disagreement with the first chunk's declared size; drop and restart clean.
            self.buffers.remove(message_id);
            return ChunkOutcome::InvalidTotal;
        }

        if buffer.slots[chunk_index].is_none() {
            buffer.slots[chunk_index] = Some(data);
            buffer.filled += 1;
        }

        if buffer.filled == buffer.total_chunks {
            let buffer = self.buffers.remove(message_id).expect("just inserted");
            let joined = buffer
                .slots
                .into_iter()
                .map(|s| s.expect("filled == total_chunks implies every slot is Some"))
                .collect::<String>();
            return ChunkOutcome::Complete(joined);
        }

        ChunkOutcome::Pending
    }

    /// Drop all in-progress buffers (called on link teardown).
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

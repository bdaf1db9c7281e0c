//! Chunked weave storage.
//!
//! The weave is addressed by absolute byte offset; chunks are keyed by the
//! offset they end at, matching the on-disk chunk index layout.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::Bytes;
use tapestry_protocol::constants::DATA_CHUNK_SIZE;
use tapestry_protocol::poa::{BlockIndex, Poa};

/// Read access to the chunked weave.
pub trait ChunkStore: Send + Sync {
    /// The chunk covering `byte_offset`, if stored.
    fn get(&self, byte_offset: u64) -> Option<Bytes>;
}

/// In-memory chunk store.
///
/// Serves as the primary store on development networks and as the test
/// double for the RocksDB-backed store of a full node.
#[derive(Debug, Default, Clone)]
pub struct MemoryChunkStore {
    /// end offset (exclusive) → chunk
    chunks: BTreeMap<u64, Bytes>,
    weave_size: u64,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` to the weave, splitting it into fixed-size chunks.
    /// Returns the new weave size.
    pub fn append(&mut self, data: &[u8]) -> u64 {
        for piece in data.chunks(DATA_CHUNK_SIZE) {
            self.weave_size += piece.len() as u64;
            self.chunks
                .insert(self.weave_size, Bytes::copy_from_slice(piece));
        }
        self.weave_size
    }

    pub fn weave_size(&self) -> u64 {
        self.weave_size
    }

    /// Block index over every stored chunk.
    pub fn block_index(&self) -> BlockIndex {
        let mut index = BlockIndex::new();
        for (end, chunk) in &self.chunks {
            let poa = Poa {
                option: 1,
                chunk: chunk.clone(),
                ..Poa::default()
            };
            index.push(*end, poa.chunk_digest());
        }
        index
    }
}

impl ChunkStore for MemoryChunkStore {
    fn get(&self, byte_offset: u64) -> Option<Bytes> {
        let (end, chunk) = self.chunks.range(byte_offset + 1..).next()?;
        let start = end - chunk.len() as u64;
        (byte_offset >= start).then(|| chunk.clone())
    }
}

/// The primary chunk store plus the optional secondary data index
/// consulted on a miss.
#[derive(Clone)]
pub struct WeaveReader {
    primary: Arc<dyn ChunkStore>,
    data_index: Option<Arc<dyn ChunkStore>>,
}

impl WeaveReader {
    pub fn new(primary: Arc<dyn ChunkStore>) -> Self {
        Self {
            primary,
            data_index: None,
        }
    }

    pub fn with_data_index(mut self, index: Arc<dyn ChunkStore>) -> Self {
        self.data_index = Some(index);
        self
    }

    /// The chunk covering `byte`, falling back to the data index when
    /// `consult_index` is set.
    pub fn chunk(&self, byte: u64, consult_index: bool) -> Option<Bytes> {
        if let Some(chunk) = self.primary.get(byte) {
            return Some(chunk);
        }
        if consult_index {
            return self.data_index.as_ref().and_then(|index| index.get(byte));
        }
        None
    }

    /// Build the proof of access for `byte`.
    pub fn poa(&self, byte: u64, consult_index: bool) -> Option<Poa> {
        let chunk = self.chunk(byte, consult_index)?;
        Some(Poa {
            option: 1,
            chunk,
            ..Poa::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_resolves_offsets_to_their_chunk() {
        let mut store = MemoryChunkStore::new();
        let data = vec![7u8; DATA_CHUNK_SIZE + 100];
        assert_eq!(store.append(&data), data.len() as u64);

        let first = store.get(0).unwrap();
        assert_eq!(first.len(), DATA_CHUNK_SIZE);
        assert_eq!(store.get(DATA_CHUNK_SIZE as u64 - 1).unwrap(), first);

        let tail = store.get(DATA_CHUNK_SIZE as u64).unwrap();
        assert_eq!(tail.len(), 100);
        assert!(store.get(data.len() as u64).is_none());
    }

    #[test]
    fn block_index_matches_stored_chunks() {
        let mut store = MemoryChunkStore::new();
        store.append(&vec![1u8; DATA_CHUNK_SIZE * 2]);
        let index = store.block_index();
        assert_eq!(index.len(), 2);

        let reader = WeaveReader::new(Arc::new(store));
        let poa = reader.poa(10, false).unwrap();
        assert_eq!(index.digest_covering(10), Some(poa.chunk_digest()));
    }

    #[test]
    fn reader_falls_back_to_the_data_index_only_when_asked() {
        let primary = MemoryChunkStore::new();
        let mut secondary = MemoryChunkStore::new();
        secondary.append(b"indexed data");

        let reader =
            WeaveReader::new(Arc::new(primary)).with_data_index(Arc::new(secondary));
        assert!(reader.chunk(0, false).is_none());
        assert_eq!(
            reader.chunk(0, true).unwrap(),
            Bytes::from_static(b"indexed data")
        );
    }
}

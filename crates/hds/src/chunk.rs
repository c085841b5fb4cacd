//! The chunk chain: an ordered sequence of in-flight fragment descriptors.
//!
//! Modeled as a `BTreeMap<u32, Chunk>` keyed by `frag_num` rather than a
//! linked list of owned/raw-pointer nodes (spec §9 "Chain ownership" calls
//! for arena-plus-indices; `frag_num` is monotonically increasing along the
//! chain, so it doubles as a stable index with no separate arena needed).

use std::collections::BTreeMap;
use std::ops::Range;

use bytes::Bytes;

/// One media fragment in flight.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub frag_num: u32,
    pub seg_num: u32,
    pub timestamp: u64,
    pub duration: u32,
    /// Index into the fragment-run table where the resolver left off
    /// (VOD optimization for the next `FragmentIndex` call).
    pub frun_entry: usize,
    /// Full fragment bytes; absent until the downloader populates it.
    pub data: Option<Bytes>,
    /// Byte range of the `mdat` payload within `data`.
    pub mdat_range: Range<usize>,
    /// Read cursor into the `mdat` payload.
    pub mdat_pos: usize,
    /// Set if the HTTP fetch produced fewer bytes than expected.
    pub failed: bool,
    /// True when this chunk is the last of a VOD stream.
    pub eof: bool,
}

impl Chunk {
    pub fn new(frag_num: u32, seg_num: u32, timestamp: u64, duration: u32, frun_entry: usize) -> Self {
        Self {
            frag_num,
            seg_num,
            timestamp,
            duration,
            frun_entry,
            data: None,
            mdat_range: 0..0,
            mdat_pos: 0,
            failed: false,
            eof: false,
        }
    }

    pub fn mdat_len(&self) -> usize {
        self.mdat_range.len()
    }

    pub fn mdat_remaining(&self) -> usize {
        self.mdat_len().saturating_sub(self.mdat_pos)
    }

    /// The unread tail of the `mdat` payload, or `None` if `data` hasn't
    /// arrived yet.
    pub fn mdat_unread(&self) -> Option<&[u8]> {
        let data = self.data.as_ref()?;
        let start = self.mdat_range.start + self.mdat_pos;
        let end = self.mdat_range.end;
        Some(&data[start..end])
    }

    pub fn is_drained(&self) -> bool {
        self.mdat_pos >= self.mdat_len()
    }
}

/// The ordered, shared fragment chain for one stream.
#[derive(Debug, Default)]
pub struct ChunkChain {
    chunks: BTreeMap<u32, Chunk>,
    /// Live-mode read cursor, decoupled from `head` so the live poller can
    /// prune behind it.
    pub livereadpos: Option<u32>,
    /// The next chunk needing bytes.
    pub downloadpos: Option<u32>,
}

impl ChunkChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<u32> {
        self.chunks.keys().next().copied()
    }

    pub fn last(&self) -> Option<&Chunk> {
        self.chunks.values().next_back()
    }

    pub fn get(&self, frag_num: u32) -> Option<&Chunk> {
        self.chunks.get(&frag_num)
    }

    pub fn get_mut(&mut self, frag_num: u32) -> Option<&mut Chunk> {
        self.chunks.get_mut(&frag_num)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The chunk immediately after `frag_num`, if any.
    pub fn next_of(&self, frag_num: u32) -> Option<u32> {
        self.chunks
            .range((std::ops::Bound::Excluded(frag_num), std::ops::Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
    }

    /// Appends a freshly-indexed chunk at the producer end.
    pub fn append(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.frag_num, chunk);
    }

    /// Removes a chunk at the consumer end after a full `mdat` drain.
    pub fn release(&mut self, frag_num: u32) -> Option<Chunk> {
        self.chunks.remove(&frag_num)
    }

    /// Sum of durations of chunks from `head` forward (used for the VOD
    /// lead-time invariant).
    pub fn buffered_duration(&self) -> u64 {
        self.chunks.values().map(|c| c.duration as u64).sum()
    }

    /// The first chunk at or after `head` still lacking `data`, used by the
    /// downloader to re-seat `downloadpos` after it goes null.
    pub fn first_undownloaded(&self) -> Option<u32> {
        self.chunks
            .values()
            .find(|c| c.data.is_none())
            .map(|c| c.frag_num)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }
}

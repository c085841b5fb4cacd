//! The byte-oriented `read`/`peek`/`control` surface (spec §4.8).
//!
//! These methods are synchronous and non-blocking: if no data is
//! available they return fewer bytes than requested (including zero) —
//! the reader itself never suspends (spec §5).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::box_parser::BootstrapTables;
use crate::chunk::ChunkChain;
use crate::flv_header::FLV_HEADER;
use crate::fragment_index::{next_chunk, StreamKind};

/// `control()` queries the host may ask of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlQuery {
    CanSeek,
    CanFastSeek,
    CanPause,
    CanControlPace,
    GetPtsDelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    Bool(bool),
    Micros(u64),
}

/// Whether the stream is VOD or live, threaded through the reader so it can
/// pick the right end-of-chunk policy (§4.8: VOD extends the chain itself,
/// live defers freeing to the poller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    Vod { total_duration_seconds: u64 },
    Live,
}

pub struct ReaderFacade {
    chain: std::sync::Arc<Mutex<ChunkChain>>,
    bootstrap: std::sync::Arc<Mutex<BootstrapTables>>,
    notify: std::sync::Arc<Notify>,
    mode: ReaderMode,
    download_leadtime_secs: u64,
    network_caching_ms: u64,
    header_bytes_sent: AtomicU64,
    eof: AtomicBool,
}

impl ReaderFacade {
    pub fn new(
        chain: std::sync::Arc<Mutex<ChunkChain>>,
        bootstrap: std::sync::Arc<Mutex<BootstrapTables>>,
        notify: std::sync::Arc<Notify>,
        mode: ReaderMode,
        download_leadtime_secs: u64,
        network_caching_ms: u64,
    ) -> Self {
        Self {
            chain,
            bootstrap,
            notify,
            mode,
            download_leadtime_secs,
            network_caching_ms,
            header_bytes_sent: AtomicU64::new(0),
            eof: AtomicBool::new(false),
        }
    }

    /// Fills `buf` (up to its length), returning the number of bytes
    /// written. Serves the 13-byte FLV header first, then drains `mdat`
    /// payloads per spec §4.8.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut written = 0usize;
        written += self.read_header(&mut buf[written..]);
        if written >= buf.len() {
            return written;
        }

        while written < buf.len() && !self.eof.load(Ordering::Acquire) {
            // Lock order is always bootstrap-then-chain, matching the live
            // poller's `maintain_live_chunks`, to avoid a lock-order
            // inversion between the reader and the live-poller task.
            let tables = self.bootstrap.lock();
            let mut guard = self.chain.lock();
            let Some(head) = guard.head() else { break };

            let (copy_len, release, chunk_eof) = {
                let Some(chunk) = guard.get_mut(head) else {
                    break;
                };
                if chunk.data.is_none() {
                    if chunk.failed {
                        // Downloader gave up on this fragment after
                        // exhausting retries (see downloader.rs): treat it
                        // as an empty, exhausted payload so the skip path
                        // below runs instead of stalling forever waiting
                        // for data that will never arrive.
                        (0usize, true, chunk.eof)
                    } else {
                        // Still in flight; nothing more to serve this call.
                        break;
                    }
                } else {
                    if chunk.eof && chunk.is_drained() {
                        self.eof.store(true, Ordering::Release);
                        break;
                    }
                    let want = buf.len() - written;
                    let available = chunk.mdat_remaining();
                    let copy_len = want.min(available);
                    if copy_len > 0 {
                        let start = chunk.mdat_range.start + chunk.mdat_pos;
                        buf[written..written + copy_len].copy_from_slice(
                            &chunk.data.as_ref().unwrap()[start..start + copy_len],
                        );
                        chunk.mdat_pos += copy_len;
                    }
                    (copy_len, chunk.is_drained() || chunk.failed, chunk.eof)
                }
            };
            written += copy_len;

            if release {
                match self.mode {
                    ReaderMode::Vod { total_duration_seconds } => {
                        let has_successor = guard.next_of(head).is_some();
                        if !has_successor && !chunk_eof {
                            if let Some(last) = guard.get(head).cloned() {
                                if let Ok(chunk) = next_chunk(
                                    &tables,
                                    Some(&last),
                                    StreamKind::Vod {
                                        total_duration_seconds,
                                    },
                                ) {
                                    guard.append(chunk);
                                }
                            }
                        }
                        guard.release(head);
                    }
                    ReaderMode::Live => {
                        guard.livereadpos = guard.next_of(head);
                    }
                }
            }

            if copy_len == 0 && !release {
                break;
            }
        }

        if let ReaderMode::Vod {
            total_duration_seconds,
        } = self.mode
        {
            self.top_up_lead_time(total_duration_seconds);
        }

        written
    }

    fn read_header(&self, buf: &mut [u8]) -> usize {
        let sent = self.header_bytes_sent.load(Ordering::Acquire) as usize;
        if sent >= FLV_HEADER.len() {
            return 0;
        }
        let remaining = &FLV_HEADER[sent..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.header_bytes_sent
            .store((sent + n) as u64, Ordering::Release);
        n
    }

    /// Returns a copy of up to `n` unread bytes without advancing any
    /// cursor: the FLV header while unsent, else the head chunk's unread
    /// `mdat` tail.
    pub fn peek(&self, n: usize) -> Vec<u8> {
        let sent = self.header_bytes_sent.load(Ordering::Acquire) as usize;
        if sent < FLV_HEADER.len() {
            let remaining = &FLV_HEADER[sent..];
            let len = remaining.len().min(n);
            return remaining[..len].to_vec();
        }

        let guard = self.chain.lock();
        let Some(head) = guard.head() else {
            return Vec::new();
        };
        let Some(chunk) = guard.get(head) else {
            return Vec::new();
        };
        if chunk.failed {
            return Vec::new();
        }
        match chunk.mdat_unread() {
            Some(bytes) => {
                let len = bytes.len().min(n);
                bytes[..len].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Responds to the closed set of host queries.
    pub fn control(&self, query: ControlQuery) -> ControlResponse {
        match query {
            ControlQuery::CanSeek => ControlResponse::Bool(false),
            ControlQuery::CanFastSeek => ControlResponse::Bool(false),
            ControlQuery::CanPause => ControlResponse::Bool(false),
            ControlQuery::CanControlPace => ControlResponse::Bool(true),
            ControlQuery::GetPtsDelay => {
                ControlResponse::Micros(self.network_caching_ms * 1000)
            }
        }
    }

    /// After a VOD drain, ensures at least `download_leadtime` seconds of
    /// chunks exist ahead of `head`, signalling the downloader if more were
    /// appended.
    fn top_up_lead_time(&self, total_duration_seconds: u64) {
        let tables = self.bootstrap.lock();
        let afrt_timescale = tables.afrt_timescale.max(1) as u64;
        let target_ticks = self.download_leadtime_secs * afrt_timescale;

        let mut guard = self.chain.lock();
        let mut appended = false;
        loop {
            if guard.buffered_duration() >= target_ticks {
                break;
            }
            let Some(last) = guard.last().cloned() else {
                break;
            };
            if last.eof {
                break;
            }
            match next_chunk(
                &tables,
                Some(&last),
                StreamKind::Vod {
                    total_duration_seconds,
                },
            ) {
                Ok(chunk) => {
                    guard.append(chunk);
                    appended = true;
                }
                Err(_) => break,
            }
        }
        drop(guard);
        if appended {
            self.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::box_parser::{BootstrapTables, FragmentRunEntry, SegmentRun};
    use crate::chunk::Chunk;
    use std::sync::Arc;

    fn vod_tables() -> BootstrapTables {
        BootstrapTables {
            movie_id: String::new(),
            timescale: 1000,
            live_current_time: 0,
            servers: vec![],
            quality_modifier: None,
            segment_runs: vec![SegmentRun {
                first_segment: 1,
                fragments_per_segment: 100,
            }],
            afrt_timescale: 1000,
            fragment_runs: vec![FragmentRunEntry::Normal {
                fragment_number_start: 1,
                fragment_timestamp: 0,
                fragment_duration: 2500,
            }],
        }
    }

    fn chunk_with_mdat(frag_num: u32, timestamp: u64, duration: u32, eof: bool, payload: &[u8]) -> Chunk {
        let mut c = Chunk::new(frag_num, 1, timestamp, duration, 0);
        c.data = Some(bytes::Bytes::copy_from_slice(payload));
        c.mdat_range = 0..payload.len();
        c.eof = eof;
        c
    }

    fn make_reader(chain: ChunkChain, tables: BootstrapTables, mode: ReaderMode) -> ReaderFacade {
        ReaderFacade::new(
            Arc::new(Mutex::new(chain)),
            Arc::new(Mutex::new(tables)),
            Arc::new(Notify::new()),
            mode,
            15,
            0,
        )
    }

    #[test]
    fn read_serves_header_then_concatenated_mdat_up_to_eof() {
        let mut chain = ChunkChain::new();
        chain.append(chunk_with_mdat(1, 0, 2500, false, b"aaa"));
        chain.append(chunk_with_mdat(2, 2500, 2500, true, b"bbb"));
        let reader = make_reader(
            chain,
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
        );

        let mut buf = [0u8; 13];
        assert_eq!(reader.read(&mut buf), 13);
        assert_eq!(buf, FLV_HEADER);

        let mut body = Vec::new();
        let mut scratch = [0u8; 16];
        loop {
            let n = reader.read(&mut scratch);
            if n == 0 {
                break;
            }
            body.extend_from_slice(&scratch[..n]);
        }
        assert_eq!(body, b"aaabbb");
    }

    #[test]
    fn peek_is_idempotent_without_an_intervening_read() {
        let mut chain = ChunkChain::new();
        chain.append(chunk_with_mdat(1, 0, 2500, false, b"hello"));
        let reader = make_reader(
            chain,
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
        );

        let mut header = [0u8; 13];
        reader.read(&mut header);

        let first = reader.peek(3);
        let second = reader.peek(3);
        assert_eq!(first, second);
        assert_eq!(first, b"hel");
    }

    #[test]
    fn peek_before_header_drained_returns_header_bytes() {
        let reader = make_reader(
            ChunkChain::new(),
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
        );
        assert_eq!(reader.peek(3), &FLV_HEADER[..3]);
        assert_eq!(reader.peek(3), &FLV_HEADER[..3]);
    }

    #[test]
    fn failed_chunk_with_no_data_is_skipped_not_stalled() {
        let mut chain = ChunkChain::new();
        let mut failed = Chunk::new(1, 1, 0, 2500, 0);
        failed.failed = true;
        chain.append(failed);
        chain.append(chunk_with_mdat(2, 2500, 2500, true, b"ok"));
        let reader = make_reader(
            chain,
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
        );

        let mut header = [0u8; 13];
        reader.read(&mut header);

        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf);
        assert_eq!(&buf[..n], b"ok");
    }

    #[test]
    fn in_flight_chunk_without_data_returns_zero_without_skipping() {
        let mut chain = ChunkChain::new();
        chain.append(Chunk::new(1, 1, 0, 2500, 0));
        let reader = make_reader(
            chain,
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
        );
        let mut header = [0u8; 13];
        reader.read(&mut header);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn vod_drain_tops_up_lead_time_until_eof_reached() {
        let mut chain = ChunkChain::new();
        chain.append(chunk_with_mdat(1, 0, 2500, false, b"x"));
        let reader = make_reader(
            chain,
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 10,
            },
        );
        let mut header = [0u8; 13];
        reader.read(&mut header);

        let mut buf = [0u8; 1];
        reader.read(&mut buf); // drains the only byte, triggers top-up

        let guard = reader.chain.lock();
        let buffered = guard.buffered_duration();
        let afrt_timescale = reader.bootstrap.lock().afrt_timescale as u64;
        assert!(buffered >= reader.download_leadtime_secs * afrt_timescale || guard.last().is_some_and(|c| c.eof));
    }

    #[test]
    fn control_responses_match_the_closed_query_set() {
        let reader = make_reader(
            ChunkChain::new(),
            vod_tables(),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
        );
        assert_eq!(reader.control(ControlQuery::CanSeek), ControlResponse::Bool(false));
        assert_eq!(reader.control(ControlQuery::CanFastSeek), ControlResponse::Bool(false));
        assert_eq!(reader.control(ControlQuery::CanPause), ControlResponse::Bool(false));
        assert_eq!(
            reader.control(ControlQuery::CanControlPace),
            ControlResponse::Bool(true)
        );
    }

    #[test]
    fn pts_delay_scales_network_caching_ms_to_micros() {
        let reader = ReaderFacade::new(
            Arc::new(Mutex::new(ChunkChain::new())),
            Arc::new(Mutex::new(vod_tables())),
            Arc::new(Notify::new()),
            ReaderMode::Vod {
                total_duration_seconds: 5,
            },
            15,
            250,
        );
        assert_eq!(reader.control(ControlQuery::GetPtsDelay), ControlResponse::Micros(250_000));
    }
}

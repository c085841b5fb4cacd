//! The downloader worker: advances the chain's download cursor one chunk
//! at a time, fetching fragment bytes ahead of the reader.
//!
//! Translated from the spec's OS-thread-plus-condvar design into an async
//! task: `tokio_util::sync::CancellationToken` replaces the `closed` flag
//! plus broadcast, `tokio::sync::Notify` replaces `dl_cond`, and
//! `parking_lot::Mutex` guards the chain exactly where the original held
//! `dl_lock` (released before the blocking fetch, per §4.6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunk::ChunkChain;
use crate::config::{FetchRetryConfig, HdsConfig};
use crate::error::HdsError;
use crate::fetch::{build_fragment_url, locate_mdat, FragmentFetcher};

/// Shared, read-mostly fields the downloader needs to build fragment URLs.
pub struct DownloadTarget {
    pub server_base: String,
    pub movie_id: String,
    pub quality: Option<String>,
}

/// Runs the downloader loop until `token` is cancelled.
///
/// Mirrors the pseudocode of spec §4.6 exactly: scan for the next chunk
/// lacking data, drain the chain of downloadable work while releasing the
/// chain lock across each fetch, then wait to be notified.
pub async fn run(
    chain: Arc<Mutex<ChunkChain>>,
    notify: Arc<Notify>,
    token: CancellationToken,
    fetcher: Arc<dyn FragmentFetcher>,
    target: DownloadTarget,
    config: HdsConfig,
    chunk_count: Arc<AtomicU64>,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let next = {
            let mut guard = chain.lock();
            if guard.downloadpos.is_none() {
                guard.downloadpos = guard.first_undownloaded();
            }
            guard.downloadpos
        };

        let Some(frag_num) = next else {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = notify.notified() => continue,
            }
        };

        let (seg_num, url) = {
            let guard = chain.lock();
            let Some(chunk) = guard.get(frag_num) else {
                continue;
            };
            let url = build_fragment_url(
                &target.server_base,
                &target.movie_id,
                target.quality.as_deref(),
                chunk.seg_num,
                chunk.frag_num,
            );
            (chunk.seg_num, url)
        };

        debug!(frag_num, seg_num, %url, "downloading fragment");

        match fetch_with_retry(&*fetcher, &url, config.max_fragment_size, &config.retry, &token).await {
            Ok(data) => {
                let mdat_range = locate_mdat(&data);
                let mut guard = chain.lock();
                if let Some(chunk) = guard.get_mut(frag_num) {
                    match mdat_range {
                        Some(range) => {
                            chunk.mdat_range = range;
                            chunk.mdat_pos = 0;
                            chunk.data = Some(data);
                            chunk_count.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            warn!(frag_num, "fragment had no mdat box, marking failed");
                            chunk.failed = true;
                        }
                    }
                }
                guard.downloadpos = guard.next_of(frag_num);
                notify.notify_waiters();
            }
            Err(err) => {
                warn!(frag_num, error = %err, "fragment download failed permanently, skipping");
                let mut guard = chain.lock();
                if let Some(chunk) = guard.get_mut(frag_num) {
                    chunk.failed = true;
                }
                // Deliberate departure from the literal source (see
                // DESIGN.md): advance past a permanently-failed chunk so the
                // reader's skip path is reachable instead of retrying it
                // forever.
                guard.downloadpos = guard.next_of(frag_num);
                notify.notify_waiters();
            }
        }
    }
}

/// Retries a single fragment fetch with exponential backoff, giving up
/// after `policy.max_retries` attempts.
async fn fetch_with_retry(
    fetcher: &dyn FragmentFetcher,
    url: &str,
    max_size: usize,
    policy: &FetchRetryConfig,
    token: &CancellationToken,
) -> Result<bytes::Bytes, HdsError> {
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(HdsError::Closed);
        }
        let fetched = tokio::select! {
            _ = token.cancelled() => return Err(HdsError::Closed),
            result = fetcher.fetch(url, max_size) => result,
        };
        match fetched {
            Ok(data) => return Ok(data),
            Err(err) if attempt < policy.max_retries && err.is_fragment_local() => {
                let delay = backoff_delay(policy, attempt);
                warn!(attempt, %url, error = %err, delay_ms = delay.as_millis() as u64, "retrying fragment fetch");
                tokio::select! {
                    _ = token.cancelled() => return Err(HdsError::Closed),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(policy: &FetchRetryConfig, attempt: u32) -> Duration {
    let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    policy
        .base_delay
        .checked_mul(multiplier)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

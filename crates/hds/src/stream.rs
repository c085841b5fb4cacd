//! `HdsStream`: the crate's entry point. Owns one media track's bootstrap
//! tables and chunk chain, and drives the downloader (and, for live
//! streams, the live-poller) tasks for its lifetime.
//!
//! Collapses the source's `HDSStream`/`StreamSys` split into one owner,
//! since this design preserves the single-track behavior of spec §9 (only
//! `hds_streams[0]` is ever consumed).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::box_parser::{parse_abst, BootstrapTables};
use crate::chunk::ChunkChain;
use crate::config::HdsConfig;
use crate::detect::is_hds_manifest;
use crate::downloader::{self, DownloadTarget};
use crate::error::HdsError;
use crate::fetch::FragmentFetcher;
use crate::fragment_index::{next_chunk, StreamKind};
use crate::live_poller::{self, resolve_abst_url};
use crate::manifest::{parse_manifest, MediaStream};
use crate::reader::{ReaderFacade, ReaderMode};

/// An open HDS stream: one matched media/bootstrap pair, fully wired with
/// its background workers.
pub struct HdsStream {
    pub reader: ReaderFacade,
    chunk_count: Arc<AtomicU64>,
    close_token: CancellationToken,
    downloader_handle: JoinHandle<()>,
    live_poller_handle: Option<JoinHandle<()>>,
}

impl HdsStream {
    /// Detects whether `probe` (the first bytes of the upstream source)
    /// looks like an F4M manifest.
    pub fn probe(probe: &[u8]) -> bool {
        is_hds_manifest(probe)
    }

    /// Opens a stream from a fully-read manifest document. Only the first
    /// matched media/bootstrap pair is consumed (spec §9, single-track).
    pub async fn open(
        manifest_xml: &[u8],
        base_url: &str,
        fetcher: Arc<dyn FragmentFetcher>,
        config: HdsConfig,
    ) -> Result<Self, HdsError> {
        if !is_hds_manifest(manifest_xml) {
            return Err(HdsError::NotHds);
        }

        let parsed = parse_manifest(manifest_xml, &config.manifest_limits)?;
        let Some(media) = parsed.streams.into_iter().next() else {
            return Err(HdsError::BootstrapMalformed {
                reason: "no media entry matched a bootstrap",
            });
        };

        let is_vod = parsed.duration_seconds > 0;

        let tables = match &media.inline_bootstrap {
            Some(blob) => parse_abst(blob, &config.bootstrap_limits).ok_or(HdsError::BootstrapMalformed {
                reason: "inline bootstrap parse failed",
            })?,
            None => BootstrapTables::default(),
        };

        let bootstrap = Arc::new(Mutex::new(tables));
        let chain = Arc::new(Mutex::new(ChunkChain::new()));
        let notify = Arc::new(Notify::new());
        let close_token = CancellationToken::new();
        let chunk_count = Arc::new(AtomicU64::new(0));

        if is_vod {
            prime_vod_chain(&bootstrap, &chain, parsed.duration_seconds, &config);
        }

        let (server_base, movie_id, quality) = {
            let tables = bootstrap.lock();
            let base = crate::fetch::pick_server_base(&media.url, &tables.servers, base_url);
            (
                base.to_string(),
                crate::fetch::movie_id_segment(&media.url).to_string(),
                tables.quality_modifier.clone(),
            )
        };

        let downloader_handle = tokio::spawn(downloader::run(
            chain.clone(),
            notify.clone(),
            close_token.clone(),
            fetcher.clone(),
            DownloadTarget {
                server_base,
                movie_id,
                quality,
            },
            config.clone(),
            chunk_count.clone(),
        ));

        let live_poller_handle = if is_vod {
            None
        } else {
            let abst_url = resolve_abst_url(media.bootstrap_url.as_deref().unwrap_or(""), base_url);
            Some(tokio::spawn(live_poller::run(
                abst_url,
                bootstrap.clone(),
                chain.clone(),
                notify.clone(),
                close_token.clone(),
                fetcher.clone(),
                config.clone(),
            )))
        };

        let mode = if is_vod {
            ReaderMode::Vod {
                total_duration_seconds: parsed.duration_seconds,
            }
        } else {
            ReaderMode::Live
        };

        let reader = ReaderFacade::new(
            chain,
            bootstrap,
            notify,
            mode,
            config.lead_time.download_leadtime_secs,
            config.network_caching_ms,
        );

        info!(is_vod, "HDS stream opened");

        Ok(Self {
            reader,
            chunk_count,
            close_token,
            downloader_handle,
            live_poller_handle,
        })
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::Relaxed)
    }

    /// Tears down the stream: cancels both workers and waits for them to
    /// exit before releasing owned buffers.
    pub async fn close(self) {
        self.close_token.cancel();
        if let Err(err) = self.downloader_handle.await {
            warn!(error = %err, "downloader task panicked during close");
        }
        if let Some(handle) = self.live_poller_handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "live poller task panicked during close");
            }
        }
    }
}

/// Pre-primes a VOD chain with enough chunks to cover `download_leadtime`
/// seconds, per spec §4.2.
fn prime_vod_chain(
    bootstrap: &Mutex<BootstrapTables>,
    chain: &Mutex<ChunkChain>,
    total_duration_seconds: u64,
    config: &HdsConfig,
) {
    let tables = bootstrap.lock();
    let mut guard = chain.lock();
    let afrt_timescale = tables.afrt_timescale.max(1) as u64;
    let target_ticks = config.lead_time.download_leadtime_secs * afrt_timescale;

    loop {
        if guard.buffered_duration() >= target_ticks {
            break;
        }
        let last = guard.last().cloned();
        if last.as_ref().is_some_and(|c| c.eof) {
            break;
        }
        match next_chunk(
            &tables,
            last.as_ref(),
            StreamKind::Vod {
                total_duration_seconds,
            },
        ) {
            Ok(chunk) => guard.append(chunk),
            Err(_) => break,
        }
    }
}

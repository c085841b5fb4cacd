//! The live-mode worker: periodically re-fetches the bootstrap, re-parses
//! it, and extends/garbage-collects the chunk chain (spec §4.7).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::box_parser::{parse_abst, BootstrapTables};
use crate::chunk::ChunkChain;
use crate::config::HdsConfig;
use crate::fetch::FragmentFetcher;
use crate::fragment_index::{next_chunk, StreamKind};

/// Resolves the bootstrap URL: absolute if given absolute, else joined with
/// `base_url`.
pub fn resolve_abst_url(abst_url: &str, base_url: &str) -> String {
    let lower = abst_url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return abst_url.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(abst_url)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}/{}", base_url.trim_end_matches('/'), abst_url),
    }
}

/// Runs the live-poller loop until `token` is cancelled.
pub async fn run(
    abst_url: String,
    bootstrap: Arc<Mutex<BootstrapTables>>,
    chain: Arc<Mutex<ChunkChain>>,
    notify: Arc<Notify>,
    token: CancellationToken,
    fetcher: Arc<dyn FragmentFetcher>,
    config: HdsConfig,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let cycle_start = tokio::time::Instant::now();

        let fetched = tokio::select! {
            _ = token.cancelled() => return,
            result = fetcher.fetch(&abst_url, config.max_fragment_size) => result,
        };
        let blob = match fetched {
            Ok(blob) => blob,
            Err(err) => {
                warn!(error = %err, "live bootstrap fetch failed, retrying next cycle");
                if sleep_or_cancel(&token, Duration::from_secs(1)).await {
                    return;
                }
                continue;
            }
        };

        let parsed = {
            let limits = config.bootstrap_limits.clone();
            parse_abst(&blob, &limits)
        };

        let Some(parsed) = parsed else {
            warn!("live bootstrap parse failed, retrying next cycle");
            if sleep_or_cancel(&token, Duration::from_secs(1)).await {
                return;
            }
            continue;
        };

        let last_fragment_duration = {
            let mut tables = bootstrap.lock();
            *tables = parsed;
            last_fragment_duration_ticks(&tables)
        };

        let appended = maintain_live_chunks(&bootstrap, &chain);
        if appended {
            notify.notify_waiters();
        }

        let afrt_timescale = bootstrap.lock().afrt_timescale.max(1) as u64;
        let sleep_secs = last_fragment_duration as f64 / afrt_timescale as f64;
        let elapsed = cycle_start.elapsed();
        let target = Duration::from_secs_f64(sleep_secs.max(0.0));
        let remaining = target.saturating_sub(elapsed);
        debug!(sleep_ms = remaining.as_millis() as u64, "live poller sleeping");
        if sleep_or_cancel(&token, remaining).await {
            return;
        }
    }
}

/// Returns true if the sleep was interrupted by cancellation.
async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn last_fragment_duration_ticks(tables: &BootstrapTables) -> u32 {
    use crate::box_parser::FragmentRunEntry;
    tables
        .fragment_runs
        .iter()
        .rev()
        .find_map(|e| match e {
            FragmentRunEntry::Normal {
                fragment_duration, ..
            } => Some(*fragment_duration),
            FragmentRunEntry::Discontinuity { .. } => None,
        })
        .unwrap_or(1)
}

/// Step 4 of spec §4.7: materialize the initial chunk if none exists,
/// extend the chain until the newest chunk's timestamp catches up with
/// `live_current_time`, then garbage-collect fully-drained chunks.
fn maintain_live_chunks(bootstrap: &Mutex<BootstrapTables>, chain: &Mutex<ChunkChain>) -> bool {
    let tables = bootstrap.lock();
    let mut guard = chain.lock();
    let mut appended = false;

    if guard.is_empty() {
        if let Ok(chunk) = next_chunk(&tables, None, StreamKind::Live) {
            let frag_num = chunk.frag_num;
            guard.append(chunk);
            guard.livereadpos = Some(frag_num);
            appended = true;
        }
    }

    loop {
        let Some(last_frag) = guard.last().cloned() else {
            break;
        };
        let keeps_going = last_frag.timestamp * tables.timescale.max(1) as u64
            / tables.afrt_timescale.max(1) as u64
            <= tables.live_current_time;
        if !keeps_going {
            break;
        }
        match next_chunk(&tables, Some(&last_frag), StreamKind::Live) {
            Ok(chunk) => {
                guard.append(chunk);
                appended = true;
            }
            Err(_) => break,
        }
    }

    // GC: drop fully-drained chunks from the head while a successor exists.
    loop {
        let Some(head) = guard.head() else { break };
        let Some(next) = guard.next_of(head) else { break };
        let drop_head = guard
            .get(head)
            .map(|c| c.data.is_some() && c.is_drained())
            .unwrap_or(false);
        if !drop_head {
            break;
        }
        guard.release(head);
        if guard.livereadpos == Some(head) {
            guard.livereadpos = Some(next);
        }
    }
    if guard.livereadpos.is_none() {
        guard.livereadpos = guard.head();
    }

    appended
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_abst_url_keeps_absolute_urls() {
        assert_eq!(
            resolve_abst_url("https://cdn/bootstrap", "https://base/manifest.f4m"),
            "https://cdn/bootstrap"
        );
    }

    #[test]
    fn resolve_abst_url_joins_relative_with_base() {
        assert_eq!(
            resolve_abst_url("bootstrap.bin", "https://base.example/path/manifest.f4m"),
            "https://base.example/path/bootstrap.bin"
        );
    }
}

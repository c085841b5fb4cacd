//! Configuration for the HDS adapter, grouped by concern.

use std::time::Duration;

/// Limits on how much of a bootstrap blob the parser will accept.
///
/// Excess entries beyond these limits are truncated with a warning rather
/// than rejected outright.
#[derive(Debug, Clone)]
pub struct BootstrapLimits {
    pub max_segment_runs: usize,
    pub max_fragment_runs: usize,
    pub max_servers: usize,
}

impl Default for BootstrapLimits {
    fn default() -> Self {
        Self {
            max_segment_runs: 256,
            max_fragment_runs: 10_000,
            max_servers: 10,
        }
    }
}

/// Limits on the F4M manifest XML walk.
#[derive(Debug, Clone)]
pub struct ManifestLimits {
    pub max_media_entries: usize,
    pub max_bootstrap_entries: usize,
}

impl Default for ManifestLimits {
    fn default() -> Self {
        Self {
            max_media_entries: 10,
            max_bootstrap_entries: 10,
        }
    }
}

/// How far ahead of the reader the downloader keeps fragments buffered.
#[derive(Debug, Clone)]
pub struct LeadTimeConfig {
    pub download_leadtime_secs: u64,
}

impl Default for LeadTimeConfig {
    fn default() -> Self {
        Self {
            download_leadtime_secs: 15,
        }
    }
}

/// Retry behavior for a single fragment download, applied by the
/// [`Downloader`](crate::downloader::Downloader) before marking a chunk
/// permanently failed.
#[derive(Debug, Clone)]
pub struct FetchRetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Top-level configuration for an HDS stream.
#[derive(Debug, Clone)]
pub struct HdsConfig {
    pub bootstrap_limits: BootstrapLimits,
    pub manifest_limits: ManifestLimits,
    pub lead_time: LeadTimeConfig,
    pub retry: FetchRetryConfig,
    /// Maximum accepted size of a single fragment fetch, in bytes.
    pub max_fragment_size: usize,
    /// `network-caching` setting (milliseconds), echoed back scaled to
    /// microseconds by `control(GET_PTS_DELAY)`.
    pub network_caching_ms: u64,
}

impl HdsConfig {
    pub const MAX_FRAGMENT_SIZE_DEFAULT: usize = 50 * 1024 * 1024;

    pub fn new(network_caching_ms: u64) -> Self {
        Self {
            network_caching_ms,
            ..Default::default()
        }
    }
}

impl Default for HdsConfig {
    fn default() -> Self {
        Self {
            bootstrap_limits: BootstrapLimits::default(),
            manifest_limits: ManifestLimits::default(),
            lead_time: LeadTimeConfig::default(),
            retry: FetchRetryConfig::default(),
            max_fragment_size: Self::MAX_FRAGMENT_SIZE_DEFAULT,
            network_caching_ms: 0,
        }
    }
}

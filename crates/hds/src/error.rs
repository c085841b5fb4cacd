//! Error types for the HDS adapter.

#[derive(Debug, thiserror::Error)]
pub enum HdsError {
    #[error("source is not an HDS manifest")]
    NotHds,

    #[error("manifest XML error: {source}")]
    Xml {
        #[from]
        source: quick_xml::Error,
    },

    #[error("manifest declares more than {limit} media entries")]
    TooManyMediaEntries { limit: usize },

    #[error("bootstrap base64 payload is invalid: {source}")]
    Base64 {
        #[from]
        source: base64::DecodeError,
    },

    #[error("bootstrap blob truncated: needed {needed} bytes, had {available}")]
    BootstrapTruncated { needed: usize, available: usize },

    #[error("bootstrap box malformed: {reason}")]
    BootstrapMalformed { reason: &'static str },

    #[error("fragment index could not resolve a chunk for frag_num={frag_num:?}")]
    IndexUnresolved { frag_num: Option<u32> },

    #[error("invalid fragment URL: {reason}")]
    InvalidUrl { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("fragment {url} claims {size} bytes, exceeding the {limit} byte cap")]
    Oversize { url: String, size: usize, limit: usize },

    #[error("fragment {url} fetch short: expected {expected} bytes, got {actual}")]
    FetchShort {
        url: String,
        expected: usize,
        actual: usize,
    },

    #[error("no `mdat` box found in fragment payload")]
    MdatNotFound,

    #[error("allocation failed while opening stream: {reason}")]
    Allocation { reason: String },

    #[error("stream closed")]
    Closed,
}

impl HdsError {
    /// Errors that abort `open()` outright, as opposed to ones that degrade
    /// a single bootstrap block or a single fragment.
    pub fn is_fatal_to_open(&self) -> bool {
        matches!(
            self,
            Self::NotHds | Self::TooManyMediaEntries { .. } | Self::Allocation { .. }
        )
    }

    /// Errors that only affect a single fragment fetch and should leave the
    /// chunk marked failed rather than aborting the stream.
    pub fn is_fragment_local(&self) -> bool {
        matches!(
            self,
            Self::Oversize { .. }
                | Self::FetchShort { .. }
                | Self::MdatNotFound
                | Self::Network { .. }
        )
    }
}

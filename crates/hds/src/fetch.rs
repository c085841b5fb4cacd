//! Fragment URL composition, HTTP fetch abstraction, and `mdat` location.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::error::HdsError;

/// External capability for fetching a fragment's bytes (spec §9
/// "Polymorphism over fetch"). Parameterizing the core over this trait lets
/// tests inject a deterministic fixture instead of a real HTTP client.
#[async_trait]
pub trait FragmentFetcher: Send + Sync {
    /// Fetches `url`. `max_size` rejects a fragment whose reported length is
    /// nonsensically large before the body is read in full.
    async fn fetch(&self, url: &str, max_size: usize) -> Result<Bytes, HdsError>;
}

/// `reqwest`-backed implementation of [`FragmentFetcher`].
pub struct HttpFragmentFetcher {
    client: reqwest::Client,
}

impl HttpFragmentFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FragmentFetcher for HttpFragmentFetcher {
    async fn fetch(&self, url: &str, max_size: usize) -> Result<Bytes, HdsError> {
        let response = self.client.get(url).send().await?;
        let promised = response.content_length();
        if let Some(len) = promised {
            if len as usize > max_size {
                return Err(HdsError::Oversize {
                    url: url.to_string(),
                    size: len as usize,
                    limit: max_size,
                });
            }
        }
        let body = response.bytes().await?;
        if body.len() > max_size {
            return Err(HdsError::Oversize {
                url: url.to_string(),
                size: body.len(),
                limit: max_size,
            });
        }
        if let Some(expected) = promised {
            if (body.len() as u64) < expected {
                return Err(HdsError::FetchShort {
                    url: url.to_string(),
                    expected: expected as usize,
                    actual: body.len(),
                });
            }
        }
        Ok(body)
    }
}

/// Picks the server base in priority order: the stream's own `url` if it is
/// absolute, else the first server entry, else the session-level base URL.
pub fn pick_server_base<'a>(
    stream_url: &'a str,
    servers: &'a [String],
    session_base_url: &'a str,
) -> &'a str {
    let lower = stream_url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return stream_url;
    }
    if let Some(first) = servers.first() {
        return first;
    }
    session_base_url
}

/// The movie-id path segment: the stream's `url` when present and
/// non-absolute; empty otherwise.
pub fn movie_id_segment(stream_url: &str) -> &str {
    let lower = stream_url.to_ascii_lowercase();
    if stream_url.is_empty() || lower.starts_with("http://") || lower.starts_with("https://") {
        ""
    } else {
        stream_url
    }
}

/// Builds `"{server}/{movie_id}{quality}Seg{segment}-Frag{fragment}"`.
pub fn build_fragment_url(
    server_base: &str,
    movie_id: &str,
    quality: Option<&str>,
    seg_num: u32,
    frag_num: u32,
) -> String {
    format!(
        "{}/{}{}Seg{}-Frag{}",
        server_base.trim_end_matches('/'),
        movie_id,
        quality.unwrap_or(""),
        seg_num,
        frag_num
    )
}

/// Locates the `mdat` box inside a fragment payload, walking ISO-BMFF boxes
/// from the start. Returns the byte range of the payload (not including the
/// box header).
pub fn locate_mdat(data: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut offset = 0usize;
    while offset + 8 <= data.len() {
        let size32 = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as u64;
        let tag = &data[offset + 4..offset + 8];

        let (box_size, header_size) = if size32 == 1 {
            if offset + 16 > data.len() {
                warn!("mdat locator: extended-size box header truncated");
                return None;
            }
            let ext = u64::from_be_bytes(data[offset + 8..offset + 16].try_into().unwrap());
            (ext as usize, 16usize)
        } else if size32 == 0 {
            (data.len() - offset, 8usize)
        } else {
            (size32 as usize, 8usize)
        };

        if box_size < header_size || offset + box_size > data.len() {
            warn!(box_size, "mdat locator: box size out of bounds");
            return None;
        }

        let body_start = offset + header_size;
        let body_end = offset + box_size;
        if tag == b"mdat" {
            return Some(body_start..body_end);
        }
        offset += box_size;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_base_prefers_absolute_stream_url() {
        let servers = vec!["http://s1".to_string()];
        assert_eq!(
            pick_server_base("https://cdn.example/path", &servers, "http://base"),
            "https://cdn.example/path"
        );
    }

    #[test]
    fn server_base_falls_back_to_server_entry_then_base_url() {
        let servers = vec!["http://s1".to_string()];
        assert_eq!(pick_server_base("relative", &servers, "http://base"), "http://s1");
        assert_eq!(pick_server_base("relative", &[], "http://base"), "http://base");
    }

    #[test]
    fn movie_id_segment_is_empty_for_absolute_urls() {
        assert_eq!(movie_id_segment("http://cdn/movie"), "");
        assert_eq!(movie_id_segment("movie"), "movie");
        assert_eq!(movie_id_segment(""), "");
    }

    #[test]
    fn builds_fragment_url_per_template() {
        let url = build_fragment_url("http://base", "movie", None, 1, 4);
        assert_eq!(url, "http://base/movieSeg1-Frag4");
    }

    #[test]
    fn locates_mdat_box() {
        let mut data = Vec::new();
        // ftyp box (8 + 4 bytes)
        data.extend_from_slice(&12u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(&[0u8; 4]);
        // mdat box with 5-byte payload
        let mdat_start_box = data.len();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(b"hello");

        let range = locate_mdat(&data).unwrap();
        assert_eq!(range, (mdat_start_box + 8)..(mdat_start_box + 13));
        assert_eq!(&data[range], b"hello");
    }

    #[test]
    fn truncated_box_fails_locate() {
        let data = vec![0, 0, 0, 100, b'm', b'd', b'a', b't', 1, 2];
        assert!(locate_mdat(&data).is_none());
    }
}

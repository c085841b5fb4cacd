//! Binary parser for the F4F bootstrap box (`abst` → `asrt` + `afrt`).
//!
//! All multi-byte integers are big-endian. Every read is bounds-checked
//! against the remaining slice before it happens — on shortfall the parser
//! stops and returns whatever it has captured so far, it never reads past
//! the blob (spec §4.1 "Bounds").

use tracing::warn;

use crate::config::BootstrapLimits;

/// One entry of the `asrt` segment-run table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRun {
    pub first_segment: u32,
    pub fragments_per_segment: u32,
}

/// One entry of the `afrt` fragment-run table.
///
/// Modeled as a tagged variant rather than a struct whose `duration == 0`
/// overloads a discontinuity flag (spec §9 "Tagged variants").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRunEntry {
    Normal {
        fragment_number_start: u32,
        fragment_timestamp: u64,
        fragment_duration: u32,
    },
    Discontinuity {
        fragment_number_start: u32,
    },
}

impl FragmentRunEntry {
    pub fn fragment_number_start(&self) -> u32 {
        match self {
            Self::Normal {
                fragment_number_start,
                ..
            } => *fragment_number_start,
            Self::Discontinuity {
                fragment_number_start,
            } => *fragment_number_start,
        }
    }
}

/// The timing tables extracted from a bootstrap blob.
#[derive(Debug, Clone, Default)]
pub struct BootstrapTables {
    pub movie_id: String,
    pub timescale: u32,
    pub live_current_time: u64,
    pub servers: Vec<String>,
    pub quality_modifier: Option<String>,
    pub segment_runs: Vec<SegmentRun>,
    pub afrt_timescale: u32,
    pub fragment_runs: Vec<FragmentRunEntry>,
}

/// Bounds-checked cursor over a bootstrap blob. Every accessor returns
/// `None` rather than panicking when the remaining bytes are insufficient.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes(b.try_into().unwrap()))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Reads a NUL-terminated string; the terminator is consumed but not
    /// included in the returned value.
    fn cstring(&mut self) -> Option<String> {
        let start = self.pos;
        let nul = self.data[self.pos..].iter().position(|&b| b == 0)?;
        let end = start + nul;
        self.pos = end + 1;
        Some(String::from_utf8_lossy(&self.data[start..end]).into_owned())
    }
}

/// Reads a box header, returning `(total_box_size, fourcc, header_size)`.
/// Handles the 32-bit size, 64-bit extended size (`size == 1`), and
/// box-extends-to-EOF (`size == 0`) cases per the ISOBMFF convention.
fn read_box_header(data: &[u8]) -> Option<(usize, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }
    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let fourcc: [u8; 4] = [data[4], data[5], data[6], data[7]];

    if size == 1 {
        if data.len() < 16 {
            return None;
        }
        let ext = u64::from_be_bytes(data[8..16].try_into().unwrap());
        Some((ext as usize, fourcc, 16))
    } else if size == 0 {
        Some((data.len(), fourcc, 8))
    } else {
        Some((size as usize, fourcc, 8))
    }
}

/// Parses a top-level `abst` box, including its embedded `asrt`/`afrt` blocks.
///
/// Returns `None` (logging a warning) when the box is truncated before its
/// mandatory fixed-size header fields can be read; a shortfall further in
/// (servers, quality labels, sub-boxes) truncates the corresponding table
/// instead of failing the whole bootstrap.
pub fn parse_abst(data: &[u8], limits: &BootstrapLimits) -> Option<BootstrapTables> {
    let (box_size, fourcc, header_size) = read_box_header(data)?;
    if &fourcc != b"abst" {
        warn!(?fourcc, "expected abst box, got different fourcc");
        return None;
    }
    let body_end = box_size.min(data.len());
    let mut r = Reader::new(&data[header_size..body_end]);

    r.u32()?; // version/flags, ignored
    r.u32()?; // bootstrap version, ignored
    r.u8()?; // profile/flags, ignored
    let timescale = r.u32()?;
    let live_current_time = r.u64()?;
    r.u64()?; // SMPTE offset, ignored
    let movie_id = r.cstring()?;

    let server_count = r.u8()? as usize;
    let mut servers = Vec::with_capacity(server_count.min(limits.max_servers));
    for i in 0..server_count {
        let Some(s) = r.cstring() else {
            warn!("abst server table truncated");
            break;
        };
        if i < limits.max_servers {
            servers.push(s);
        } else if i == limits.max_servers {
            warn!(limit = limits.max_servers, "truncating abst server table");
        }
    }

    let quality_count = r.u8()? as usize;
    let mut quality_labels = Vec::with_capacity(quality_count);
    for _ in 0..quality_count {
        let Some(q) = r.cstring() else {
            warn!("abst quality table truncated");
            break;
        };
        quality_labels.push(q);
    }
    // Resolved open question: the original only ever matches when the
    // modifier itself is already set, which never happens on a fresh parse,
    // so every asrt/afrt block is captured unconditionally. We instead
    // collect the single label when exactly one is present and use it as
    // the (now meaningful) gating value, soft-failing a bootstrap that
    // names more than one quality.
    let quality_modifier = match quality_labels.len() {
        0 => None,
        1 => Some(quality_labels.into_iter().next().unwrap()),
        n => {
            warn!(count = n, "abst carries more than one quality label");
            return None;
        }
    };

    r.cstring()?; // DRM blob, ignored
    r.cstring()?; // metadata blob, ignored

    let mut tables = BootstrapTables {
        movie_id,
        timescale,
        live_current_time,
        servers,
        quality_modifier,
        segment_runs: Vec::new(),
        afrt_timescale: 0,
        fragment_runs: Vec::new(),
    };

    let Some(asrt_count) = r.u8() else {
        warn!("abst truncated before asrt_count");
        return Some(tables);
    };
    for _ in 0..asrt_count {
        let remaining_offset = header_size + r.pos;
        let Some(consumed) = parse_asrt(&data[remaining_offset..body_end], &mut tables, limits)
        else {
            warn!("asrt block truncated or malformed, stopping bootstrap parse");
            return Some(tables);
        };
        r.pos += consumed;
    }

    let Some(afrt_count) = r.u8() else {
        warn!("abst truncated before afrt_count");
        return Some(tables);
    };
    for _ in 0..afrt_count {
        let remaining_offset = header_size + r.pos;
        let Some(consumed) = parse_afrt(&data[remaining_offset..body_end], &mut tables, limits)
        else {
            warn!("afrt block truncated or malformed, stopping bootstrap parse");
            return Some(tables);
        };
        r.pos += consumed;
    }

    Some(tables)
}

/// Parses one `asrt` block, appending its segment-run entries to `tables`
/// when the quality gate matches. Returns the number of bytes consumed
/// (the full box, including its header) so the caller can advance past it.
fn parse_asrt(data: &[u8], tables: &mut BootstrapTables, limits: &BootstrapLimits) -> Option<usize> {
    let (box_size, fourcc, header_size) = read_box_header(data)?;
    if &fourcc != b"asrt" {
        return None;
    }
    let body_end = box_size.min(data.len());
    let mut r = Reader::new(&data[header_size..body_end]);

    r.u32()?; // version/flags, ignored
    let quality_count = r.u8()? as usize;
    let mut labels = Vec::with_capacity(quality_count);
    for _ in 0..quality_count {
        labels.push(r.cstring()?);
    }
    let quality_found = quality_matches(tables.quality_modifier.as_deref(), &labels);

    let entry_count = r.u32()?;
    for i in 0..entry_count {
        let first_segment = r.u32()?;
        let fragments_per_segment = r.u32()?;
        if !quality_found {
            continue;
        }
        if tables.segment_runs.len() >= limits.max_segment_runs {
            if i == limits.max_segment_runs as u32 {
                warn!(limit = limits.max_segment_runs, "truncating segment-run table");
            }
            continue;
        }
        tables.segment_runs.push(SegmentRun {
            first_segment,
            fragments_per_segment,
        });
    }

    Some(box_size)
}

/// Parses one `afrt` block, appending its fragment-run entries to `tables`
/// when the quality gate matches. Returns the number of bytes consumed.
fn parse_afrt(data: &[u8], tables: &mut BootstrapTables, limits: &BootstrapLimits) -> Option<usize> {
    let (box_size, fourcc, header_size) = read_box_header(data)?;
    if &fourcc != b"afrt" {
        return None;
    }
    let body_end = box_size.min(data.len());
    let mut r = Reader::new(&data[header_size..body_end]);

    r.u32()?; // version/flags, ignored
    let afrt_timescale = r.u32()?;
    let quality_count = r.u8()? as usize;
    let mut labels = Vec::with_capacity(quality_count);
    for _ in 0..quality_count {
        labels.push(r.cstring()?);
    }
    let quality_found = quality_matches(tables.quality_modifier.as_deref(), &labels);
    if quality_found {
        tables.afrt_timescale = afrt_timescale;
    }

    let entry_count = r.u32()?;
    for i in 0..entry_count {
        let fragment_number_start = r.u32()?;
        let fragment_timestamp = r.u64()?;
        let fragment_duration = r.u32()?;
        let entry = if fragment_duration == 0 {
            let _discont = r.u8()?;
            FragmentRunEntry::Discontinuity {
                fragment_number_start,
            }
        } else {
            FragmentRunEntry::Normal {
                fragment_number_start,
                fragment_timestamp,
                fragment_duration,
            }
        };
        if !quality_found {
            continue;
        }
        if tables.fragment_runs.len() >= limits.max_fragment_runs {
            if i == limits.max_fragment_runs as u32 {
                warn!(limit = limits.max_fragment_runs, "truncating fragment-run table");
            }
            continue;
        }
        tables.fragment_runs.push(entry);
    }

    Some(box_size)
}

/// Matches the stream's quality modifier by prefix against a block's labels.
/// With no modifier set, every block is captured unconditionally (the
/// modifier only gates the match when it's actually set).
fn quality_matches(modifier: Option<&str>, labels: &[String]) -> bool {
    match modifier {
        None => true,
        Some(m) => labels.iter().any(|l| l.starts_with(m)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let size = (8 + body.len()) as u32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn make_asrt(labels: &[&str], runs: &[(u32, u32)]) -> Vec<u8> {
        let mut body = vec![0u8; 4]; // version/flags
        body.push(labels.len() as u8);
        for l in labels {
            body.extend_from_slice(&cstr(l));
        }
        body.extend_from_slice(&(runs.len() as u32).to_be_bytes());
        for (first, per) in runs {
            body.extend_from_slice(&first.to_be_bytes());
            body.extend_from_slice(&per.to_be_bytes());
        }
        make_box(b"asrt", &body)
    }

    fn make_afrt(
        afrt_timescale: u32,
        labels: &[&str],
        entries: &[FragmentRunEntry],
    ) -> Vec<u8> {
        let mut body = vec![0u8; 4]; // version/flags
        body.extend_from_slice(&afrt_timescale.to_be_bytes());
        body.push(labels.len() as u8);
        for l in labels {
            body.extend_from_slice(&cstr(l));
        }
        body.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for entry in entries {
            match *entry {
                FragmentRunEntry::Normal {
                    fragment_number_start,
                    fragment_timestamp,
                    fragment_duration,
                } => {
                    body.extend_from_slice(&fragment_number_start.to_be_bytes());
                    body.extend_from_slice(&fragment_timestamp.to_be_bytes());
                    body.extend_from_slice(&fragment_duration.to_be_bytes());
                }
                FragmentRunEntry::Discontinuity {
                    fragment_number_start,
                } => {
                    body.extend_from_slice(&fragment_number_start.to_be_bytes());
                    body.extend_from_slice(&0u64.to_be_bytes());
                    body.extend_from_slice(&0u32.to_be_bytes());
                    body.push(0); // discont marker byte
                }
            }
        }
        make_box(b"afrt", &body)
    }

    fn make_abst(
        timescale: u32,
        live_current_time: u64,
        movie_id: &str,
        servers: &[&str],
        qualities: &[&str],
        asrt_blocks: &[Vec<u8>],
        afrt_blocks: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes()); // version/flags
        body.extend_from_slice(&0u32.to_be_bytes()); // bootstrap version
        body.push(0); // profile/flags
        body.extend_from_slice(&timescale.to_be_bytes());
        body.extend_from_slice(&live_current_time.to_be_bytes());
        body.extend_from_slice(&0u64.to_be_bytes()); // SMPTE offset
        body.extend_from_slice(&cstr(movie_id));
        body.push(servers.len() as u8);
        for s in servers {
            body.extend_from_slice(&cstr(s));
        }
        body.push(qualities.len() as u8);
        for q in qualities {
            body.extend_from_slice(&cstr(q));
        }
        body.extend_from_slice(&cstr("")); // DRM blob
        body.extend_from_slice(&cstr("")); // metadata blob
        body.push(asrt_blocks.len() as u8);
        for b in asrt_blocks {
            body.extend_from_slice(b);
        }
        body.push(afrt_blocks.len() as u8);
        for b in afrt_blocks {
            body.extend_from_slice(b);
        }
        make_box(b"abst", &body)
    }

    #[test]
    fn parses_single_quality_single_run() {
        let asrt = make_asrt(&[], &[(1, 4)]);
        let afrt = make_afrt(
            1000,
            &[],
            &[FragmentRunEntry::Normal {
                fragment_number_start: 1,
                fragment_timestamp: 0,
                fragment_duration: 2500,
            }],
        );
        let abst = make_abst(1000, 0, "movie", &[], &[], &[asrt], &[afrt]);

        let tables = parse_abst(&abst, &BootstrapLimits::default()).unwrap();
        assert_eq!(tables.timescale, 1000);
        assert_eq!(tables.movie_id, "movie");
        assert_eq!(tables.segment_runs.len(), 1);
        assert_eq!(tables.segment_runs[0].first_segment, 1);
        assert_eq!(tables.fragment_runs.len(), 1);
        assert_eq!(tables.afrt_timescale, 1000);
    }

    #[test]
    fn discontinuity_marker_parsed_as_tagged_variant() {
        let afrt = make_afrt(
            1000,
            &[],
            &[
                FragmentRunEntry::Normal {
                    fragment_number_start: 1,
                    fragment_timestamp: 0,
                    fragment_duration: 2000,
                },
                FragmentRunEntry::Discontinuity {
                    fragment_number_start: 0,
                },
                FragmentRunEntry::Normal {
                    fragment_number_start: 10,
                    fragment_timestamp: 50000,
                    fragment_duration: 2000,
                },
            ],
        );
        let abst = make_abst(1000, 0, "movie", &[], &[], &[], &[afrt]);
        let tables = parse_abst(&abst, &BootstrapLimits::default()).unwrap();
        assert_eq!(tables.fragment_runs.len(), 3);
        assert!(matches!(
            tables.fragment_runs[1],
            FragmentRunEntry::Discontinuity { .. }
        ));
    }

    #[test]
    fn unset_modifier_captures_block_with_its_own_quality_label() {
        let asrt = make_asrt(&["hd"], &[(1, 4)]);
        let afrt = make_afrt(
            1000,
            &["hd"],
            &[FragmentRunEntry::Normal {
                fragment_number_start: 1,
                fragment_timestamp: 0,
                fragment_duration: 2500,
            }],
        );
        let abst = make_abst(1000, 0, "movie", &[], &[], &[asrt], &[afrt]);

        let tables = parse_abst(&abst, &BootstrapLimits::default()).unwrap();
        assert_eq!(tables.segment_runs.len(), 1);
        assert_eq!(tables.fragment_runs.len(), 1);
        assert_eq!(tables.afrt_timescale, 1000);
    }

    #[test]
    fn more_than_one_quality_label_soft_fails_bootstrap() {
        let abst = make_abst(1000, 0, "movie", &[], &["hi", "lo"], &[], &[]);
        assert!(parse_abst(&abst, &BootstrapLimits::default()).is_none());
    }

    #[test]
    fn truncated_box_returns_partial_tables() {
        let mut abst = make_abst(1000, 0, "movie", &[], &[], &[], &[]);
        abst.truncate(abst.len() - 2);
        // still parses the fixed header fields before the truncation point
        let tables = parse_abst(&abst, &BootstrapLimits::default());
        assert!(tables.is_some());
    }

    #[test]
    fn read_box_header_handles_extended_size() {
        let mut data = vec![0, 0, 0, 1, b'a', b'b', b's', b't'];
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        let (size, fourcc, header_size) = read_box_header(&data).unwrap();
        assert_eq!(size, 24);
        assert_eq!(&fourcc, b"abst");
        assert_eq!(header_size, 16);
    }
}

//! Given timing tables and a predecessor chunk, computes the next chunk's
//! `(frag_num, seg_num, timestamp, duration, eof)`.
//!
//! This is a pure function over [`crate::box_parser::BootstrapTables`] and
//! an optional predecessor [`Chunk`] — no locking, no I/O. The caller
//! (downloader, live poller, or reader) holds the bootstrap mutex for the
//! duration of the call.

use crate::box_parser::{BootstrapTables, FragmentRunEntry};
use crate::chunk::Chunk;
use crate::error::HdsError;

/// Whether the stream being indexed is VOD or live; the two differ in how
/// the first chunk (no predecessor) is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Vod { total_duration_seconds: u64 },
    Live,
}

/// Computes the next chunk following `last`, or the first chunk of the
/// stream if `last` is `None`.
pub fn next_chunk(
    tables: &BootstrapTables,
    last: Option<&Chunk>,
    kind: StreamKind,
) -> Result<Chunk, HdsError> {
    let entries = &tables.fragment_runs;
    if entries.is_empty() {
        return Err(HdsError::IndexUnresolved {
            frag_num: last.map(|c| c.frag_num),
        });
    }

    let (mut frag_num, mut timestamp, start_frun, mut unresolved) = match last {
        Some(l) => {
            let start = match kind {
                StreamKind::Vod { .. } => l.frun_entry,
                StreamKind::Live => 0,
            };
            (l.frag_num + 1, l.timestamp + l.duration as u64, start, false)
        }
        None => match kind {
            StreamKind::Vod { .. } => {
                let Some(first_normal) = first_normal_entry(entries, 0) else {
                    return Err(HdsError::IndexUnresolved { frag_num: None });
                };
                (
                    first_normal.fragment_number_start(),
                    timestamp_of(first_normal),
                    0,
                    false,
                )
            }
            StreamKind::Live => {
                let timestamp =
                    tables.live_current_time * tables.afrt_timescale as u64 / tables.timescale.max(1) as u64;
                (0, timestamp, 0, true)
            }
        },
    };

    let mut duration: u32 = 0;
    let mut matched_entry: Option<usize> = None;
    let mut idx = start_frun;

    while idx < entries.len() {
        match entries[idx] {
            FragmentRunEntry::Discontinuity { .. } => {
                let Some(succ) = entries.get(idx + 1) else {
                    return Err(HdsError::IndexUnresolved {
                        frag_num: Some(frag_num),
                    });
                };
                match succ {
                    FragmentRunEntry::Normal {
                        fragment_number_start,
                        fragment_timestamp,
                        ..
                    } => {
                        frag_num = *fragment_number_start;
                        timestamp = *fragment_timestamp;
                        unresolved = false;
                        idx += 1;
                        continue;
                    }
                    FragmentRunEntry::Discontinuity { .. } => {
                        return Err(HdsError::IndexUnresolved {
                            frag_num: Some(frag_num),
                        });
                    }
                }
            }
            FragmentRunEntry::Normal {
                fragment_number_start,
                fragment_timestamp,
                fragment_duration,
            } => {
                if unresolved {
                    let next_ts = next_normal_timestamp(entries, idx);
                    let in_range = match next_ts {
                        Some(next) => timestamp >= fragment_timestamp && timestamp < next,
                        None => true,
                    };
                    if in_range {
                        frag_num = fragment_number_start
                            + ((timestamp - fragment_timestamp) / fragment_duration as u64) as u32;
                        duration = fragment_duration;
                        unresolved = false;
                    }
                }

                let next_frag_start = entries.get(idx + 1).map(|e| e.fragment_number_start());
                let is_last = idx + 1 >= entries.len();
                let condition_c = fragment_number_start <= frag_num
                    && (is_last || next_frag_start.unwrap() > frag_num);

                if condition_c {
                    duration = fragment_duration;
                    timestamp = fragment_timestamp
                        + duration as u64 * (frag_num - fragment_number_start) as u64;
                    matched_entry = Some(idx);
                    break;
                }
            }
        }
        idx += 1;
    }

    let Some(frun_entry) = matched_entry else {
        return Err(HdsError::IndexUnresolved {
            frag_num: Some(frag_num),
        });
    };

    let seg_num = resolve_segment_number(tables, frag_num)?;

    let mut chunk = Chunk::new(frag_num, seg_num, timestamp, duration, frun_entry);
    if let StreamKind::Vod {
        total_duration_seconds,
    } = kind
    {
        let afrt_ts = tables.afrt_timescale.max(1) as u64;
        if (timestamp + duration as u64) / afrt_ts >= total_duration_seconds {
            chunk.eof = true;
        }
    }
    Ok(chunk)
}

fn first_normal_entry(entries: &[FragmentRunEntry], from: usize) -> Option<&FragmentRunEntry> {
    entries[from..]
        .iter()
        .find(|e| matches!(e, FragmentRunEntry::Normal { .. }))
}

fn timestamp_of(entry: &FragmentRunEntry) -> u64 {
    match entry {
        FragmentRunEntry::Normal {
            fragment_timestamp, ..
        } => *fragment_timestamp,
        FragmentRunEntry::Discontinuity { .. } => 0,
    }
}

fn next_normal_timestamp(entries: &[FragmentRunEntry], idx: usize) -> Option<u64> {
    match entries.get(idx + 1) {
        Some(FragmentRunEntry::Normal {
            fragment_timestamp, ..
        }) => Some(*fragment_timestamp),
        _ => None,
    }
}

/// Step 5: resolve `seg_num` for a given `frag_num` by walking
/// `segment_runs`. Literal translation of spec §4.3 step 5, including its
/// `fragments_accum` seeding from `frag_num` itself (not zero) at each call.
fn resolve_segment_number(tables: &BootstrapTables, frag_num: u32) -> Result<u32, HdsError> {
    let runs = &tables.segment_runs;
    if runs.is_empty() {
        return Err(HdsError::IndexUnresolved {
            frag_num: Some(frag_num),
        });
    }

    let mut fragments_accum: u32 = frag_num;
    let mut idx = 0;
    while idx < runs.len() {
        let entry = runs[idx];
        let segment =
            entry.first_segment + (frag_num - fragments_accum) / entry.fragments_per_segment.max(1);
        let is_last = idx + 1 >= runs.len();
        let accept = is_last || runs[idx + 1].first_segment > segment;
        if accept {
            return Ok(segment);
        }
        let next = runs[idx + 1];
        fragments_accum += (next.first_segment - entry.first_segment) * entry.fragments_per_segment;
        idx += 1;
    }
    Err(HdsError::IndexUnresolved {
        frag_num: Some(frag_num),
    })
}

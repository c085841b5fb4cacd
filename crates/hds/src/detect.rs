//! Sniffing an upstream byte stream for an HDS (F4M) manifest.

const PROBE_LEN: usize = 200;
const NEEDLE: &str = "<manifest";

/// Returns true if the first 200 bytes of `probe`, decoded from UTF-16 LE/BE
/// if a byte-order mark is present (otherwise used as-is), contain `"<manifest"`.
pub fn is_hds_manifest(probe: &[u8]) -> bool {
    let probe = &probe[..probe.len().min(PROBE_LEN)];

    if probe.len() >= 2 && probe[0] == 0xFF && probe[1] == 0xFE {
        return contains_needle_utf16(&probe[2..], u16::from_le_bytes);
    }
    if probe.len() >= 2 && probe[0] == 0xFE && probe[1] == 0xFF {
        return contains_needle_utf16(&probe[2..], u16::from_be_bytes);
    }

    contains_needle_ascii(probe)
}

fn contains_needle_ascii(probe: &[u8]) -> bool {
    probe
        .windows(NEEDLE.len())
        .any(|window| window == NEEDLE.as_bytes())
}

fn contains_needle_utf16(probe: &[u8], to_u16: fn([u8; 2]) -> u16) -> bool {
    let units: Vec<u16> = probe
        .chunks_exact(2)
        .map(|pair| to_u16([pair[0], pair[1]]))
        .collect();
    let needle: Vec<u16> = NEEDLE.encode_utf16().collect();
    units
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

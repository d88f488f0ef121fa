//! Secret Masker (component B): a pure, deterministic function that
//! replaces every occurrence of a known secret value in a byte buffer with
//! a redaction token.
//!
//! Scans left to right, and at each position prefers the longest matching
//! value so that a secret which is a prefix of another doesn't leave a
//! partial reveal behind (e.g. masking `"abc"` before `"abcdef"` at the
//! same position would leak `"def"`).

use std::collections::BTreeMap;

pub const REDACTION_TOKEN: &[u8] = b"[REDACTED]";

/// Replace every occurrence of any non-empty value in `secrets` with
/// `[REDACTED]`. Empty values are never matched (an empty needle would
/// match everywhere). `secrets` maps an arbitrary id to the value to mask;
/// the id is not used by this function but is accepted for symmetry with
/// callers that fetch secrets as `id -> value` maps (see the log collector).
pub fn mask_secrets(bytes: &[u8], secrets: &BTreeMap<String, String>) -> Vec<u8> {
    let mut values: Vec<&[u8]> = secrets
        .values()
        .map(|v| v.as_bytes())
        .filter(|v| !v.is_empty())
        .collect();
    // Longest-match preference: sort longest first so the first match found
    // at a given position is the longest one.
    values.sort_by(|a, b| b.len().cmp(&a.len()));

    if values.is_empty() {
        return bytes.to_vec();
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match values.iter().find(|v| bytes[i..].starts_with(**v)) {
            Some(matched) => {
                out.extend_from_slice(REDACTION_TOKEN);
                i += matched.len();
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    out
}

/// True if `bytes` contains at least one redaction token.
pub fn has_redacted_content(bytes: &[u8]) -> bool {
    find_all(bytes, REDACTION_TOKEN).next().is_some()
}

/// Number of non-overlapping redaction tokens in `bytes`.
pub fn count_redactions(bytes: &[u8]) -> usize {
    find_all(bytes, REDACTION_TOKEN).count()
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if needle.is_empty() || pos + needle.len() > haystack.len() {
            return None;
        }
        haystack[pos..].windows(needle.len()).position(|w| w == needle).map(|found| {
            let start = pos + found;
            pos = start + needle.len();
            start
        })
    })
}

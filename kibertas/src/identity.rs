//! Unique names for the disposable namespaces every check works in.
use chrono::{DateTime, Utc};
use rand::Rng;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 5;

/// Returns `{prefix}-{YYYYMMDD}-{suffix}` where the suffix is a random lowercase alphanumeric
/// string, so the result is a valid DNS-1123 label as long as the prefix is.
pub fn workspace_name(prefix: &str) -> String {
    workspace_name_at(prefix, Utc::now())
}

pub fn workspace_name_at(prefix: &str, now: DateTime<Utc>) -> String {
    format!(
        "{prefix}-{}-{}",
        now.format("%Y%m%d"),
        random_suffix(SUFFIX_LEN)
    )
}

/// Random string of `len` characters in `[a-z0-9]`.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

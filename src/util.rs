use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

/// The base currency symbol.
pub const SYMBOL: &str = "\u{a4}";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SOURCE_URL: &str = "https://github.com/luk3yx/lurkcoin-core";
pub const REPORT_SECURITY: &str = "https://gitlab.com/luk3yx/lurkcoin-core/-/issues/new";
// Copyrights are separated by newlines.
pub const COPYRIGHT: &str = "Copyright \u{a9} 2020 by luk3yx";

/// Derives the canonical lookup key for an account name: lowercased, spaces
/// stripped, and anything outside `[a-z0-9_]` replaced with `_`. Idempotent.
pub fn homogenise_username(username: &str) -> String {
    username
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ')
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Strips leading and trailing spaces and replaces control characters with
/// `\u{fffd}` so the name is safe to display. Returns the cleaned string and
/// its character count; `homogenise_username(pasteurise_username(x).0)` always
/// equals `homogenise_username(x)`.
pub fn pasteurise_username(username: &str) -> (String, usize) {
    let mut count = 0;
    let res = username
        .trim_matches(' ')
        .chars()
        .map(|c| {
            count += 1;
            if c.is_control() {
                '\u{fffd}'
            } else {
                c
            }
        })
        .collect();
    (res, count)
}

/// Mints a secure random API token: 1024 random bits, URL-safe base64.
pub fn generate_token() -> String {
    let mut raw = [0u8; 128];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// Returns true if `a == b` in constant time. Leaks string lengths, which is
/// already deducible from `generate_token()`.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// The current unix time in seconds.
pub fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret)
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"default").expect("hmac"))
}

/// Hex HMAC-SHA-256 over the exact raw request bytes.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a received signature header against the raw body.
///
/// An optional algorithm tag before `=` (e.g. `sha256=`) is stripped.
/// The comparison runs in constant time; malformed input (non-hex,
/// wrong length) is a verification failure, never a panic.
pub fn verify_signature(signature_header: &str, body: &[u8], secret: &[u8]) -> bool {
    let hex_digest = match signature_header.split_once('=') {
        Some((_, rest)) => rest,
        None => signature_header,
    };

    let Ok(received) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = mac_for(secret);
    mac.update(body);
    mac.verify_slice(&received).is_ok()
}

/// Freshness check for the timestamp header.
///
/// Accepts iff `|now - timestamp| <= window_secs`; unparsable input
/// is rejected. Clock skew in either direction counts against the window.
pub fn is_timestamp_fresh(timestamp: &str, now_secs: u64, window_secs: u64) -> bool {
    let Ok(ts) = timestamp.trim().parse::<u64>() else {
        return false;
    };
    now_secs.abs_diff(ts) <= window_secs
}

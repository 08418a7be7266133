//! Hand-rolled field scanners for the two keys the hot path cares about.
//! Full JSON parsing is deliberately avoided; payloads are forwarded as-is.

#[inline(always)]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reads the unsigned decimal value of the `"u"` field. None when the key
/// is missing or no digits follow the colon; overflow also rejects.
pub fn extract_update_id(payload: &[u8]) -> Option<u64> {
    let key = find(payload, b"\"u\"")?;
    let rest = &payload[key + 3..];
    let colon = rest.iter().position(|&b| b == b':')?;
    let mut i = colon + 1;
    while i < rest.len() && rest[i] <= b' ' {
        i += 1;
    }
    let mut value: u64 = 0;
    let mut digits = 0usize;
    while i < rest.len() && rest[i].is_ascii_digit() {
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(rest[i] - b'0'))?;
        i += 1;
        digits += 1;
    }
    if digits == 0 {
        return None;
    }
    Some(value)
}

/// Reads the integer millisecond value of the `"E"` field; 0 when absent.
pub fn extract_event_ts_ms(payload: &[u8]) -> i64 {
    let Some(key) = find(payload, b"\"E\":") else {
        return 0;
    };
    let rest = &payload[key + 4..];
    let mut value: i64 = 0;
    for &b in rest {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(b - b'0'));
    }
    value
}

//! General utilities shared across the crate: XML helpers for SOAP/DIDL
//! payloads, the `H:MM:SS` time formats used on the AVTransport wire, and
//! MAC address formatting for slot names and the config store.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen
/// in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// XML helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Escapes XML special characters (& < > " ').
#[must_use]
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Reverses [`escape_xml`] for payloads that arrive double-encoded
/// (LastChange bodies, DIDL inside SOAP responses).
#[must_use]
pub fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extracts the text content of the first `<tag>...</tag>` element.
///
/// Tolerant of namespace prefixes and attributes on the element. Returns
/// `None` when the tag is absent or empty-bodied. This is the workhorse for
/// pulling single values out of SOAP responses without a full parse.
#[must_use]
pub fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    let open_a = format!("<{}>", tag);
    let open_b = format!("<{} ", tag);
    let close = format!("</{}>", tag);

    let start = if let Some(idx) = xml.find(&open_a) {
        idx + open_a.len()
    } else {
        let idx = xml.find(&open_b)?;
        idx + xml[idx..].find('>')? + 1
    };

    let end = xml[start..].find(&close)? + start;
    let text = xml[start..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(unescape_xml(text))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport time formats
// ─────────────────────────────────────────────────────────────────────────────

/// Parses an AVTransport `RelTime`/`TrackDuration` value (`H:MM:SS` or
/// `HH:MM:SS`, optionally with a fractional part) into milliseconds.
///
/// Malformed input yields 0 — renderers report `NOT_IMPLEMENTED` or empty
/// strings for live sources and that must never be fatal.
#[must_use]
pub fn parse_time_ms(s: &str) -> u32 {
    let (hms, frac) = match s.split_once('.') {
        Some((h, f)) => (h, f),
        None => (s, ""),
    };

    let mut parts = hms.split(':').rev();
    let secs: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let mins: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let hours: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    let millis: u32 = if frac.is_empty() {
        0
    } else {
        // normalize "5" -> 500ms, "05" -> 50ms, "005" -> 5ms
        let mut f: u32 = frac.chars().take(3).fold(0, |acc, c| {
            acc * 10 + c.to_digit(10).unwrap_or(0)
        });
        for _ in frac.len()..3 {
            f *= 10;
        }
        f
    };

    (hours * 3600 + mins * 60 + secs) * 1000 + millis
}

/// Formats milliseconds as the `H:MM:SS` seek target (seconds rounded).
#[must_use]
pub fn format_time_hms(ms: u32) -> String {
    let secs = (ms + 500) / 1000;
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Formats milliseconds as the DIDL `res/@duration` value
/// (`H:MM:SS.mmm`, zero-padded).
#[must_use]
pub fn format_duration_didl(ms: u32) -> String {
    let (secs, millis) = (ms / 1000, ms % 1000);
    format!(
        "{}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// MAC addresses
// ─────────────────────────────────────────────────────────────────────────────

/// Formats a MAC with the given separator (`:` in the config store, `-` in
/// virtual slot names).
#[must_use]
pub fn format_mac(mac: &[u8; 6], sep: char) -> String {
    let parts: Vec<String> = mac.iter().map(|b| format!("{:02x}", b)).collect();
    parts.join(&sep.to_string())
}

/// Parses a `aa:bb:cc:dd:ee:ff` MAC string. Returns `None` on malformed
/// input rather than erroring; callers fall back to a derived MAC.
#[must_use]
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?.trim(), 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// Derives a stable pseudo hardware address from a renderer UDN.
///
/// Used when ARP resolution is unavailable: LMS identifies players by MAC,
/// so the value only needs to be unique and stable across restarts.
#[must_use]
pub fn mac_from_udn(udn: &str) -> [u8; 6] {
    // FNV-1a over the UDN, low bytes into the address
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in udn.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    let bytes = hash.to_be_bytes();
    [0x02, bytes[2], bytes[3], bytes[4], bytes[5], bytes[6]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        let raw = r#"Fish & Chips <"deluxe">'n more"#;
        assert_eq!(unescape_xml(&escape_xml(raw)), raw);
    }

    #[test]
    fn extract_plain_tag() {
        let xml = "<r><RelTime>0:01:05</RelTime></r>";
        assert_eq!(extract_xml_text(xml, "RelTime").as_deref(), Some("0:01:05"));
    }

    #[test]
    fn extract_tag_with_attributes() {
        let xml = r#"<CurrentVolume channel="Master" val="12">37</CurrentVolume>"#;
        assert_eq!(extract_xml_text(xml, "CurrentVolume").as_deref(), Some("37"));
    }

    #[test]
    fn extract_missing_or_empty_is_none() {
        assert_eq!(extract_xml_text("<a><b>x</b></a>", "c"), None);
        assert_eq!(extract_xml_text("<a><b></b></a>", "b"), None);
    }

    #[test]
    fn parse_time_variants() {
        assert_eq!(parse_time_ms("0:00:00"), 0);
        assert_eq!(parse_time_ms("0:01:05"), 65_000);
        assert_eq!(parse_time_ms("01:02:03"), 3_723_000);
        assert_eq!(parse_time_ms("0:00:01.500"), 1_500);
        assert_eq!(parse_time_ms("0:00:01.5"), 1_500);
        assert_eq!(parse_time_ms("NOT_IMPLEMENTED"), 0);
        assert_eq!(parse_time_ms(""), 0);
    }

    #[test]
    fn format_seek_target_rounds() {
        assert_eq!(format_time_hms(65_400), "0:01:05");
        assert_eq!(format_time_hms(65_600), "0:01:06");
        assert_eq!(format_time_hms(3_600_000), "1:00:00");
    }

    #[test]
    fn format_didl_duration_is_padded() {
        assert_eq!(format_duration_didl(212_123), "0:03:32.123");
        assert_eq!(format_duration_didl(3_601_001), "1:00:01.001");
    }

    #[test]
    fn seek_then_report_round_trip_within_a_second() {
        // Renderers only track whole seconds: ms -> H:MM:SS -> ms must stay
        // within +/- 1000 ms of the requested position.
        for t in [0u32, 999, 1_000, 65_432, 3_599_499] {
            let reported = parse_time_ms(&format_time_hms(t));
            let delta = reported.abs_diff(t);
            assert!(delta <= 1000, "t={} reported={}", t, reported);
        }
    }

    #[test]
    fn mac_round_trip() {
        let mac = [0x00, 0x04, 0x20, 0xab, 0xcd, 0xef];
        assert_eq!(format_mac(&mac, ':'), "00:04:20:ab:cd:ef");
        assert_eq!(parse_mac("00:04:20:ab:cd:ef"), Some(mac));
        assert_eq!(parse_mac("00:04:20"), None);
    }

    #[test]
    fn mac_from_udn_is_stable_and_local() {
        let a = mac_from_udn("uuid:12345678-aaaa-bbbb-cccc-000000000001");
        let b = mac_from_udn("uuid:12345678-aaaa-bbbb-cccc-000000000001");
        let c = mac_from_udn("uuid:12345678-aaaa-bbbb-cccc-000000000002");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // locally administered bit set, multicast bit clear
        assert_eq!(a[0] & 0x03, 0x02);
    }
}

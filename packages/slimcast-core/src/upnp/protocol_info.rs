//! Sink-capability parsing and content-type negotiation.
//!
//! Renderers advertise what they accept as a comma-separated list of
//! protocolInfo entries (`scheme:network:mime:options`). For every track
//! LMS announces, this module picks the entry to stream under, derives the
//! Content-Type the origin will serve, and appends the DLNA options the
//! renderer expects on the `res` element.

use crate::config::{DeviceConfig, L24Format};
use crate::protocol_constants::MAX_PROTO;
use crate::stream::{Endianness, StreamFormat};

/// Result of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Content-Type the origin serves (may carry `;channels=..;rate=..`).
    pub content_type: String,
    /// Full protocolInfo for the DIDL `res` element, DLNA options included.
    pub protocol_info: String,
    /// File-extension hint selecting the header-injection path
    /// (`flac`, `wav`, `pcm`, `aif`, `mp3`, ...).
    pub ext: &'static str,
}

/// The negotiation inputs taken from the device config.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub raw_audio_format: String,
    pub l24_format: L24Format,
    pub match_endianness: bool,
    pub byte_seek: bool,
}

impl From<&DeviceConfig> for MatchOptions {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            raw_audio_format: config.raw_audio_format.clone(),
            l24_format: config.l24_format,
            match_endianness: config.match_endianness,
            byte_seek: config.byte_seek,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a `GetProtocolInfo` Sink value into the retained capability set.
///
/// Keeps only `http-get` audio entries, strips the trailing `*` (DLNA
/// options will be appended at negotiation time), caps the set at
/// [`MAX_PROTO`]. When `allow_flac` is set and the renderer did not
/// advertise FLAC, a synthetic entry is appended.
#[must_use]
pub fn parse_capabilities(sink: &str, allow_flac: bool) -> Vec<String> {
    let mut caps: Vec<String> = Vec::new();
    let mut has_flac = false;

    for entry in sink.split(',') {
        if caps.len() >= MAX_PROTO {
            break;
        }
        let entry = entry.trim();
        if !entry.contains("http-get") || !entry.contains("audio") {
            continue;
        }
        if entry.contains("flac") {
            has_flac = true;
        }
        let entry = entry.strip_suffix('*').unwrap_or(entry);
        caps.push(entry.to_string());
    }

    if allow_flac && !has_flac && caps.len() < MAX_PROTO {
        caps.push("http-get:*:audio/flac:".to_string());
    }

    caps
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec filtering
// ─────────────────────────────────────────────────────────────────────────────

/// Restricts the LMS codec list to what the renderer can actually sink.
///
/// Run once at bring-up after the capability set arrives, so LMS never
/// streams a codec the renderer would refuse.
#[must_use]
pub fn check_codecs(codecs: &str, caps: &[String]) -> String {
    let lookups = |codec: &str| -> &'static [&'static str] {
        match codec {
            "mp3" => &["mp3", "mpeg"],
            "flc" => &["flac"],
            "wma" => &["wma"],
            "ogg" => &["ogg"],
            "aac" => &["aac", "m4a", "mp4"],
            "alc" => &["m4a"],
            "pcm" => &["wav", "audio/L"],
            "aif" => &["aif", "wav", "audio/L"],
            _ => &[],
        }
    };

    let mut kept: Vec<&str> = Vec::new();
    for codec in codecs.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let supported = lookups(codec)
            .iter()
            .any(|lookup| caps.iter().any(|cap| cap.contains(lookup)));
        if supported && !kept.contains(&codec) {
            kept.push(codec);
        }
    }
    kept.join(",")
}

// ─────────────────────────────────────────────────────────────────────────────
// Content-type matching
// ─────────────────────────────────────────────────────────────────────────────

/// One non-PCM match attempt over the capability set.
///
/// Candidates are tried in preference order; the first capability entry
/// containing one wins.
fn match_plain<'a>(caps: &'a [String], candidates: &[&'static str]) -> Option<(&'a str, &'static str)> {
    for mime in candidates {
        for cap in caps {
            if cap.contains(mime) {
                return Some((cap.as_str(), mime));
            }
        }
    }
    None
}

/// PCM (`audio/L<bits>`) matching.
///
/// Priority: exact `rate`+`channels` entry, then a generic template entry
/// (no rate/channels constraints) with ours injected.
fn match_lpcm(
    caps: &[String],
    bits: u8,
    channels: u8,
    rate: u32,
) -> Option<(String, String)> {
    let mime = format!("audio/L{}", bits);
    let want_channels = format!("channels={}", channels);
    let want_rate = format!("rate={}", rate);
    let content_type = format!("{};channels={};rate={}", mime, channels, rate);

    // exact match first
    for cap in caps {
        if cap.contains(&mime) && cap.contains(&want_channels) && cap.contains(&want_rate) {
            return Some((content_type, cap.clone()));
        }
    }

    // then a rate/channels-agnostic template
    for cap in caps {
        if !cap.contains(&mime) || cap.contains("channels") || cap.contains("rate") {
            continue;
        }
        let start = cap.find(&mime).unwrap_or(0);
        let mut proto = String::with_capacity(cap.len() + content_type.len());
        proto.push_str(&cap[..start]);
        proto.push_str(&content_type);
        proto.push_str(&cap[start + mime.len()..]);
        return Some((content_type, proto));
    }

    None
}

/// Raw-audio negotiation over the user's container preference order.
fn match_raw_audio(
    caps: &[String],
    fmt: &StreamFormat,
    opts: &MatchOptions,
    match_endianness: bool,
) -> Option<(String, String, &'static str)> {
    for pref in opts.raw_audio_format.split(',').map(str::trim) {
        let (hit, expected_order) = if pref.contains("pcm") || pref.contains("raw") {
            let bits = if opts.l24_format == L24Format::Trunc16 && fmt.sample_size == 24 {
                16
            } else {
                fmt.sample_size
            };
            let mut hit = match_lpcm(caps, bits, fmt.channels, fmt.sample_rate)
                .map(|(ct, proto)| (ct, proto, "pcm"));
            if hit.is_none()
                && opts.l24_format == L24Format::Trunc16Pcm
                && fmt.sample_size == 24
            {
                hit = match_lpcm(caps, 16, fmt.channels, fmt.sample_rate)
                    .map(|(ct, proto)| (ct, proto, "pcm"));
            }
            // LPCM over HTTP is network (big-endian) byte order
            (hit, Endianness::Big)
        } else if pref.contains("wav") {
            let hit = match_plain(caps, &["audio/wav", "audio/x-wav", "audio/wave"])
                .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "wav"));
            (hit, Endianness::Little)
        } else if pref.contains("aif") {
            let hit = match_plain(caps, &["audio/aiff", "audio/x-aiff"])
                .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "aif"));
            (hit, Endianness::Big)
        } else {
            (None, Endianness::Little)
        };

        if let Some(found) = hit {
            if match_endianness && expected_order != fmt.endianness {
                continue;
            }
            return Some(found);
        }
    }

    if match_endianness {
        // nothing matched the source byte order; retry without the constraint
        return match_raw_audio(caps, fmt, opts, false);
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// DLNA options
// ─────────────────────────────────────────────────────────────────────────────

const FLAG_SN_INCREASE: u32 = 1 << 26;
const FLAG_STREAMING_TRANSFER: u32 = 1 << 24;
const FLAG_BACKGROUND_TRANSFER: u32 = 1 << 22;
const FLAG_CONNECTION_STALL: u32 = 1 << 21;
const FLAG_DLNA_V15: u32 = 1 << 20;

/// Appends the DLNA options to a bare protocolInfo entry.
///
/// `DLNA.ORG_CI=0` always; `DLNA.ORG_OP=01` when byte-range seek is
/// enabled; flags carry streaming-transfer + background-transfer +
/// connection-stall + DLNA-1.5, plus sN-increasing for live streams.
#[must_use]
pub fn append_dlna_options(proto_info: &str, byte_seek: bool, live: bool) -> String {
    let mut flags =
        FLAG_STREAMING_TRANSFER | FLAG_BACKGROUND_TRANSFER | FLAG_CONNECTION_STALL | FLAG_DLNA_V15;
    if live {
        flags |= FLAG_SN_INCREASE;
    }

    let op = if byte_seek { ";DLNA.ORG_OP=01;DLNA.ORG_CI=0" } else { ";DLNA.ORG_CI=0" };
    let options = format!("{};DLNA.ORG_FLAGS={:08x}000000000000000000000000", op, flags);

    if proto_info.ends_with(':') {
        // the options field is empty, drop the leading separator
        format!("{}{}", proto_info, &options[1..])
    } else {
        format!("{}{}", proto_info, options)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Negotiates the served format for a source stream.
///
/// Returns `None` when no advertised sink accepts the codec — the caller
/// fails the `SETFORMAT` operation and LMS will not stream the track.
#[must_use]
pub fn negotiate(
    caps: &[String],
    fmt: &StreamFormat,
    opts: &MatchOptions,
) -> Option<NegotiatedFormat> {
    let (content_type, proto, ext): (String, String, &'static str) = match fmt.codec {
        b'm' => match_plain(caps, &["audio/mp3", "audio/mpeg", "audio/mpeg3"])
            .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "mp3"))?,
        b'f' => match_plain(caps, &["audio/x-flac", "audio/flac"])
            .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "flac"))?,
        b'w' => match_plain(caps, &["audio/x-wma", "audio/wma"])
            .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "wma"))?,
        b'o' => match_plain(caps, &["audio/ogg"])
            .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "ogg"))?,
        // alac inside mp4 is indistinguishable from aac to most renderers;
        // serve it as audio/aac
        b'a' => match_plain(caps, &["audio/x-aac", "audio/aac", "audio/m4a", "audio/mp4"])
            .map(|(cap, _)| ("audio/aac".to_string(), cap.to_string(), "m4a"))?,
        b'l' => match_plain(caps, &["audio/m4a"])
            .map(|(cap, mime)| (mime.to_string(), cap.to_string(), "m4a"))?,
        b'p' => match_raw_audio(caps, fmt, opts, opts.match_endianness)?,
        _ => return None,
    };

    // wave/aiff sinks want matching extensions regardless of which
    // preference selected them
    let ext = if proto.contains("wav") && ext != "pcm" {
        "wav"
    } else if proto.contains("aiff") && ext != "pcm" {
        "aif"
    } else {
        ext
    };

    Some(NegotiatedFormat {
        content_type,
        protocol_info: append_dlna_options(&proto, opts.byte_seek, fmt.duration_ms == 0),
        ext,
    })
}

/// The failure value served for an unmatched slot, so a renderer probing a
/// stale URL still gets a syntactically valid response.
pub const UNKNOWN_CONTENT_TYPE: &str = "audio/unknown";

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> MatchOptions {
        MatchOptions {
            raw_audio_format: "raw,wav,aif".into(),
            l24_format: L24Format::PackedLpcm,
            match_endianness: false,
            byte_seek: false,
        }
    }

    fn pcm_fmt(bits: u8, endianness: Endianness) -> StreamFormat {
        StreamFormat {
            codec: b'p',
            channels: 2,
            sample_rate: 44_100,
            sample_size: bits,
            endianness,
            duration_ms: 180_000,
        }
    }

    #[test]
    fn capability_parse_keeps_http_get_audio_and_strips_star() {
        let sink = "http-get:*:audio/mpeg:*,http-get:*:video/mp4:*,\
                    rtsp-rtp-udp:*:audio/mpeg:*,http-get:*:audio/flac:DLNA.ORG_PN=FLAC";
        let caps = parse_capabilities(sink, false);
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0], "http-get:*:audio/mpeg:");
        assert_eq!(caps[1], "http-get:*:audio/flac:DLNA.ORG_PN=FLAC");
    }

    #[test]
    fn allow_flac_appends_synthetic_entry() {
        let caps = parse_capabilities("http-get:*:audio/mpeg:*", true);
        assert!(caps.iter().any(|c| c == "http-get:*:audio/flac:"));
        // not duplicated when already advertised
        let caps = parse_capabilities("http-get:*:audio/flac:*", true);
        assert_eq!(caps.iter().filter(|c| c.contains("flac")).count(), 1);
    }

    #[test]
    fn happy_path_mp3_preference_order() {
        // a renderer advertising only audio/mpeg still sinks codec 'm';
        // the served content-type is whichever candidate the entry
        // matched first
        let caps = parse_capabilities("http-get:*:audio/mpeg:*", false);
        let fmt = StreamFormat {
            codec: b'm',
            channels: 2,
            sample_rate: 44_100,
            sample_size: 16,
            endianness: Endianness::Little,
            duration_ms: 180_000,
        };
        let got = negotiate(&caps, &fmt, &opts()).unwrap();
        assert_eq!(got.content_type, "audio/mpeg");
        assert!(got.protocol_info.starts_with("http-get:*:audio/mpeg:"));
        assert!(got.protocol_info.contains("DLNA.ORG_CI=0"));
        assert_eq!(got.ext, "mp3");
    }

    #[test]
    fn flac_prefers_x_flac() {
        let caps = parse_capabilities(
            "http-get:*:audio/flac:*,http-get:*:audio/x-flac:*",
            false,
        );
        let fmt = StreamFormat { codec: b'f', ..pcm_fmt(16, Endianness::Little) };
        let got = negotiate(&caps, &fmt, &opts()).unwrap();
        assert_eq!(got.content_type, "audio/x-flac");
        assert_eq!(got.ext, "flac");
    }

    #[test]
    fn lpcm_exact_match_beats_template() {
        let caps = parse_capabilities(
            "http-get:*:audio/L16:*,http-get:*:audio/L16;rate=44100;channels=2:*",
            false,
        );
        let got = negotiate(&caps, &pcm_fmt(16, Endianness::Big), &opts()).unwrap();
        assert_eq!(got.content_type, "audio/L16;channels=2;rate=44100");
        assert_eq!(got.protocol_info.split(';').next().unwrap(), "http-get:*:audio/L16");
        assert!(got.protocol_info.contains("rate=44100"));
        assert_eq!(got.ext, "pcm");
    }

    #[test]
    fn lpcm_template_injects_rate_and_channels() {
        let caps = parse_capabilities("http-get:*:audio/L16:*", false);
        let got = negotiate(&caps, &pcm_fmt(16, Endianness::Big), &opts()).unwrap();
        assert_eq!(got.content_type, "audio/L16;channels=2;rate=44100");
        assert!(got
            .protocol_info
            .starts_with("http-get:*:audio/L16;channels=2;rate=44100:"));
    }

    #[test]
    fn l24_truncation_fallback() {
        let caps = parse_capabilities("http-get:*:audio/L16:*", false);
        let mut o = opts();

        // TRUNC_16: the L24 source negotiates directly as L16
        o.l24_format = L24Format::Trunc16;
        let got = negotiate(&caps, &pcm_fmt(24, Endianness::Big), &o).unwrap();
        assert!(got.content_type.starts_with("audio/L16"));

        // TRUNC_16_PCM: L24 tried first, then falls back to L16
        o.l24_format = L24Format::Trunc16Pcm;
        let got = negotiate(&caps, &pcm_fmt(24, Endianness::Big), &o).unwrap();
        assert!(got.content_type.starts_with("audio/L16"));

        // PACKED_LPCM: no L24 sink, no fallback, no match
        o.l24_format = L24Format::PackedLpcm;
        assert!(negotiate(&caps, &pcm_fmt(24, Endianness::Big), &o).is_none());
    }

    #[test]
    fn endianness_preference_reorders_then_relaxes() {
        let caps = parse_capabilities("http-get:*:audio/wav:*", false);
        let mut o = opts();
        o.match_endianness = true;

        // wav is little-endian: a big-endian source still matches after the
        // constraint is dropped on the retry pass
        let got = negotiate(&caps, &pcm_fmt(16, Endianness::Big), &o).unwrap();
        assert_eq!(got.content_type, "audio/wav");
        assert_eq!(got.ext, "wav");
    }

    #[test]
    fn endianness_match_picks_the_matching_container() {
        let caps =
            parse_capabilities("http-get:*:audio/wav:*,http-get:*:audio/aiff:*", false);
        let mut o = opts();
        o.match_endianness = true;
        o.raw_audio_format = "wav,aif".into();

        // big-endian source skips wav (little) and lands on aiff (big)
        let got = negotiate(&caps, &pcm_fmt(16, Endianness::Big), &o).unwrap();
        assert_eq!(got.content_type, "audio/aiff");
        assert_eq!(got.ext, "aif");
    }

    #[test]
    fn no_match_yields_none() {
        let caps = parse_capabilities("http-get:*:audio/mpeg:*", false);
        let fmt = StreamFormat { codec: b'f', ..pcm_fmt(16, Endianness::Little) };
        assert!(negotiate(&caps, &fmt, &opts()).is_none());
    }

    #[test]
    fn dlna_options_for_finite_and_live() {
        let finite = append_dlna_options("http-get:*:audio/mpeg:", false, false);
        assert_eq!(
            finite,
            "http-get:*:audio/mpeg:DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000"
        );

        let live = append_dlna_options("http-get:*:audio/mpeg:", false, true);
        assert!(live.contains("DLNA.ORG_FLAGS=05700000"));

        let seekable = append_dlna_options("http-get:*:audio/mpeg:", true, false);
        assert!(seekable.contains("DLNA.ORG_OP=01;DLNA.ORG_CI=0"));
    }

    #[test]
    fn dlna_options_preserve_existing_options_field() {
        let got = append_dlna_options("http-get:*:audio/flac:DLNA.ORG_PN=FLAC", false, false);
        assert!(got.starts_with("http-get:*:audio/flac:DLNA.ORG_PN=FLAC;DLNA.ORG_CI=0"));
    }

    #[test]
    fn codec_filter_keeps_only_sinkable_codecs() {
        let caps = parse_capabilities(
            "http-get:*:audio/mpeg:*,http-get:*:audio/L16:*",
            false,
        );
        assert_eq!(check_codecs("flc,pcm,mp3", &caps), "pcm,mp3");
        assert_eq!(check_codecs("flc,ogg", &caps), "");
        // aif rides on wav/LPCM sinks
        assert_eq!(check_codecs("aif", &caps), "aif");
    }
}

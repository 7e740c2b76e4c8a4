//! Typed configuration: global settings and per-device parameters.
//!
//! The persistent form is the XML document handled by [`store`]; this
//! module holds the recognized keys as real types with the documented
//! defaults. Unknown keys never reach these types — the store passes them
//! through untouched on save.

pub mod store;

pub use store::ConfigStore;

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Log levels
// ─────────────────────────────────────────────────────────────────────────────

/// Per-facility log level, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    /// Very verbose debug ("sdebug"), mapped onto `trace`.
    Sdebug,
}

impl LogLevel {
    /// Parses a config value; unknown values fall back to `warn`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "sdebug" => Self::Sdebug,
            _ => Self::Warn,
        }
    }

    /// Maps onto a `log` crate filter.
    #[must_use]
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Sdebug => log::LevelFilter::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Sdebug => "sdebug",
        };
        f.write_str(s)
    }
}

/// Log levels of every facility.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub slimproto: LogLevel,
    pub stream: LogLevel,
    pub decode: LogLevel,
    pub output: LogLevel,
    pub main: LogLevel,
    pub upnp: LogLevel,
    pub util: LogLevel,
    pub slimmain: LogLevel,
}

// ─────────────────────────────────────────────────────────────────────────────
// Global configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Global (non-device) configuration.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Local `ip[:port]` binding for the origin and discovery. `?` means
    /// auto-detect.
    pub binding: String,
    /// Extra device-type tokens to search for besides MediaRenderer.
    pub custom_discovery: Vec<String>,
    /// Per-facility log levels.
    pub log: LogConfig,
    /// Log rotation threshold (MB); -1 disables rotation.
    pub log_limit_mb: i32,
    /// Interval between discovery scans (seconds).
    pub scan_interval_secs: u32,
    /// Duration of one multicast search (seconds).
    pub scan_timeout_secs: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            binding: "?".into(),
            custom_discovery: Vec::new(),
            log: LogConfig::default(),
            log_limit_mb: -1,
            scan_interval_secs: crate::protocol_constants::SCAN_INTERVAL_SECS,
            scan_timeout_secs: crate::protocol_constants::SCAN_TIMEOUT_SECS,
        }
    }
}

impl GlobalConfig {
    /// Clamps the scan timing so searches never overlap the next scan.
    pub fn normalize_scan_timing(&mut self) {
        use crate::protocol_constants::{SCAN_INTERVAL_SECS, SCAN_PAD_SECS, SCAN_TIMEOUT_SECS};
        if self.scan_interval_secs == 0 {
            return;
        }
        if self.scan_interval_secs < SCAN_INTERVAL_SECS {
            self.scan_interval_secs = SCAN_INTERVAL_SECS;
        }
        if self.scan_timeout_secs < SCAN_TIMEOUT_SECS {
            self.scan_timeout_secs = SCAN_TIMEOUT_SECS;
        }
        if self.scan_timeout_secs > self.scan_interval_secs - SCAN_PAD_SECS {
            self.scan_timeout_secs = self.scan_interval_secs - SCAN_PAD_SECS;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-device configuration
// ─────────────────────────────────────────────────────────────────────────────

/// 24-bit PCM handling when a renderer offers no L24 sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum L24Format {
    /// Repack into the DLNA packed-LPCM byte order.
    #[default]
    PackedLpcm,
    /// Plain 3-byte packing, endianness-swapped only.
    Packed,
    /// Truncate to 16 bits and negotiate the L24 entry as L16.
    Trunc16,
    /// Truncate to 16 bits and negotiate an explicit L16 sink.
    Trunc16Pcm,
}

impl L24Format {
    #[must_use]
    pub fn from_config(v: &str) -> Self {
        match v.trim() {
            "PACKED" | "1" => Self::Packed,
            "TRUNC_16" | "2" => Self::Trunc16,
            "TRUNC_16_PCM" | "3" => Self::Trunc16Pcm,
            _ => Self::PackedLpcm,
        }
    }

    #[must_use]
    pub fn to_config(self) -> &'static str {
        match self {
            Self::PackedLpcm => "PACKED_LPCM",
            Self::Packed => "PACKED",
            Self::Trunc16 => "TRUNC_16",
            Self::Trunc16Pcm => "TRUNC_16_PCM",
        }
    }
}

/// FLAC header synthesis mode for raw FLAC bitstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlacHeaderMode {
    /// Stream frames as-is, no synthesized header.
    No,
    /// Synthesize a STREAMINFO with unknown total samples.
    #[default]
    Normal,
    /// Synthesize a STREAMINFO claiming a huge total-sample count, for
    /// renderers that refuse unknown-length FLAC.
    Full,
}

impl FlacHeaderMode {
    #[must_use]
    pub fn from_config(v: &str) -> Self {
        match v.trim() {
            "NO" | "0" => Self::No,
            "FULL" | "2" => Self::Full,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub fn to_config(self) -> &'static str {
        match self {
            Self::No => "NO",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Volume transmission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeOnPlay {
    /// Compute but never transmit volume.
    Suppress,
    /// Transmit on every LMS volume command.
    #[default]
    Always,
    /// Transmit only while playing (and re-assert on play).
    PlayOnly,
}

impl VolumeOnPlay {
    #[must_use]
    pub fn from_config(v: &str) -> Self {
        match v.trim() {
            "-1" => Self::Suppress,
            "1" => Self::PlayOnly,
            _ => Self::Always,
        }
    }

    #[must_use]
    pub fn to_config(self) -> &'static str {
        match self {
            Self::Suppress => "-1",
            Self::Always => "0",
            Self::PlayOnly => "1",
        }
    }
}

/// Per-device configuration (also the `common` defaults).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    // identity / control
    pub enabled: bool,
    /// Player name override sent to LMS; empty means use the friendly name.
    pub name: String,
    /// LMS address override; `?` means autodiscover.
    pub server: String,
    /// Cover art URL template.
    pub coverart: String,
    /// Discovery scans a device may miss before being torn down.
    pub remove_timeout: u32,

    // buffering
    pub streambuf_size: u32,
    pub output_size: u32,
    /// Sentinel Content-Length served to the renderer.
    pub stream_length: i64,
    /// Backing file size bound (bytes); -1 disables truncation.
    pub buffer_limit: i64,
    /// Directory backing files are created in; empty means the system tmp dir.
    pub buffer_dir: String,
    /// 50 ms polls the origin waits for data before declaring an underrun.
    pub max_read_wait: u32,
    /// Upper bound of one origin read; 0 means stream-threshold sized,
    /// -1 unbounded.
    pub max_get_bytes: i32,
    pub keep_buffer_file: bool,

    // codec
    /// Comma-separated codec filter advertised to LMS.
    pub codecs: String,
    pub sample_rate: u32,
    pub l24_format: L24Format,
    pub flac_header: FlacHeaderMode,
    /// Ordered raw-PCM container preferences among pcm/wav/aif.
    pub raw_audio_format: String,
    pub match_endianness: bool,
    /// Advertise a FLAC sink even when the renderer does not.
    pub allow_flac: bool,

    // transport
    pub accept_nexturi: bool,
    pub next_delay: u32,
    pub seek_after_pause: bool,
    pub byte_seek: bool,
    pub live_pause: bool,
    pub send_icy: bool,
    pub send_metadata: bool,
    pub send_coverart: bool,

    // volume
    pub volume_on_play: VolumeOnPlay,
    pub volume_feedback: bool,
    /// Device volume scale (DesiredVolume ceiling).
    pub max_volume: u32,
    /// Keep the renderer volume unchanged across pause.
    pub pause_volume: bool,

    // misc
    pub auto_play: bool,
    pub forced_mimetypes: String,
    pub roon_mode: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: String::new(),
            server: "?".into(),
            coverart: String::new(),
            remove_timeout: 3,

            streambuf_size: 200 * 1024 * 12,
            output_size: 200 * 1024 * 12,
            stream_length: 1_000_000_000,
            buffer_limit: -1,
            buffer_dir: String::new(),
            max_read_wait: 20,
            max_get_bytes: 0,
            keep_buffer_file: false,

            codecs: "flc,pcm,mp3".into(),
            sample_rate: 48_000,
            l24_format: L24Format::PackedLpcm,
            flac_header: FlacHeaderMode::Normal,
            raw_audio_format: "raw,wav,aif".into(),
            match_endianness: false,
            allow_flac: false,

            accept_nexturi: false,
            next_delay: 0,
            seek_after_pause: false,
            byte_seek: false,
            live_pause: true,
            send_icy: false,
            send_metadata: true,
            send_coverart: true,

            volume_on_play: VolumeOnPlay::Always,
            volume_feedback: true,
            max_volume: 100,
            pause_volume: false,

            auto_play: false,
            forced_mimetypes: String::new(),
            roon_mode: false,
        }
    }
}

/// Parses a config boolean ("1"/"0", with textual forms tolerated).
#[must_use]
pub fn parse_bool(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_round_trip() {
        for s in ["error", "warn", "info", "debug", "sdebug"] {
            assert_eq!(LogLevel::parse(s).to_string(), s);
        }
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Warn);
        assert_eq!(LogLevel::Sdebug.to_filter(), log::LevelFilter::Trace);
    }

    #[test]
    fn scan_timing_is_clamped() {
        let mut cfg = GlobalConfig {
            scan_interval_secs: 20,
            scan_timeout_secs: 40,
            ..Default::default()
        };
        cfg.normalize_scan_timing();
        assert_eq!(cfg.scan_interval_secs, 30);
        assert_eq!(cfg.scan_timeout_secs, 15);
    }

    #[test]
    fn zero_interval_disables_rescans_untouched() {
        let mut cfg = GlobalConfig { scan_interval_secs: 0, ..Default::default() };
        cfg.normalize_scan_timing();
        assert_eq!(cfg.scan_interval_secs, 0);
    }

    #[test]
    fn enum_config_round_trips() {
        for v in [L24Format::PackedLpcm, L24Format::Packed, L24Format::Trunc16, L24Format::Trunc16Pcm] {
            assert_eq!(L24Format::from_config(v.to_config()), v);
        }
        for v in [FlacHeaderMode::No, FlacHeaderMode::Normal, FlacHeaderMode::Full] {
            assert_eq!(FlacHeaderMode::from_config(v.to_config()), v);
        }
        for v in [VolumeOnPlay::Suppress, VolumeOnPlay::Always, VolumeOnPlay::PlayOnly] {
            assert_eq!(VolumeOnPlay::from_config(v.to_config()), v);
        }
    }
}

//! Audio stream types and the virtual output buffers served by the origin.
//!
//! - [`StreamFormat`] describes what LMS is about to stream (codec letter,
//!   rate, channels, sample size, endianness, duration).
//! - [`slot`] holds the file-backed per-track buffers the renderer pulls.
//! - [`wav`], [`flac`], [`pcm`] implement container-header injection and
//!   raw-PCM byte manipulation for sources that arrive headerless.

pub mod flac;
pub mod pcm;
pub mod slot;
pub mod wav;

pub use slot::{SlotPool, SlotReader, SlotWriter, StreamSlot};

/// Byte order of raw PCM samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Source stream description, as announced by LMS ahead of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// LMS codec letter: `m` mp3, `f` flac, `w` wma, `o` ogg, `a` aac,
    /// `l` alac, `p` raw PCM.
    pub codec: u8,
    pub channels: u8,
    pub sample_rate: u32,
    /// Bits per sample (PCM sources).
    pub sample_size: u8,
    /// Byte order of the source (PCM sources).
    pub endianness: Endianness,
    /// Track duration in ms; 0 marks a live stream.
    pub duration_ms: u32,
}

impl StreamFormat {
    /// File extension hint for the codec letter.
    #[must_use]
    pub fn default_ext(&self) -> &'static str {
        match self.codec {
            b'p' => "pcm",
            b'm' => "mp3",
            b'f' => "flac",
            b'w' => "wma",
            b'o' => "ogg",
            b'a' | b'l' => "m4a",
            _ => "xxx",
        }
    }
}

/// Track metadata snapshot carried into DIDL and the config store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    /// Cover art URL; dropped when `send_coverart` is off.
    pub artwork: Option<String>,
    /// Track number within the album.
    pub track: u32,
    /// Duration in ms; 0 for live streams.
    pub duration_ms: u32,
}

/// Maps a media path/extension back to a codec letter, used to tag the
/// source format of a cached next track.
#[must_use]
pub fn ext_to_codec(path: &str) -> u8 {
    let p = path.to_ascii_lowercase();
    if p.contains("flac") || p.contains("flc") {
        b'f'
    } else if p.contains("mp3") {
        b'm'
    } else if p.contains("wav") {
        b'w'
    } else if p.contains("wma") {
        b'a'
    } else if p.contains("ogg") {
        b'o'
    } else if p.contains("m4a") || p.contains("mp4") {
        b'4'
    } else if p.contains("aif") {
        b'i'
    } else {
        b' '
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_letter_extensions() {
        let fmt = StreamFormat {
            codec: b'f',
            channels: 2,
            sample_rate: 44_100,
            sample_size: 16,
            endianness: Endianness::Little,
            duration_ms: 0,
        };
        assert_eq!(fmt.default_ext(), "flac");
        assert_eq!(StreamFormat { codec: b'q', ..fmt }.default_ext(), "xxx");
    }

    #[test]
    fn path_to_codec_letter() {
        assert_eq!(ext_to_codec("/music/track.flac"), b'f');
        assert_eq!(ext_to_codec("/music/track.MP3"), b'm');
        assert_eq!(ext_to_codec("/music/unknown.bin"), b' ');
    }
}

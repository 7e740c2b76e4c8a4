//! Virtual output buffers ("slots") served by the HTTP origin.
//!
//! Each player owns two slots (current and next track), addressed by a
//! synthesized name `<mac>-idx-<0|1>`. The LMS-facing side writes the raw
//! track bitstream into a slot; the renderer pulls it back out through the
//! origin. Header injection happens on the write side so ranged re-reads
//! see a stable byte sequence:
//!
//! - `flac` streams that do not begin with `fLaC` get a synthesized
//!   magic + STREAMINFO + Vorbis comment prefix,
//! - `wav` streams get a RIFF header with sentinel sizes,
//! - `pcm` (LPCM) streams get endianness/packed-L24 treatment.
//!
//! The backing file is bounded by `buffer_limit`: when exceeded (and the
//! reader has moved past it), the first quarter is dropped and cursors
//! rewritten.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{DeviceConfig, FlacHeaderMode, L24Format};
use crate::stream::flac::{self, FLAC_RECV_MIN};
use crate::stream::pcm::prepare_lpcm;
use crate::stream::wav::build_wav_header;
use crate::stream::{Endianness, StreamFormat};
use crate::upnp::protocol_info::{NegotiatedFormat, UNKNOWN_CONTENT_TYPE};
use crate::utils::format_mac;

/// Copy chunk used when the backing file is front-truncated.
const TRUNCATE_COPY_CHUNK: usize = 2 * 1024 * 1024;

/// Events the read side raises towards the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    /// Writer closed and the reader drained everything: end of track.
    EndOfTrack { device: usize, slot: String },
    /// The reader waited out `max_read_wait` with no data: underrun.
    Underrun { device: usize, slot: String },
}

/// Per-track format parameters, set when LMS announces the track.
#[derive(Debug, Clone)]
struct SlotParams {
    content_type: String,
    /// Header-injection path selector ("flac", "wav", "pcm", or pass-through).
    ext: String,
    channels: u8,
    sample_rate: u32,
    sample_size: u8,
    endianness: Endianness,
    flac_header: FlacHeaderMode,
    l24_format: L24Format,
}

impl Default for SlotParams {
    fn default() -> Self {
        Self {
            content_type: UNKNOWN_CONTENT_TYPE.into(),
            ext: String::new(),
            channels: 2,
            sample_rate: 44_100,
            sample_size: 16,
            endianness: Endianness::Little,
            flac_header: FlacHeaderMode::Normal,
            l24_format: L24Format::PackedLpcm,
        }
    }
}

#[derive(Default)]
struct SlotInner {
    params: SlotParams,
    file: Option<File>,
    writer_open: bool,
    reader_open: bool,
    header_done: bool,
    /// Bytes awaiting header probe or a full PCM sample group.
    pending: Vec<u8>,
    /// Logical end of the backing file.
    write_count: u64,
    /// Total bytes produced for the track (monotonic, survives truncation).
    write_count_total: u64,
    /// Reader position within the backing file.
    read_pos: u64,
    /// Bytes read in the current open.
    read_count: u64,
    /// Cumulative bytes read for the track.
    read_count_total: u64,
}

impl SlotInner {
    /// Bytes dropped from the front of the backing file so far.
    fn discarded(&self) -> u64 {
        self.write_count_total - self.write_count
    }
}

/// One virtual output buffer.
pub struct StreamSlot {
    /// Slot name, `<mac>-idx-<n>`.
    pub name: String,
    /// Owning device slot in the registry arena (index only, no back
    /// reference).
    pub device: usize,
    path: PathBuf,
    /// Sentinel Content-Length served to the renderer.
    pub stream_length: i64,
    /// 50 ms poll budget for reads.
    pub max_read_wait: u32,
    /// Read size cap; 0/-1 semantics per config.
    pub max_get_bytes: i32,
    /// Backing size bound; -1 disables truncation.
    pub buffer_limit: i64,
    keep_buffer_file: bool,
    byte_seek: bool,
    inner: Mutex<SlotInner>,
    events: mpsc::UnboundedSender<SlotEvent>,
}

impl StreamSlot {
    /// Whether range requests are honored for this slot.
    #[must_use]
    pub fn byte_seek(&self) -> bool {
        self.byte_seek
    }

    /// Current Content-Type (negotiated, or `audio/unknown` before that).
    #[must_use]
    pub fn content_type(&self) -> String {
        self.inner.lock().params.content_type.clone()
    }

    /// Arms the slot for a new track: resets the backing file, counters
    /// and header state, and records the negotiated format.
    pub fn configure(
        &self,
        format: &StreamFormat,
        negotiated: &NegotiatedFormat,
        config: &DeviceConfig,
    ) -> std::io::Result<()> {
        let mut inner = self.inner.lock();
        inner.params = SlotParams {
            content_type: negotiated.content_type.clone(),
            ext: negotiated.ext.to_string(),
            channels: format.channels,
            sample_rate: format.sample_rate,
            sample_size: format.sample_size,
            endianness: format.endianness,
            flac_header: config.flac_header,
            l24_format: config.l24_format,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        inner.file = Some(file);
        inner.writer_open = true;
        inner.header_done = false;
        inner.pending.clear();
        inner.write_count = 0;
        inner.write_count_total = 0;
        inner.read_pos = 0;
        inner.read_count = 0;
        inner.read_count_total = 0;
        Ok(())
    }

    /// Whether a reader currently holds the slot open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().reader_open
    }

    /// Drops the backing file (unless configured to keep it) and resets
    /// state. Called at device teardown.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        *inner = SlotInner::default();
        drop(inner);
        if !self.keep_buffer_file {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    // ── write side ──────────────────────────────────────────────────────

    fn write_locked(inner: &mut SlotInner, data: &[u8]) -> std::io::Result<()> {
        let write_count = inner.write_count;
        if let Some(file) = inner.file.as_mut() {
            file.seek(SeekFrom::Start(write_count))?;
            file.write_all(data)?;
        }
        inner.write_count += data.len() as u64;
        inner.write_count_total += data.len() as u64;
        Ok(())
    }

    fn append(&self, data: &[u8], flush: bool) -> std::io::Result<()> {
        let mut inner = self.inner.lock();
        inner.pending.extend_from_slice(data);

        if !inner.header_done {
            let ext = inner.params.ext.clone();
            match ext.as_str() {
                "flac" => {
                    if inner.pending.starts_with(b"fLaC") {
                        inner.header_done = true;
                    } else if inner.pending.len() >= FLAC_RECV_MIN
                        || (flush && !inner.pending.is_empty())
                    {
                        let header = flac::parse_frame_header(&inner.pending).and_then(|params| {
                            flac::build_flac_header(inner.params.flac_header, &params)
                        });
                        match header {
                            Some(header) => {
                                log::info!(
                                    "[Slot] {}: synthesized flac header ({} bytes)",
                                    self.name,
                                    header.len()
                                );
                                Self::write_locked(&mut inner, &header)?;
                            }
                            None => {
                                log::warn!(
                                    "[Slot] {}: no flac header and not a frame, streaming as-is",
                                    self.name
                                );
                            }
                        }
                        inner.header_done = true;
                    } else {
                        return Ok(()); // wait for a probe-sized prefix
                    }
                }
                "wav" => {
                    let params = inner.params.clone();
                    let header = build_wav_header(
                        params.sample_rate,
                        u16::from(params.channels),
                        u16::from(params.sample_size),
                        self.stream_length.max(0) as u32,
                    );
                    log::info!("[Slot] {}: wav header", self.name);
                    Self::write_locked(&mut inner, &header)?;
                    inner.header_done = true;
                }
                _ => inner.header_done = true,
            }
        }

        if inner.params.ext == "pcm" {
            let (sample_size, l24, endianness) = {
                let p = &inner.params;
                (p.sample_size, p.l24_format, p.endianness)
            };
            let mut pending = std::mem::take(&mut inner.pending);
            let ready = prepare_lpcm(&mut pending, sample_size, l24, endianness);
            let ready = if flush { pending.len() } else { ready };
            Self::write_locked(&mut inner, &pending[..ready])?;
            inner.pending = pending.split_off(ready);
        } else {
            let pending = std::mem::take(&mut inner.pending);
            Self::write_locked(&mut inner, &pending)?;
        }

        self.maybe_truncate(&mut inner)?;
        Ok(())
    }

    /// Bounds the backing file: once past `buffer_limit`, and once the
    /// reader has consumed the first quarter, that quarter is dropped and
    /// all cursors rewritten.
    fn maybe_truncate(&self, inner: &mut SlotInner) -> std::io::Result<()> {
        if self.buffer_limit < 0 {
            return Ok(());
        }
        let limit = self.buffer_limit as u64;
        let drop_len = limit / 4;
        if inner.write_count <= limit || drop_len == 0 || inner.read_pos < drop_len {
            return Ok(());
        }

        let write_count = inner.write_count;
        if let Some(file) = inner.file.as_mut() {
            let mut buf = vec![0u8; TRUNCATE_COPY_CHUNK];
            let mut src = drop_len;
            let mut dst = 0u64;
            while src < write_count {
                let n = ((write_count - src) as usize).min(buf.len());
                file.seek(SeekFrom::Start(src))?;
                file.read_exact(&mut buf[..n])?;
                file.seek(SeekFrom::Start(dst))?;
                file.write_all(&buf[..n])?;
                src += n as u64;
                dst += n as u64;
            }
            file.set_len(write_count - drop_len)?;
        }
        inner.write_count -= drop_len;
        inner.read_pos = inner.read_pos.saturating_sub(drop_len);
        log::info!(
            "[Slot] {}: truncated {} bytes (kept {})",
            self.name,
            drop_len,
            inner.write_count
        );
        Ok(())
    }

    fn close_writer(&self) {
        let mut inner = self.inner.lock();
        // flush a trailing partial sample group as-is
        if !inner.pending.is_empty() {
            let pending = std::mem::take(&mut inner.pending);
            let _ = Self::write_locked(&mut inner, &pending);
        }
        inner.writer_open = false;
        if let Some(file) = inner.file.as_mut() {
            let _ = file.flush();
        }
        log::info!(
            "[Slot] {}: writer closed, wrote {} bytes",
            self.name,
            inner.write_count_total
        );
    }

    // ── read side ───────────────────────────────────────────────────────

    /// Reads up to `max` bytes at the current position.
    ///
    /// Returns `(bytes, writer_still_open)`; an empty chunk with the
    /// writer closed means the track is drained.
    fn read_chunk(&self, max: usize) -> std::io::Result<(Vec<u8>, bool)> {
        let mut inner = self.inner.lock();
        let available = inner.write_count.saturating_sub(inner.read_pos) as usize;
        let n = available.min(max);
        let mut buf = vec![0u8; n];
        if n > 0 {
            let read_pos = inner.read_pos;
            if let Some(file) = inner.file.as_mut() {
                file.seek(SeekFrom::Start(read_pos))?;
                file.read_exact(&mut buf)?;
            } else {
                buf.clear();
            }
            inner.read_pos += buf.len() as u64;
            inner.read_count += buf.len() as u64;
            inner.read_count_total += buf.len() as u64;
        }
        Ok((buf, inner.writer_open))
    }

    /// Repositions the reader to a track-relative offset.
    ///
    /// The renderer addresses the track as it was served; bytes already
    /// discarded by front-truncation cannot be reached again, so a seek
    /// into the dropped region rewinds to the earliest retained byte.
    fn seek_to(&self, track_offset: u64) -> u64 {
        let mut inner = self.inner.lock();
        let discarded = inner.discarded();
        let file_pos = track_offset.saturating_sub(discarded).min(inner.write_count);
        let delta = file_pos as i64 - inner.read_pos as i64;
        inner.read_pos = file_pos;
        inner.read_count = (inner.read_count as i64 + delta).max(0) as u64;
        inner.read_count_total = (inner.read_count_total as i64 + delta).max(0) as u64;
        file_pos + discarded
    }

    fn close_reader(&self) {
        let mut inner = self.inner.lock();
        inner.reader_open = false;
        // range re-opens re-read the same bytes; keep the cumulative count
        // net of this session
        inner.read_count_total = inner.read_count_total.saturating_sub(inner.read_count);
        inner.read_count = 0;
        log::debug!("[Slot] {} closed", self.name);
    }

    fn emit(&self, event: SlotEvent) {
        let _ = self.events.send(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer / reader handles
// ─────────────────────────────────────────────────────────────────────────────

/// Write handle for the LMS-facing feeder. Closing (or dropping) marks the
/// end of the source stream.
pub struct SlotWriter {
    slot: Arc<StreamSlot>,
}

impl SlotWriter {
    /// Binds a writer to a slot.
    #[must_use]
    pub fn new(slot: Arc<StreamSlot>) -> Self {
        Self { slot }
    }

    /// Appends source bytes, applying header injection and PCM transforms.
    pub fn write(&self, data: &[u8]) -> std::io::Result<()> {
        self.slot.append(data, false)
    }

    /// Flushes any held-back probe bytes and closes the write side.
    pub fn close(self) {
        self.slot.append(&[], true).ok();
        self.slot.close_writer();
    }
}

/// Read handle held by one origin connection. Dropping releases the
/// single-opener lock.
pub struct SlotReader {
    slot: Arc<StreamSlot>,
}

impl SlotReader {
    /// Opens the read side of a slot. Refuses a second concurrent opener.
    pub fn open(slot: &Arc<StreamSlot>) -> Result<Self, crate::error::BridgeError> {
        {
            let mut inner = slot.inner.lock();
            if inner.reader_open {
                return Err(crate::error::BridgeError::StreamBusy(slot.name.clone()));
            }
            inner.reader_open = true;
            inner.read_pos = 0;
            inner.read_count = 0;
        }
        log::debug!("[Slot] {} opened", slot.name);
        Ok(Self { slot: Arc::clone(slot) })
    }

    /// Reads one chunk, honoring the `max_get_bytes` cap.
    pub fn read_chunk(&self, requested: usize) -> std::io::Result<(Vec<u8>, bool)> {
        let capped = match self.slot.max_get_bytes {
            -1 => requested,
            0 => requested,
            cap => requested.min(cap as usize),
        };
        self.slot.read_chunk(capped)
    }

    /// Repositions to a track-relative byte offset; returns the effective
    /// position.
    pub fn seek(&self, track_offset: u64) -> u64 {
        self.slot.seek_to(track_offset)
    }

    /// Raises the end-of-track event towards the bridge.
    pub fn notify_end_of_track(&self) {
        self.slot.emit(SlotEvent::EndOfTrack {
            device: self.slot.device,
            slot: self.slot.name.clone(),
        });
    }

    /// Raises the underrun event towards the bridge.
    pub fn notify_underrun(&self) {
        self.slot.emit(SlotEvent::Underrun {
            device: self.slot.device,
            slot: self.slot.name.clone(),
        });
    }
}

impl Drop for SlotReader {
    fn drop(&mut self) {
        self.slot.close_reader();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

/// All live slots, keyed by name. One instance per process, owned by the
/// supervisor and shared with the origin.
pub struct SlotPool {
    slots: DashMap<String, Arc<StreamSlot>>,
    buffer_dir: PathBuf,
    events: mpsc::UnboundedSender<SlotEvent>,
}

impl SlotPool {
    /// Creates the pool. `buffer_dir` empty means the system tmp dir.
    #[must_use]
    pub fn new(buffer_dir: &str, events: mpsc::UnboundedSender<SlotEvent>) -> Self {
        let buffer_dir = if buffer_dir.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(buffer_dir)
        };
        Self { slots: DashMap::new(), buffer_dir, events }
    }

    /// Creates the two slots of a player. Existing backing files from a
    /// previous run are removed.
    pub fn create_pair(
        &self,
        device: usize,
        mac: &[u8; 6],
        config: &DeviceConfig,
    ) -> [Arc<StreamSlot>; 2] {
        let make = |idx: usize| {
            let name = format!("{}-idx-{}", format_mac(mac, '-'), idx);
            let path = self.buffer_dir.join(&name);
            let _ = std::fs::remove_file(&path);
            let slot = Arc::new(StreamSlot {
                name: name.clone(),
                device,
                path,
                stream_length: config.stream_length,
                max_read_wait: config.max_read_wait,
                max_get_bytes: config.max_get_bytes,
                buffer_limit: config.buffer_limit,
                keep_buffer_file: config.keep_buffer_file,
                byte_seek: config.byte_seek,
                inner: Mutex::new(SlotInner::default()),
                events: self.events.clone(),
            });
            self.slots.insert(name, Arc::clone(&slot));
            slot
        };
        [make(0), make(1)]
    }

    /// Looks a slot up by name (the origin path segment).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<StreamSlot>> {
        self.slots.get(name).map(|s| Arc::clone(&s))
    }

    /// Removes and destroys both slots of a player.
    pub fn remove_pair(&self, mac: &[u8; 6]) {
        let prefix = format_mac(mac, '-');
        let names: Vec<String> = self
            .slots
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();
        for name in names {
            if let Some((_, slot)) = self.slots.remove(&name) {
                slot.destroy();
            }
        }
    }
}

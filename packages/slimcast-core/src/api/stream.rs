//! The virtual-directory stream handler.
//!
//! Serves `GET`/`HEAD /LMS2UPNP/{slot}`. The body is pulled straight out
//! of the slot's backing store: each poll reads up to the configured
//! chunk bound, waiting out dry spells in 50 ms steps. The write side
//! closing with the store drained ends the track; waiting past
//! `max_read_wait` polls is an underrun. Range requests are honored only
//! when the device is configured for byte seek — renderers probe ranges
//! anyway, and honoring them without backing support breaks resume.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::api::AppState;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::READ_POLL_MS;
use crate::stream::{SlotReader, StreamSlot};

/// Upper bound of one read towards the renderer; `max_GET_bytes` caps it
/// further per device.
const READ_CHUNK: usize = 16 * 1024;

pub(super) async fn serve_stream(
    Path(name): Path<String>,
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> BridgeResult<Response> {
    let slot = state
        .pool
        .get(&name)
        .ok_or_else(|| BridgeError::StreamNotFound(name.clone()))?;

    let content_type = slot.content_type();
    let total_len = slot.stream_length.max(0) as u64;

    // do not allow a second session on an open slot, HEAD included
    if method == Method::HEAD {
        if slot.is_open() {
            return Err(BridgeError::StreamBusy(name));
        }
        return build_response(&slot, &content_type, StatusCode::OK, None, total_len, Body::empty());
    }

    let reader = SlotReader::open(&slot)?;

    log::info!("[Origin] open {} ({})", name, content_type);

    // byte-range resume, only when the device negotiated byte seek
    let mut status = StatusCode::OK;
    let mut range_start = None;
    if slot.byte_seek() {
        if let Some(start) = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_start)
        {
            let effective = reader.seek(start);
            log::debug!("[Origin] {}: range from {} (effective {})", name, start, effective);
            range_start = Some(effective);
            status = StatusCode::PARTIAL_CONTENT;
        }
    }

    let body = Body::from_stream(read_stream(reader, slot.max_read_wait));
    build_response(&slot, &content_type, status, range_start, total_len, body)
}

fn build_response(
    slot: &Arc<StreamSlot>,
    content_type: &str,
    status: StatusCode,
    range_start: Option<u64>,
    total_len: u64,
    body: Body,
) -> BridgeResult<Response> {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        // real-time playback rather than download-first
        .header("TransferMode.dlna.org", "Streaming");

    if slot.byte_seek() {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }

    match range_start {
        Some(start) => {
            builder = builder
                .header(header::CONTENT_LENGTH, (total_len.saturating_sub(start)).to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, total_len.saturating_sub(1), total_len),
                );
        }
        None => {
            // the sentinel length keeps renderers from short-reading a
            // stream whose true size is unknown
            builder = builder.header(header::CONTENT_LENGTH, total_len.to_string());
        }
    }

    builder
        .body(body)
        .map_err(|e| BridgeError::Internal(e.to_string()))
}

/// Parses the start offset of a `bytes=start[-end]` Range header.
fn parse_range_start(value: &str) -> Option<u64> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, _end) = spec.split_once('-')?;
    start.trim().parse().ok()
}

/// The pull loop over the slot's backing store.
fn read_stream(
    reader: SlotReader,
    max_read_wait: u32,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    futures::stream::unfold((reader, 0u32, false), move |(reader, mut waited, done)| async move {
        if done {
            return None;
        }
        loop {
            match reader.read_chunk(READ_CHUNK) {
                Ok((chunk, writer_open)) => {
                    if !chunk.is_empty() {
                        return Some((Ok(Bytes::from(chunk)), (reader, 0, false)));
                    }
                    if !writer_open {
                        // drained and the write side is gone: end of track
                        reader.notify_end_of_track();
                        return None;
                    }
                    if waited >= max_read_wait {
                        reader.notify_underrun();
                        let err = std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "stream underrun",
                        );
                        return Some((Err(err), (reader, waited, true)));
                    }
                    waited += 1;
                    tokio::time::sleep(Duration::from_millis(READ_POLL_MS)).await;
                }
                Err(e) => return Some((Err(e), (reader, waited, true))),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_parsing() {
        assert_eq!(parse_range_start("bytes=0-"), Some(0));
        assert_eq!(parse_range_start("bytes=1024-2047"), Some(1024));
        assert_eq!(parse_range_start("bytes= 512-"), Some(512));
        assert_eq!(parse_range_start("items=0-"), None);
        assert_eq!(parse_range_start("bytes=abc-"), None);
    }
}

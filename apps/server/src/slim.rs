//! The slim-server integration seam.
//!
//! The actual slim-wire client (framing, decoding, stream feeding) is an
//! external component; this module provides the [`PlayerHost`] /
//! [`PlayerEvents`] implementation it plugs into. Until a device is
//! claimed by the wire client, handles are allocated locally and
//! notifications are traced.

use std::sync::atomic::{AtomicU32, Ordering};

use slimcast_core::{
    BridgeResult, DeviceConfig, PlayerEvents, PlayerHandle, PlayerHost,
};

/// Allocates player handles and receives bridge notifications on behalf
/// of the slim-wire client.
#[derive(Default)]
pub struct SlimAdapter {
    next_handle: AtomicU32,
}

impl PlayerHost for SlimAdapter {
    fn reserve(&self, name: &str, mac: [u8; 6], config: &DeviceConfig) -> BridgeResult<PlayerHandle> {
        let handle = PlayerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        log::info!(
            "[Slim] reserve player '{}' mac {:02x?} codecs '{}' server '{}' -> {:?}",
            name,
            mac,
            config.codecs,
            config.server,
            handle
        );
        Ok(handle)
    }

    fn release(&self, handle: PlayerHandle) {
        log::info!("[Slim] release player {:?}", handle);
    }
}

impl PlayerEvents for SlimAdapter {
    fn on_play(&self, handle: PlayerHandle, unsolicited: bool) {
        log::info!("[Slim] {:?} PLAY (unsolicited={})", handle, unsolicited);
    }

    fn on_pause(&self, handle: PlayerHandle, unsolicited: bool) {
        log::info!("[Slim] {:?} PAUSE (unsolicited={})", handle, unsolicited);
    }

    fn on_stop(&self, handle: PlayerHandle) {
        log::info!("[Slim] {:?} STOP", handle);
    }

    fn on_track_change(&self, handle: PlayerHandle) {
        log::info!("[Slim] {:?} TRACK_CHANGE", handle);
    }

    fn on_time(&self, handle: PlayerHandle, elapsed_ms: u32) {
        log::trace!("[Slim] {:?} TIME {} ms", handle, elapsed_ms);
    }

    fn on_volume(&self, handle: PlayerHandle, volume: u16) {
        log::info!("[Slim] {:?} VOLUME {}", handle, volume);
    }
}

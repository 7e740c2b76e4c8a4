//! The LMS-facing interface of the bridge.
//!
//! Two traits decouple the bridge from the slim-wire client:
//! [`PlayerEvents`] carries renderer-side changes back to LMS, and
//! [`PlayerHost`] reserves/releases the virtual player a renderer appears
//! as. The adapter implementing them lives outside this crate.

use crate::config::DeviceConfig;
use crate::error::BridgeResult;

/// Opaque handle of a reserved LMS virtual player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerHandle(pub u32);

/// One notification towards LMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Play { unsolicited: bool },
    Pause { unsolicited: bool },
    Stop,
    TrackChange,
    Time { ms: u32 },
    /// LMS scale, 0-100.
    Volume { volume: u16 },
}

/// Receiver of renderer-side state changes.
///
/// Implementations must tolerate being called from any task. The bridge
/// guarantees it never calls these while holding a device mutex, so an
/// implementation may re-enter the device's command surface.
pub trait PlayerEvents: Send + Sync {
    fn on_play(&self, handle: PlayerHandle, unsolicited: bool);
    fn on_pause(&self, handle: PlayerHandle, unsolicited: bool);
    fn on_stop(&self, handle: PlayerHandle);
    fn on_track_change(&self, handle: PlayerHandle);
    fn on_time(&self, handle: PlayerHandle, elapsed_ms: u32);
    fn on_volume(&self, handle: PlayerHandle, volume: u16);
}

/// Dispatches a batch of events collected under the device mutex.
pub fn dispatch_events(sink: &dyn PlayerEvents, handle: PlayerHandle, events: Vec<PlayerEvent>) {
    for event in events {
        match event {
            PlayerEvent::Play { unsolicited } => sink.on_play(handle, unsolicited),
            PlayerEvent::Pause { unsolicited } => sink.on_pause(handle, unsolicited),
            PlayerEvent::Stop => sink.on_stop(handle),
            PlayerEvent::TrackChange => sink.on_track_change(handle),
            PlayerEvent::Time { ms } => sink.on_time(handle, ms),
            PlayerEvent::Volume { volume } => sink.on_volume(handle, volume),
        }
    }
}

/// The slim-server side of player lifecycle.
pub trait PlayerHost: Send + Sync {
    /// Reserves a virtual player for a renderer. `name` is the player name
    /// (config override or the renderer's friendly name).
    fn reserve(&self, name: &str, mac: [u8; 6], config: &DeviceConfig) -> BridgeResult<PlayerHandle>;

    /// Releases a previously reserved player.
    fn release(&self, handle: PlayerHandle);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Event sink recording everything for assertions.
    #[derive(Default)]
    pub struct RecordingEvents {
        pub events: Mutex<Vec<(PlayerHandle, PlayerEvent)>>,
    }

    impl PlayerEvents for RecordingEvents {
        fn on_play(&self, handle: PlayerHandle, unsolicited: bool) {
            self.events.lock().push((handle, PlayerEvent::Play { unsolicited }));
        }
        fn on_pause(&self, handle: PlayerHandle, unsolicited: bool) {
            self.events.lock().push((handle, PlayerEvent::Pause { unsolicited }));
        }
        fn on_stop(&self, handle: PlayerHandle) {
            self.events.lock().push((handle, PlayerEvent::Stop));
        }
        fn on_track_change(&self, handle: PlayerHandle) {
            self.events.lock().push((handle, PlayerEvent::TrackChange));
        }
        fn on_time(&self, handle: PlayerHandle, elapsed_ms: u32) {
            self.events.lock().push((handle, PlayerEvent::Time { ms: elapsed_ms }));
        }
        fn on_volume(&self, handle: PlayerHandle, volume: u16) {
            self.events.lock().push((handle, PlayerEvent::Volume { volume }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingEvents;
    use super::*;

    #[test]
    fn dispatch_preserves_order_and_payloads() {
        let sink = RecordingEvents::default();
        let handle = PlayerHandle(3);
        dispatch_events(
            &sink,
            handle,
            vec![
                PlayerEvent::TrackChange,
                PlayerEvent::Time { ms: 1500 },
                PlayerEvent::Play { unsolicited: true },
            ],
        );
        let events = sink.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], (handle, PlayerEvent::TrackChange));
        assert_eq!(events[1], (handle, PlayerEvent::Time { ms: 1500 }));
        assert_eq!(events[2], (handle, PlayerEvent::Play { unsolicited: true }));
    }
}

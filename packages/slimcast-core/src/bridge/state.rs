//! Renderer-side mutable state and the transport reconciliation logic.
//!
//! Everything here is pure: methods mutate [`RendererState`] and return
//! the SOAP calls to fire and the LMS events to emit, but perform no I/O
//! and take no locks. The owning [`Renderer`](crate::bridge::device::Renderer)
//! calls them under its mutex and acts on the outcome after unlocking —
//! notifications towards LMS must never be dispatched with the device
//! mutex held.

use crate::bridge::player::PlayerEvent;
use crate::bridge::queue::{Action, ActionKind, ActionQueue, PendingCall, RpcGate};
use crate::bridge::volume::renderer_to_lms;
use crate::config::{DeviceConfig, VolumeOnPlay};
use crate::stream::{StreamFormat, TrackMetadata};
use crate::upnp::control;
use crate::upnp::didl::format_didl;
use crate::upnp::protocol_info::NegotiatedFormat;

/// Transport state as reported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Transitioning,
}

impl TransportState {
    /// Parses the AVTransport `CurrentTransportState` value. Unknown
    /// states (`NO_MEDIA_PRESENT`, `RECORDING`...) yield `None` and are
    /// ignored by the caller.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOPPED" => Some(Self::Stopped),
            "PLAYING" => Some(Self::Playing),
            "PAUSED_PLAYBACK" => Some(Self::Paused),
            "TRANSITIONING" => Some(Self::Transitioning),
            _ => None,
        }
    }
}

/// Last action requested by LMS ("intent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intent {
    #[default]
    Stop,
    Play,
    Pause,
}

/// Calls to fire and events to emit, produced under the device mutex and
/// acted upon outside it.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub fire: Vec<PendingCall>,
    pub events: Vec<PlayerEvent>,
}

impl SyncOutcome {
    pub fn merge(&mut self, other: SyncOutcome) {
        self.fire.extend(other.fire);
        self.events.extend(other.events);
    }
}

/// The mutable half of a renderer record.
#[derive(Debug, Default)]
pub struct RendererState {
    /// Power flag; when off, commands short-circuit and polls stop.
    pub on: bool,
    /// Last observed transport state.
    pub state: TransportState,
    /// Last LMS-requested action.
    pub intent: Intent,
    /// Last observed elapsed time (ms).
    pub elapsed_ms: u32,
    /// Current track URI, as sent to the renderer.
    pub current_uri: Option<String>,
    /// Cached next-track URI (empty between tracks).
    pub next_uri: Option<String>,
    /// protocolInfo cached for the next track (non-gapless fabrication).
    pub next_protocol_info: String,
    /// Metadata snapshot for the next track.
    pub next_metadata: TrackMetadata,
    /// Source format and negotiation of the upcoming track (`SETFORMAT`).
    pub pending_format: Option<(StreamFormat, NegotiatedFormat)>,
    /// Whether the current track is a live stream (duration 0).
    pub current_live: bool,
    /// Advertised sink capabilities.
    pub capabilities: Vec<String>,
    /// Set once the `GetProtocolInfo` response arrived.
    pub caps_ready: bool,
    /// Last applied renderer volume (0..=max_volume).
    pub volume: u32,
    /// Renderer volume before the last pause.
    pub previous_volume: u32,
    /// Single-flight RPC gate.
    pub gate: RpcGate,
    /// Pending player actions.
    pub actions: ActionQueue,
    /// Consecutive failed RPCs; past the threshold the bridge quiesces.
    pub error_count: u32,
    /// Discovery scans this device may still miss.
    pub missing_count: u32,
    /// Set at scan start, cleared when the device answers.
    pub stale: bool,
    /// Torn down; late completions are ignored.
    pub closing: bool,
}

impl RendererState {
    /// Reconciles a reported transport state against the LMS intent.
    pub fn sync_transport_state(
        &mut self,
        config: &DeviceConfig,
        reported: TransportState,
    ) -> SyncOutcome {
        let mut out = SyncOutcome::default();

        if reported == TransportState::Transitioning {
            if self.state != TransportState::Transitioning {
                log::info!("[Bridge] transition");
            }
            self.state = TransportState::Transitioning;
            return out;
        }

        let head = self.actions.peek().copied();

        match reported {
            TransportState::Stopped => {
                if self.state != TransportState::Stopped {
                    log::info!("[Bridge] renderer stop");
                    if let Some(next_uri) = self.next_uri.clone() {
                        if config.accept_nexturi {
                            // SetNextAVTransportURI arrived too late for the
                            // renderer to buffer; nudge it forward
                            self.actions.push(Action::unordered(ActionKind::Next));
                            log::info!("[Bridge] nudge next track required {}", next_uri);
                        } else {
                            // fabricate a SetAVTransportURI+Play pair; the
                            // Play is gated on the SetURI acknowledgement or
                            // the tail of the previous track would blurb
                            self.next_uri = None;
                            self.current_uri = Some(next_uri.clone());
                            let didl = format_didl(
                                &next_uri,
                                &self.next_protocol_info,
                                &self.next_metadata,
                                config.send_metadata,
                            );
                            let (cookie, fire) = self
                                .gate
                                .submit(control::set_av_transport_uri(&next_uri, &didl));
                            out.fire.extend(fire);
                            self.actions.push(Action::ordered(ActionKind::Play, cookie));
                            out.events.push(PlayerEvent::TrackChange);
                            log::info!("[Bridge] no gapless {}", next_uri);
                        }
                    } else {
                        // user stop, error, or natural end of the last track
                        out.events.push(PlayerEvent::Stop);
                    }
                    self.state = TransportState::Stopped;
                }
            }

            TransportState::Playing => {
                if self.state != TransportState::Playing {
                    log::info!("[Bridge] renderer playing");
                    match self.intent {
                        Intent::Pause | Intent::Play => {
                            let unsolicited = self.intent == Intent::Pause
                                && head.map_or(true, |a| a.kind != ActionKind::Pause);
                            out.events.push(PlayerEvent::Play { unsolicited });
                        }
                        Intent::Stop => {
                            // a local play after stop, or an N-1 playing
                            // behind a quick next sequence
                            log::warn!("[Bridge] unhandled playing");
                        }
                    }
                    if config.volume_on_play == VolumeOnPlay::PlayOnly {
                        let (_, fire) = self.gate.submit(control::set_volume(self.volume));
                        out.fire.extend(fire);
                    }
                    self.state = TransportState::Playing;
                }
                // a queued play would restart the track the renderer just
                // started on its own
                if head.map_or(false, |a| {
                    matches!(a.kind, ActionKind::Play | ActionKind::Unpause)
                }) {
                    self.actions.pop();
                }
            }

            TransportState::Paused => {
                if self.state != TransportState::Paused {
                    log::info!("[Bridge] renderer pause");
                    // unsolicited unless LMS asked, or a fast pause/play
                    // sequence is still settling
                    let unsolicited = self.intent != Intent::Pause
                        && head.map_or(true, |a| {
                            !matches!(a.kind, ActionKind::Play | ActionKind::Unpause)
                        });
                    out.events.push(PlayerEvent::Pause { unsolicited });
                    if head.map_or(false, |a| a.kind == ActionKind::Pause) {
                        self.actions.pop();
                    }
                    if config.volume_on_play != VolumeOnPlay::Suppress && !config.pause_volume {
                        let (_, fire) =
                            self.gate.submit(control::set_volume(self.previous_volume));
                        out.fire.extend(fire);
                    }
                    self.state = TransportState::Paused;
                }
            }

            TransportState::Transitioning => unreachable!("handled above"),
        }

        out.fire.extend(self.drain_actions());
        out
    }

    /// Dispatches the action at the queue head when its gate allows.
    pub fn drain_actions(&mut self) -> Vec<PendingCall> {
        let mut fire = Vec::new();
        let ready = self
            .actions
            .peek()
            .map_or(false, |a| a.ready(self.gate.last_ack()));
        if ready {
            let action = self.actions.pop().expect("peeked head");
            let call = match action.kind {
                ActionKind::Next => control::next(),
                ActionKind::Play | ActionKind::Unpause => control::play(),
                ActionKind::Pause => control::pause(),
            };
            let (_, pending) = self.gate.submit(call);
            fire.extend(pending);
        }
        fire
    }

    /// Handles a `TrackURI` observed in a position response: a different
    /// bridged URI while a next track is pending means the renderer rolled
    /// over gaplessly.
    pub fn observe_track_uri(&mut self, uri: &str) -> Vec<PlayerEvent> {
        let rolled = self.state == TransportState::Playing
            && self.next_uri.is_some()
            && uri.contains("-idx-")
            && self.current_uri.is_some()
            && self.current_uri.as_deref() != Some(uri);
        if !rolled {
            return Vec::new();
        }
        log::info!(
            "[Bridge] detected URI change {} -> {}",
            self.current_uri.as_deref().unwrap_or(""),
            uri
        );
        self.current_uri = Some(uri.to_string());
        self.next_uri = None;
        vec![PlayerEvent::TrackChange]
    }

    /// Handles a `RelTime` observed in a position response. Time updates
    /// are only forwarded while confirmed playing.
    pub fn observe_position(&mut self, rel_time_ms: u32) -> Vec<PlayerEvent> {
        self.elapsed_ms = rel_time_ms;
        if self.state == TransportState::Playing {
            vec![PlayerEvent::Time { ms: rel_time_ms }]
        } else {
            Vec::new()
        }
    }

    /// Handles a renderer-side volume observation (event or poll).
    pub fn observe_renderer_volume(
        &mut self,
        config: &DeviceConfig,
        volume: u32,
    ) -> Vec<PlayerEvent> {
        if volume == self.volume || !config.volume_feedback {
            return Vec::new();
        }
        log::info!("[Bridge] renderer volume local change {}", volume);
        self.volume = volume;
        vec![PlayerEvent::Volume { volume: renderer_to_lms(volume, config.max_volume) }]
    }
}

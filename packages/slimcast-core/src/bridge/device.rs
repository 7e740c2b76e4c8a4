//! The per-renderer device record: identity, RPC facade, completion
//! handling, and the LMS command surface.
//!
//! A [`Renderer`] owns one [`RendererState`] behind a mutex. Commands and
//! completions mutate state through the pure layer in `state.rs`, collect
//! the resulting SOAP calls and LMS events, then act on them after the
//! mutex is released. SOAP calls fire as spawned tasks; their completions
//! come back through [`Renderer::on_rpc_complete`], which keeps the
//! single-flight gate moving.

use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bridge::player::{dispatch_events, PlayerEvent, PlayerEvents, PlayerHandle};
use crate::bridge::queue::{Action, ActionKind, PendingCall};
use crate::bridge::state::{Intent, RendererState, SyncOutcome, TransportState};
use crate::bridge::volume::lms_to_renderer;
use crate::config::{DeviceConfig, VolumeOnPlay};
use crate::context::NetworkContext;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::MAX_ACTION_ERRORS;
use crate::stream::slot::SlotEvent;
use crate::stream::{SlotPool, StreamFormat, TrackMetadata};
use crate::upnp::control;
use crate::upnp::didl::format_didl;
use crate::upnp::gena::{parse_notify_volume, GenaClient};
use crate::upnp::protocol_info::{check_codecs, negotiate, parse_capabilities, MatchOptions};
use crate::upnp::services::{ServiceKind, ServiceSet, ALL_SERVICES};
use crate::upnp::soap::SoapCall;
use crate::utils::{extract_xml_text, parse_time_ms};

/// Immutable identity of a renderer, read from discovery and the
/// description document.
#[derive(Debug, Clone)]
pub struct RendererIdentity {
    pub udn: String,
    pub friendly_name: String,
    pub manufacturer: String,
    /// Description document location.
    pub desc_url: String,
    pub presentation_url: String,
    pub ip: IpAddr,
    /// Hardware address the virtual player identifies as.
    pub mac: [u8; 6],
}

/// A live renderer bridged onto an LMS virtual player.
pub struct Renderer {
    /// Arena index in the registry device table.
    pub index: usize,
    /// Stable identity.
    pub identity: RendererIdentity,
    /// Per-device configuration snapshot (global defaults + overrides).
    pub config: DeviceConfig,
    /// Service endpoints; subscription IDs mutate under the lock.
    pub services: RwLock<ServiceSet>,
    /// The mutable bridge state.
    pub state: Mutex<RendererState>,
    /// Reserved LMS player handle, set once bring-up completes.
    pub handle: Mutex<Option<PlayerHandle>>,
    /// Cancels the poller and any in-flight waits.
    pub cancel: CancellationToken,
    me: Weak<Renderer>,
    events: Arc<dyn PlayerEvents>,
    client: reqwest::Client,
    net: NetworkContext,
    pool: Arc<SlotPool>,
}

impl Renderer {
    /// Creates the record for a freshly discovered renderer. The caller
    /// (registry) subscribes events, requests capabilities and reserves
    /// the player afterwards.
    pub fn new(
        index: usize,
        identity: RendererIdentity,
        config: DeviceConfig,
        services: ServiceSet,
        events: Arc<dyn PlayerEvents>,
        client: reqwest::Client,
        net: NetworkContext,
        pool: Arc<SlotPool>,
    ) -> Arc<Self> {
        let state = RendererState {
            missing_count: config.remove_timeout,
            ..Default::default()
        };
        Arc::new_cyclic(|me| Self {
            index,
            identity,
            config,
            services: RwLock::new(services),
            state: Mutex::new(state),
            handle: Mutex::new(None),
            cancel: CancellationToken::new(),
            me: me.clone(),
            events,
            client,
            net,
            pool,
        })
    }

    /// The renderer's display name.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.identity.friendly_name
    }

    /// The control URL of a service role.
    #[must_use]
    pub fn control_url(&self, kind: ServiceKind) -> String {
        self.services.read().get(kind).control_url.clone()
    }

    /// The player name: config override, or the renderer's friendly name.
    #[must_use]
    pub fn player_name(&self) -> String {
        if self.config.name.is_empty() {
            self.identity.friendly_name.clone()
        } else {
            self.config.name.clone()
        }
    }

    // ── RPC facade ──────────────────────────────────────────────────────

    /// Fires a call as a spawned task; its completion re-enters
    /// [`Renderer::on_rpc_complete`].
    pub fn fire(&self, pending: PendingCall) {
        let Some(device) = self.me.upgrade() else { return };
        tokio::spawn(async move {
            let control_url = device.control_url(pending.call.kind);
            if control_url.is_empty() {
                log::warn!(
                    "[Bridge] {}: no {} service, dropping {}",
                    device.friendly_name(),
                    pending.call.kind.name(),
                    pending.call.action
                );
                device.on_rpc_complete(
                    pending.cookie,
                    Err(BridgeError::RendererNotFound(device.identity.udn.clone())),
                );
                return;
            }
            log::debug!(
                "[Bridge] {}: {} (cookie {})",
                device.friendly_name(),
                pending.call.action,
                pending.cookie
            );
            let result = pending
                .call
                .send(&device.client, &control_url)
                .await
                .map_err(BridgeError::from);
            device.on_rpc_complete(pending.cookie, result);
        });
    }

    fn fire_all(&self, pending: Vec<PendingCall>) {
        for call in pending {
            self.fire(call);
        }
    }

    /// Emits a batch of LMS events. Never call while holding the state
    /// mutex.
    fn emit(&self, events: Vec<PlayerEvent>) {
        if events.is_empty() {
            return;
        }
        let handle = *self.handle.lock();
        match handle {
            Some(handle) => dispatch_events(self.events.as_ref(), handle, events),
            None => log::debug!(
                "[Bridge] {}: dropping {} event(s), no player yet",
                self.friendly_name(),
                events.len()
            ),
        }
    }

    /// Completion callback of every fired SOAP call.
    pub fn on_rpc_complete(&self, cookie: u32, result: BridgeResult<String>) {
        let mut out = SyncOutcome::default();
        let next = {
            let mut state = self.state.lock();
            if state.closing {
                return;
            }

            match &result {
                Ok(body) => {
                    state.error_count = 0;
                    out.merge(self.process_response_locked(&mut state, body));
                }
                Err(e) => {
                    state.error_count += 1;
                    log::error!(
                        "[Bridge] {}: action error ({} consecutive): {}",
                        self.friendly_name(),
                        state.error_count,
                        e
                    );
                }
            }

            let next = state.gate.complete(cookie);
            // an acknowledgement may unlock an ordered head
            out.fire.extend(state.drain_actions());
            next
        };

        if let Some(next) = next {
            self.fire(next);
        }
        self.fire_all(out.fire);
        self.emit(out.events);
    }

    /// Parses interesting items out of a SOAP response body.
    fn process_response_locked(&self, state: &mut RendererState, body: &str) -> SyncOutcome {
        let mut out = SyncOutcome::default();

        if let Some(reported) = extract_xml_text(body, "CurrentTransportState") {
            if let Some(transport) = TransportState::parse(&reported) {
                out.merge(state.sync_transport_state(&self.config, transport));
            }
        }

        if let Some(rel_time) = extract_xml_text(body, "RelTime") {
            out.events.extend(state.observe_position(parse_time_ms(&rel_time)));
        }

        // gapless rollover: TrackURI, falling back to the res element of
        // TrackMetaData on renderers that omit it
        let mut track_uri = extract_xml_text(body, "TrackURI");
        if track_uri.as_deref().map_or(false, |u| !u.contains("-idx-")) {
            track_uri = extract_xml_text(body, "TrackMetaData")
                .and_then(|md| extract_xml_text(&md, "res"));
        }
        if let Some(uri) = track_uri {
            out.events.extend(state.observe_track_uri(&uri));
        }

        if let Some(sink) = extract_xml_text(body, "Sink") {
            log::debug!("[Bridge] {}: protocolInfo {}", self.friendly_name(), sink);
            state.capabilities = parse_capabilities(&sink, self.config.allow_flac);
            // user-forced mimetypes become synthetic sink entries
            for mime in self
                .config
                .forced_mimetypes
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
            {
                state.capabilities.push(format!("http-get:*:{}:", mime));
            }
            state.caps_ready = true;
        }

        if let Some(volume) = extract_xml_text(body, "CurrentVolume") {
            if let Ok(volume) = volume.parse::<u32>() {
                out.events.extend(state.observe_renderer_volume(&self.config, volume));
            }
        }

        out
    }

    /// Handles a GENA NOTIFY body for this device (RenderingControl
    /// LastChange carrying volume feedback).
    pub fn on_gena_notify(&self, body: &str) {
        let events = {
            let mut state = self.state.lock();
            if !state.on {
                return;
            }
            match parse_notify_volume(body) {
                Some(volume) => state.observe_renderer_volume(&self.config, u32::from(volume)),
                None => Vec::new(),
            }
        };
        self.emit(events);
    }

    /// Handles an origin-side slot event. Underruns surface to LMS as a
    /// stop; end-of-track only marks — the transport state machine emits
    /// the TRACK_CHANGE/STOP when the renderer acts on it.
    pub fn on_slot_event(&self, event: &SlotEvent) {
        match event {
            SlotEvent::Underrun { slot, .. } => {
                log::error!("[Bridge] {}: underrun on {}", self.friendly_name(), slot);
                self.emit(vec![PlayerEvent::Stop]);
            }
            SlotEvent::EndOfTrack { slot, .. } => {
                log::info!("[Bridge] {}: end of track on {}", self.friendly_name(), slot);
            }
        }
    }

    // ── LMS command surface ─────────────────────────────────────────────
    //
    // Each operation returns false when it could not be honored; LMS
    // treats that as "this track will not play".

    /// `ONOFF` — gates every other op.
    pub fn set_power(&self, on: bool) {
        let mut state = self.state.lock();
        state.on = on;
        log::debug!("[Bridge] {}: power {}", self.friendly_name(), on);
    }

    fn is_on(&self) -> bool {
        self.state.lock().on
    }

    /// `SETFORMAT` — negotiates the served format for the upcoming track.
    pub fn set_format(&self, format: &StreamFormat) -> bool {
        if !self.is_on() {
            return false;
        }
        let opts = MatchOptions::from(&self.config);
        let mut state = self.state.lock();
        if !state.caps_ready {
            log::warn!("[Bridge] {}: capabilities not ready", self.friendly_name());
        }
        match negotiate(&state.capabilities, format, &opts) {
            Some(negotiated) => {
                log::info!(
                    "[Bridge] {}: codec {} -> {}",
                    self.friendly_name(),
                    char::from(format.codec),
                    negotiated.content_type
                );
                state.pending_format = Some((*format, negotiated));
                true
            }
            None => {
                log::error!(
                    "[Bridge] {}: no matching codec for '{}'",
                    self.friendly_name(),
                    char::from(format.codec)
                );
                state.pending_format = None;
                false
            }
        }
    }

    fn strip_artwork(&self, mut metadata: TrackMetadata) -> TrackMetadata {
        if !self.config.send_coverart {
            metadata.artwork = None;
        }
        metadata
    }

    /// `SETURI` — aim the renderer at a new current track.
    pub fn set_uri(&self, urn: &str, metadata: TrackMetadata) -> bool {
        if !self.is_on() {
            return false;
        }
        let metadata = self.strip_artwork(metadata);
        let uri = self.net.stream_url(urn);

        let fire = {
            let mut state = self.state.lock();
            let Some((format, negotiated)) = state.pending_format.clone() else {
                log::error!("[Bridge] {}: SETURI without format", self.friendly_name());
                return false;
            };
            state.current_uri = None;
            state.next_uri = None;

            if let Some(slot) = self.pool.get(urn) {
                if let Err(e) = slot.configure(&format, &negotiated, &self.config) {
                    log::error!("[Bridge] {}: slot {}: {}", self.friendly_name(), urn, e);
                    return false;
                }
            }

            let didl = format_didl(
                &uri,
                &negotiated.protocol_info,
                &metadata,
                self.config.send_metadata,
            );
            let (_, fire) = state
                .gate
                .submit(control::set_av_transport_uri(&uri, &didl));
            state.current_uri = Some(uri.clone());
            state.current_live = format.duration_ms == 0;
            fire
        };

        log::info!("[Bridge] {}: current URI set {}", self.friendly_name(), uri);
        self.fire_all(fire.into_iter().collect());
        true
    }

    /// `SETNEXTURI` — cache (and, on gapless renderers, announce) the
    /// next track.
    pub fn set_next_uri(&self, urn: &str, metadata: TrackMetadata) -> bool {
        if !self.is_on() {
            return false;
        }
        let metadata = self.strip_artwork(metadata);
        let uri = self.net.stream_url(urn);

        let fire = {
            let mut state = self.state.lock();
            let Some((format, negotiated)) = state.pending_format.clone() else {
                log::error!("[Bridge] {}: SETNEXTURI without format", self.friendly_name());
                return false;
            };

            if let Some(slot) = self.pool.get(urn) {
                if let Err(e) = slot.configure(&format, &negotiated, &self.config) {
                    log::error!("[Bridge] {}: slot {}: {}", self.friendly_name(), urn, e);
                    return false;
                }
            }

            state.next_uri = Some(uri.clone());
            state.next_protocol_info = negotiated.protocol_info.clone();
            state.next_metadata = metadata.clone();

            if self.config.accept_nexturi && self.config.next_delay == 0 {
                let didl = format_didl(
                    &uri,
                    &negotiated.protocol_info,
                    &metadata,
                    self.config.send_metadata,
                );
                let (_, fire) = state
                    .gate
                    .submit(control::set_next_av_transport_uri(&uri, &didl));
                fire.into_iter().collect()
            } else {
                Vec::new()
            }
        };

        // some renderers flush their buffer when the next URI arrives too
        // early; next_delay holds the announcement back
        if self.config.accept_nexturi && self.config.next_delay > 0 {
            self.announce_next_delayed(uri.clone(), metadata);
        }

        log::info!("[Bridge] {}: next URI set {}", self.friendly_name(), uri);
        self.fire_all(fire);
        true
    }

    /// Sends `SetNextAVTransportURI` after the configured delay, unless
    /// the cached next track changed in the meantime.
    fn announce_next_delayed(&self, uri: String, metadata: TrackMetadata) {
        let Some(device) = self.me.upgrade() else { return };
        let delay = Duration::from_secs(u64::from(self.config.next_delay));
        tokio::spawn(async move {
            tokio::select! {
                _ = device.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let fire = {
                let mut state = device.state.lock();
                if state.next_uri.as_deref() != Some(uri.as_str()) {
                    return;
                }
                let didl = format_didl(
                    &uri,
                    &state.next_protocol_info,
                    &metadata,
                    device.config.send_metadata,
                );
                let (_, fire) = state
                    .gate
                    .submit(control::set_next_av_transport_uri(&uri, &didl));
                fire
            };
            if let Some(pending) = fire {
                device.fire(pending);
            }
        });
    }

    /// `PLAY` — start the current track.
    pub fn play(&self) -> bool {
        if !self.is_on() {
            return false;
        }
        let fire = {
            let mut state = self.state.lock();
            if state.current_uri.is_none() {
                return false;
            }
            let mut fire = Vec::new();
            let (_, pending) = state.gate.submit(control::set_play_mode());
            fire.extend(pending);
            state.actions.push(Action::unordered(ActionKind::Play));
            state.intent = Intent::Play;
            if self.config.volume_on_play == VolumeOnPlay::PlayOnly {
                let volume = state.volume;
                let (_, pending) = state.gate.submit(control::set_volume(volume));
                fire.extend(pending);
            }
            fire
        };
        self.fire_all(fire);
        true
    }

    /// `UNPAUSE` — resume; `lms_time_ms` is the player timeline for
    /// renderers that mis-resume and need a seek re-assert.
    pub fn unpause(&self, lms_time_ms: Option<u32>) -> bool {
        if !self.is_on() {
            return false;
        }
        let fire = {
            let mut state = self.state.lock();
            if state.current_uri.is_none() {
                return false;
            }
            let mut fire = Vec::new();
            if self.config.seek_after_pause {
                if let Some(time) = lms_time_ms {
                    let (_, pending) = state.gate.submit(control::seek(time));
                    fire.extend(pending);
                }
            }
            state.actions.push(Action::unordered(ActionKind::Unpause));
            state.intent = Intent::Play;
            fire
        };
        self.fire_all(fire);
        true
    }

    /// `PAUSE` — queued so the reconciliation loop sequences it. Live
    /// streams on devices that cannot pause them are stopped instead.
    pub fn pause(&self) -> bool {
        if !self.is_on() {
            return false;
        }
        let live = self.state.lock().current_live;
        if live && !self.config.live_pause {
            log::info!("[Bridge] {}: pause on live stream -> stop", self.friendly_name());
            self.stop();
            return true;
        }
        let mut state = self.state.lock();
        state.actions.push(Action::unordered(ActionKind::Pause));
        state.intent = Intent::Pause;
        true
    }

    /// `STOP` — bypasses the queue entirely; stop must win.
    pub fn stop(&self) {
        if !self.is_on() {
            return;
        }
        let pending = {
            let mut state = self.state.lock();
            state.actions.flush();
            state.current_uri = None;
            state.next_uri = None;
            state.intent = Intent::Stop;
            state.gate.force_submit(control::stop())
        };
        self.fire(pending);
    }

    /// `SEEK` — forwarded to the renderer as a REL_TIME seek.
    pub fn seek(&self, position_ms: u32) -> bool {
        if !self.is_on() {
            return false;
        }
        let fire = {
            let mut state = self.state.lock();
            let (_, fire) = state.gate.submit(control::seek(position_ms));
            fire
        };
        self.fire_all(fire.into_iter().collect());
        true
    }

    /// `VOLUME` — maps the LMS gain onto the renderer scale, honoring the
    /// transmission policy.
    pub fn volume(&self, lms_gain: u32) {
        if !self.is_on() {
            return;
        }
        let fire = {
            let mut state = self.state.lock();
            let mapped = lms_to_renderer(lms_gain, self.config.max_volume);
            state.volume = mapped;
            state.previous_volume = mapped;

            match self.config.volume_on_play {
                // compute but do not transmit, so feedback can still compare
                VolumeOnPlay::Suppress => Vec::new(),
                VolumeOnPlay::PlayOnly if state.intent != Intent::Play => Vec::new(),
                _ => {
                    let (_, fire) = state.gate.submit(control::set_volume(mapped));
                    fire.into_iter().collect()
                }
            }
        };
        self.fire_all(fire);
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Whether the bridge is quiesced by consecutive RPC errors.
    #[must_use]
    pub fn is_quiesced(&self) -> bool {
        self.state.lock().error_count > MAX_ACTION_ERRORS
    }

    /// Discovery refresh: the device answered a scan.
    pub fn refresh(&self) {
        let mut state = self.state.lock();
        state.stale = false;
        state.missing_count = self.config.remove_timeout;
        state.error_count = 0;
    }

    /// Sends one synchronous call outside the gate (teardown only, where
    /// pending async completions can no longer be serviced).
    async fn send_direct(&self, call: SoapCall) {
        let control_url = self.control_url(call.kind);
        if control_url.is_empty() {
            return;
        }
        if let Err(e) = call.send(&self.client, &control_url).await {
            log::warn!("[Bridge] {}: teardown {}: {}", self.friendly_name(), call.action, e);
        }
    }

    /// Tears the bridge down: stops the poller, silences a playing
    /// renderer, unsubscribes, releases the slots.
    pub async fn teardown(&self, gena: &GenaClient) {
        log::info!("[Bridge] removing renderer ({})", self.friendly_name());
        self.cancel.cancel();

        let was_active = {
            let mut state = self.state.lock();
            state.closing = true;
            let active = matches!(state.intent, Intent::Play | Intent::Pause);
            state.actions.flush();
            state.gate.flush();
            state.current_uri = None;
            state.next_uri = None;
            active
        };

        // a renderer left playing would pull from a dead origin forever
        if was_active {
            self.send_direct(control::stop()).await;
        }

        let subs: Vec<(String, String)> = {
            let services = self.services.read();
            ALL_SERVICES
                .into_iter()
                .filter_map(|kind| {
                    let endpoint = services.get(kind);
                    endpoint
                        .sid
                        .clone()
                        .map(|sid| (endpoint.event_url.clone(), sid))
                })
                .collect()
        };
        for (event_url, sid) in subs {
            gena.unsubscribe(&event_url, &sid).await;
        }

        self.pool.remove_pair(&self.identity.mac);
    }

    /// Restricts the advertised codec list to what the renderer sinks,
    /// returning the config to reserve the player with.
    #[must_use]
    pub fn reservation_config(&self) -> DeviceConfig {
        let mut config = self.config.clone();
        let caps = {
            let state = self.state.lock();
            if !state.caps_ready {
                return config;
            }
            state.capabilities.clone()
        };
        let filtered = check_codecs(&config.codecs, &caps);
        log::debug!(
            "[Bridge] {}: codecs '{}' -> '{}'",
            self.friendly_name(),
            config.codecs,
            filtered
        );
        config.codecs = filtered;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::player::test_support::RecordingEvents;
    use tokio::sync::mpsc;

    fn test_device(config: DeviceConfig) -> (Arc<Renderer>, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = Arc::new(SlotPool::new(
            std::env::temp_dir().to_str().unwrap(),
            tx,
        ));
        let identity = RendererIdentity {
            udn: "uuid:test".into(),
            friendly_name: "Test Renderer".into(),
            manufacturer: "ACME".into(),
            desc_url: "http://192.168.1.20:49152/desc.xml".into(),
            presentation_url: String::new(),
            ip: "192.168.1.20".parse().unwrap(),
            mac: [0, 4, 0x20, 1, 2, 3],
        };
        let device = Renderer::new(
            0,
            identity,
            config,
            ServiceSet::default(),
            events.clone() as Arc<dyn PlayerEvents>,
            reqwest::Client::new(),
            NetworkContext::explicit(49152, "192.168.1.2".parse().unwrap()),
            pool,
        );
        *device.handle.lock() = Some(PlayerHandle(1));
        (device, events)
    }

    #[test]
    fn commands_short_circuit_while_off() {
        let (device, _events) = test_device(DeviceConfig::default());
        assert!(!device.play());
        assert!(!device.pause());
        assert!(!device.seek(1000));
        device.set_power(true);
        // pause succeeds even without a URI (it only queues)
        assert!(device.pause());
    }

    #[test]
    fn set_format_fails_without_matching_sink() {
        let (device, _events) = test_device(DeviceConfig::default());
        device.set_power(true);
        {
            let mut state = device.state.lock();
            state.capabilities = vec!["http-get:*:audio/mpeg:".into()];
            state.caps_ready = true;
        }

        let mp3 = StreamFormat {
            codec: b'm',
            channels: 2,
            sample_rate: 44_100,
            sample_size: 16,
            endianness: crate::stream::Endianness::Little,
            duration_ms: 60_000,
        };
        assert!(device.set_format(&mp3));

        let flac = StreamFormat { codec: b'f', ..mp3 };
        assert!(!device.set_format(&flac));
        assert!(device.state.lock().pending_format.is_none());
    }

    #[test]
    fn volume_respects_transmission_policy() {
        // play-only volume policy: a volume command while paused computes
        // but queues no call; the state carries it for the play-time
        // reassert
        let config = DeviceConfig {
            volume_on_play: VolumeOnPlay::PlayOnly,
            ..Default::default()
        };
        let (device, _events) = test_device(config);
        device.set_power(true);
        {
            let mut state = device.state.lock();
            state.intent = Intent::Pause;
        }

        device.volume(60);
        let state = device.state.lock();
        // gain 60 sits on the 60% curve step
        assert_eq!(state.volume, 60);
        assert!(!state.gate.busy(), "no RPC while not playing");
    }

    #[test]
    fn volume_suppress_never_transmits() {
        let config = DeviceConfig {
            volume_on_play: VolumeOnPlay::Suppress,
            ..Default::default()
        };
        let (device, _events) = test_device(config);
        device.set_power(true);
        device.volume(100);
        assert!(!device.state.lock().gate.busy());
    }

    #[test]
    fn gena_volume_notify_reaches_lms() {
        let (device, events) = test_device(DeviceConfig::default());
        device.set_power(true);

        let body = r#"<e:propertyset><e:property><LastChange>&lt;Event&gt;&lt;InstanceID val="0"&gt;&lt;Volume channel="Master" val="37"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange></e:property></e:propertyset>"#;
        device.on_gena_notify(body);

        let recorded = events.events.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, PlayerEvent::Volume { volume: 37 });
    }

    #[test]
    fn underrun_surfaces_as_stop() {
        let (device, events) = test_device(DeviceConfig::default());
        device.set_power(true);
        device.on_slot_event(&SlotEvent::Underrun {
            device: 0,
            slot: "00-04-20-01-02-03-idx-0".into(),
        });
        device.on_slot_event(&SlotEvent::EndOfTrack {
            device: 0,
            slot: "00-04-20-01-02-03-idx-0".into(),
        });

        let recorded = events.events.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, PlayerEvent::Stop);
    }

    #[test]
    fn quiesce_threshold_follows_error_count() {
        let (device, _events) = test_device(DeviceConfig::default());
        device.state.lock().error_count = MAX_ACTION_ERRORS;
        assert!(!device.is_quiesced());
        device.state.lock().error_count = MAX_ACTION_ERRORS + 1;
        assert!(device.is_quiesced());
        device.refresh();
        assert!(!device.is_quiesced());
    }

    #[test]
    fn reservation_config_filters_codecs() {
        let (device, _events) = test_device(DeviceConfig::default());
        {
            let mut state = device.state.lock();
            state.capabilities = vec!["http-get:*:audio/mpeg:".into()];
            state.caps_ready = true;
        }
        let config = device.reservation_config();
        assert_eq!(config.codecs, "mp3");
    }
}

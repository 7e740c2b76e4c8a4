//! The per-renderer bridge loop.
//!
//! One task per live renderer, ticking every 500 ms. Transport eventing is
//! unreliable on too many renderers, so `GetTransportInfo` polling is
//! authoritative for state; `GetPositionInfo` runs at 1 s while playing;
//! `GetVolume` doubles as a keep-alive every 10 s. The same task renews
//! the RenderingControl event subscription on its granted timeout, with a
//! one-shot re-subscribe when renewal fails.
//!
//! Polls go through [`RpcGate::submit_poll`](crate::bridge::queue::RpcGate::submit_poll):
//! while a control action is in flight they are skipped, never queued, so
//! a slow renderer cannot accumulate a backlog of status requests.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::device::Renderer;
use crate::bridge::state::{Intent, TransportState};
use crate::context::NetworkContext;
use crate::protocol_constants::{
    MAX_ACTION_ERRORS, STATE_POLL_MS, TRACK_POLL_MS, VOLUME_POLL_MS,
};
use crate::upnp::control;
use crate::upnp::gena::GenaClient;
use crate::upnp::services::ServiceKind;

/// Spawns the bridge loop for a device. The task exits when the device's
/// cancellation token fires.
pub fn spawn(device: Arc<Renderer>, gena: Arc<GenaClient>, net: NetworkContext) {
    tokio::spawn(run(device, gena, net));
}

async fn run(device: Arc<Renderer>, gena: Arc<GenaClient>, net: NetworkContext) {
    let mut track_accum: u64 = 0;
    let mut volume_accum: u64 = 0;
    let mut renewal_accum: u64 = 0;

    loop {
        tokio::select! {
            _ = device.cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(STATE_POLL_MS)) => {}
        }

        renewal_accum += STATE_POLL_MS;
        let renewal_due_secs = device
            .services
            .read()
            .get(ServiceKind::RenderingControl)
            .timeout_secs;
        if renewal_due_secs > 0 && renewal_accum >= u64::from(renewal_due_secs) * 1000 {
            renewal_accum = 0;
            renew_subscription(&device, &gena, &net).await;
        }

        let fire = {
            let mut state = device.state.lock();
            if state.closing {
                break;
            }
            let mut fire = Vec::new();

            // keep-alive volume poll, even while idle
            if state.on {
                volume_accum += STATE_POLL_MS;
                if volume_accum >= VOLUME_POLL_MS {
                    volume_accum = 0;
                    fire.extend(state.gate.submit_poll(control::get_volume()));
                }
            }

            // nothing to reconcile when both domains agree on silence, and
            // nothing to send into a quiesced device
            let idle = !state.on
                || (state.intent == Intent::Stop && state.state == TransportState::Stopped)
                || state.error_count > MAX_ACTION_ERRORS;

            if !idle {
                track_accum += STATE_POLL_MS;
                if track_accum >= TRACK_POLL_MS {
                    track_accum = 0;
                    if matches!(
                        state.state,
                        TransportState::Playing | TransportState::Transitioning
                    ) {
                        fire.extend(state.gate.submit_poll(control::get_position_info()));
                    }
                }

                fire.extend(state.gate.submit_poll(control::get_transport_info()));
            }

            fire
        };

        for pending in fire {
            device.fire(pending);
        }
    }

    log::debug!("[Bridge] {}: poller exited", device.friendly_name());
}

/// Renews the RenderingControl subscription, falling back to a fresh
/// SUBSCRIBE when the device dropped the old one. Persistent failure
/// counts against the device's error budget.
async fn renew_subscription(device: &Arc<Renderer>, gena: &GenaClient, net: &NetworkContext) {
    let (event_url, sid) = {
        let services = device.services.read();
        let endpoint = services.get(ServiceKind::RenderingControl);
        (endpoint.event_url.clone(), endpoint.sid.clone())
    };
    if event_url.is_empty() {
        return;
    }
    let requested = ServiceKind::RenderingControl.subscription_timeout();

    if let Some(sid) = sid {
        match gena.renew(&event_url, &sid, requested).await {
            Ok(granted) => {
                device
                    .services
                    .write()
                    .get_mut(ServiceKind::RenderingControl)
                    .timeout_secs = granted;
                return;
            }
            Err(e) => {
                log::warn!("[Bridge] {}: renewal failed: {}", device.friendly_name(), e);
            }
        }
    }

    // one-shot re-subscribe
    let callback = net.gena_callback_url(device.index);
    match gena.subscribe(&event_url, &callback, requested).await {
        Ok(sub) => {
            let mut services = device.services.write();
            let endpoint = services.get_mut(ServiceKind::RenderingControl);
            endpoint.sid = Some(sub.sid);
            endpoint.timeout_secs = sub.timeout_secs;
        }
        Err(e) => {
            log::error!("[Bridge] {}: re-subscribe failed: {}", device.friendly_name(), e);
            device.state.lock().error_count += 1;
        }
    }
}

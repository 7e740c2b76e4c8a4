//! Device registry and discovery loop.
//!
//! Owns the fixed-size renderer table. Every `scan_interval` the loop
//! marks all live devices stale, runs one multicast search bounded by
//! `scan_timeout`, then processes the found description URLs in a single
//! update pass (never concurrent with itself): fetch + parse description,
//! refresh known devices, bring up new ones. Devices still stale after
//! the pass burn one missing-count; at zero they are torn down. With
//! auto-save enabled the XML config is rewritten after every cycle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bridge::device::{Renderer, RendererIdentity};
use crate::bridge::player::{PlayerEvents, PlayerHost};
use crate::bridge::poller;
use crate::config::store::{ConfigStore, DeviceSnapshot};
use crate::config::{DeviceConfig, GlobalConfig};
use crate::context::NetworkContext;
use crate::error::BridgeResult;
use crate::protocol_constants::{
    EXCLUDED_MANUFACTURERS, MAX_RENDERERS, PROTOCOL_CAP_POLL_MS, PROTOCOL_CAP_WAIT_MS,
};
use crate::stream::SlotPool;
use crate::upnp::description::{fetch_description, ip_from_location, DeviceDescription};
use crate::upnp::gena::GenaClient;
use crate::upnp::services::ServiceKind;
use crate::upnp::ssdp::{self, SearchHit, SsdpConfig};
use crate::upnp::control;
use crate::utils::mac_from_udn;

/// The process-wide renderer registry.
pub struct Registry {
    devices: Mutex<Vec<Option<Arc<Renderer>>>>,
    /// Description URLs found by the running search, drained by the
    /// update pass.
    found: Mutex<Vec<SearchHit>>,
    pub pool: Arc<SlotPool>,
    pub cancel: CancellationToken,
    net: NetworkContext,
    client: reqwest::Client,
    gena: Arc<GenaClient>,
    host: Arc<dyn PlayerHost>,
    events: Arc<dyn PlayerEvents>,
    global: GlobalConfig,
    common: DeviceConfig,
    store: Mutex<ConfigStore>,
    autosave: bool,
}

impl Registry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<SlotPool>,
        net: NetworkContext,
        client: reqwest::Client,
        host: Arc<dyn PlayerHost>,
        events: Arc<dyn PlayerEvents>,
        global: GlobalConfig,
        common: DeviceConfig,
        store: ConfigStore,
        autosave: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new((0..MAX_RENDERERS).map(|_| None).collect()),
            found: Mutex::new(Vec::new()),
            pool,
            cancel: CancellationToken::new(),
            gena: Arc::new(GenaClient::new(client.clone())),
            net,
            client,
            host,
            events,
            global,
            common,
            store: Mutex::new(store),
            autosave,
        })
    }

    /// Looks a device up by its table index.
    #[must_use]
    pub fn device(&self, index: usize) -> Option<Arc<Renderer>> {
        self.devices.lock().get(index).and_then(Clone::clone)
    }

    /// Looks a device up by UDN.
    #[must_use]
    pub fn device_by_udn(&self, udn: &str) -> Option<Arc<Renderer>> {
        self.devices
            .lock()
            .iter()
            .flatten()
            .find(|d| d.identity.udn == udn)
            .cloned()
    }

    /// All live devices.
    #[must_use]
    pub fn live_devices(&self) -> Vec<Arc<Renderer>> {
        self.devices.lock().iter().flatten().cloned().collect()
    }

    fn ssdp_config(&self) -> SsdpConfig {
        let bind_ip = self
            .global
            .binding
            .split(':')
            .next()
            .and_then(|ip| ip.parse().ok());
        SsdpConfig {
            search_timeout: std::time::Duration::from_secs(u64::from(
                self.global.scan_timeout_secs,
            )),
            extra_targets: self.global.custom_discovery.clone(),
            bind_ip,
            ..Default::default()
        }
    }

    // ── discovery loop ──────────────────────────────────────────────────

    /// Runs discovery until cancelled. One scan per `scan_interval`;
    /// `scan_interval == 0` means a single scan.
    pub async fn discovery_loop(self: Arc<Self>) {
        let interval = u64::from(self.global.scan_interval_secs);
        loop {
            let started = std::time::Instant::now();
            self.scan_once().await;
            if interval == 0 || self.cancel.is_cancelled() {
                break;
            }
            let elapsed = started.elapsed().as_secs();
            let wait = interval.saturating_sub(elapsed).max(1);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {}
            }
        }
        log::debug!("[Discovery] loop exited");
    }

    /// One full discovery cycle: search, update, evict, auto-save.
    pub async fn scan_once(&self) {
        for device in self.live_devices() {
            device.state.lock().stale = true;
        }

        match ssdp::search(&self.ssdp_config()).await {
            Ok(hits) => self.found.lock().extend(hits),
            Err(e) => log::error!("[Discovery] search failed: {}", e),
        }

        self.update_devices().await;
        self.evict_stale().await;

        if self.autosave {
            if let Err(e) = self.save_config(false) {
                log::error!("[Discovery] auto-save failed: {}", e);
            }
        }
    }

    /// The update pass over the found-URL list.
    async fn update_devices(&self) {
        let hits: Vec<SearchHit> = std::mem::take(&mut *self.found.lock());
        log::debug!("[Discovery] update pass over {} location(s)", hits.len());

        for hit in hits {
            if self.cancel.is_cancelled() {
                return;
            }
            let desc = match fetch_description(&self.client, &hit.location).await {
                Ok(desc) => desc,
                Err(e) => {
                    // next cycle retries
                    log::debug!("[Discovery] description {} failed: {}", hit.location, e);
                    continue;
                }
            };

            if EXCLUDED_MANUFACTURERS
                .iter()
                .any(|m| desc.manufacturer.contains(m))
            {
                continue;
            }
            if desc.udn.is_empty() {
                log::debug!("[Discovery] {} has no UDN, skipping", hit.location);
                continue;
            }

            if let Some(existing) = self.device_by_udn(&desc.udn) {
                existing.refresh();
                continue;
            }

            if let Err(e) = self.add_device(desc, &hit.location).await {
                log::error!("[Discovery] cannot add {}: {}", hit.location, e);
            }
        }
    }

    /// Brings a new renderer up and installs it in the table.
    async fn add_device(&self, desc: DeviceDescription, location: &str) -> BridgeResult<()> {
        if !desc.services.get(ServiceKind::AvTransport).is_present() {
            log::debug!("[Discovery] {} has no AVTransport, skipping", desc.friendly_name);
            return Ok(());
        }

        let mut config = self.common.clone();
        let stored_mac = self.store.lock().load_device(&desc.udn, &mut config);
        if !config.enabled {
            log::debug!("[Discovery] {} disabled by config", desc.friendly_name);
            return Ok(());
        }

        let ip = ip_from_location(location)
            .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        let mac = stored_mac.unwrap_or_else(|| mac_from_udn(&desc.udn));

        let index = {
            let mut devices = self.devices.lock();
            let Some(index) = devices.iter().position(Option::is_none) else {
                log::error!("[Discovery] too many renderers, dropping {}", desc.friendly_name);
                return Err(crate::error::BridgeError::DeviceTableFull);
            };
            let identity = RendererIdentity {
                udn: desc.udn.clone(),
                friendly_name: desc.friendly_name.clone(),
                manufacturer: desc.manufacturer.clone(),
                desc_url: location.to_string(),
                presentation_url: desc.presentation_url.clone(),
                ip,
                mac,
            };
            let device = Renderer::new(
                index,
                identity,
                config,
                desc.services.clone(),
                Arc::clone(&self.events),
                self.client.clone(),
                self.net.clone(),
                Arc::clone(&self.pool),
            );
            devices[index] = Some(device);
            index
        };
        let device = self.device(index).expect("just inserted");
        log::info!("[Discovery] adding renderer ({})", device.friendly_name());

        // events first, so volume feedback is live before the player is
        let rendering = device
            .services
            .read()
            .get(ServiceKind::RenderingControl)
            .clone();
        if rendering.is_present() && rendering.timeout_secs > 0 {
            let callback = self.net.gena_callback_url(index);
            match self
                .gena
                .subscribe(&rendering.event_url, &callback, rendering.timeout_secs)
                .await
            {
                Ok(sub) => {
                    let mut services = device.services.write();
                    let endpoint = services.get_mut(ServiceKind::RenderingControl);
                    endpoint.sid = Some(sub.sid);
                    endpoint.timeout_secs = sub.timeout_secs;
                }
                Err(e) => {
                    log::warn!("[Discovery] {}: subscribe failed: {}", device.friendly_name(), e);
                }
            }
        }

        // ask for the sink capabilities and give the answer a bounded wait
        // so the codec filter can run before the player is reserved
        if device
            .services
            .read()
            .get(ServiceKind::ConnectionManager)
            .is_present()
        {
            let fire = {
                let mut state = device.state.lock();
                let (_, fire) = state.gate.submit(control::get_protocol_info());
                fire
            };
            if let Some(pending) = fire {
                device.fire(pending);
            }
            let rounds = PROTOCOL_CAP_WAIT_MS / PROTOCOL_CAP_POLL_MS;
            for _ in 0..rounds {
                if device.state.lock().caps_ready {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(PROTOCOL_CAP_POLL_MS)).await;
            }
            if !device.state.lock().caps_ready {
                log::error!(
                    "[Discovery] {}: timeout waiting ProtocolInfo, cannot adjust codecs",
                    device.friendly_name()
                );
            }
        }

        self.pool.create_pair(index, &mac, &device.config);

        let reservation = device.reservation_config();
        match self.host.reserve(&device.player_name(), mac, &reservation) {
            Ok(handle) => {
                *device.handle.lock() = Some(handle);
            }
            Err(e) => {
                log::error!(
                    "[Discovery] {}: cannot create player instance: {}",
                    device.friendly_name(),
                    e
                );
                self.remove_device(index).await;
                return Err(e);
            }
        }

        poller::spawn(Arc::clone(&device), Arc::clone(&self.gena), self.net.clone());
        Ok(())
    }

    /// Walks the table and tears down devices that missed too many scans.
    async fn evict_stale(&self) {
        for device in self.live_devices() {
            let expired = {
                let mut state = device.state.lock();
                if !state.stale || state.missing_count == 0 {
                    continue;
                }
                state.missing_count -= 1;
                state.missing_count == 0
            };
            if expired {
                self.remove_device(device.index).await;
            }
        }
    }

    /// Tears a device down and frees its table slot.
    pub async fn remove_device(&self, index: usize) {
        let device = {
            let mut devices = self.devices.lock();
            devices.get_mut(index).and_then(Option::take)
        };
        let Some(device) = device else { return };

        if let Some(handle) = device.handle.lock().take() {
            self.host.release(handle);
        }
        device.teardown(&self.gena).await;
        // the slot index is free for reuse only now that teardown finished
    }

    // ── persistence ─────────────────────────────────────────────────────

    /// Writes the config document; `full` regenerates from scratch.
    pub fn save_config(&self, full: bool) -> BridgeResult<()> {
        let store = self.store.lock();
        let path = store.path().to_path_buf();
        self.save_config_as(&store, &path, full)
    }

    /// Writes the config document to an explicit path (interactive
    /// `save <name>` and the `-i` discover-and-save mode).
    pub fn save_config_to(&self, path: &std::path::Path, full: bool) -> BridgeResult<()> {
        let store = self.store.lock();
        self.save_config_as(&store, path, full)
    }

    fn save_config_as(
        &self,
        store: &ConfigStore,
        path: &std::path::Path,
        full: bool,
    ) -> BridgeResult<()> {
        let snapshots: Vec<DeviceSnapshot> = self
            .live_devices()
            .into_iter()
            .map(|d| DeviceSnapshot {
                udn: d.identity.udn.clone(),
                mac: d.identity.mac,
                friendly_name: d.identity.friendly_name.clone(),
                name: d.player_name(),
                server: d.config.server.clone(),
                enabled: d.config.enabled,
            })
            .collect();
        store.save_merged(path, &self.global, &self.common, &snapshots, full)
    }

    // ── shutdown ────────────────────────────────────────────────────────

    /// Graceful shutdown: stop discovery, then tear every device down
    /// (each sends a synchronous Stop when it was playing).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let indices: Vec<usize> = self.live_devices().iter().map(|d| d.index).collect();
        for index in indices {
            self.remove_device(index).await;
        }
    }

    #[cfg(test)]
    fn insert_for_test(&self, udn: &str, config: DeviceConfig) -> Arc<Renderer> {
        let mut devices = self.devices.lock();
        let index = devices.iter().position(Option::is_none).expect("free slot");
        let mac = mac_from_udn(udn);
        let identity = RendererIdentity {
            udn: udn.to_string(),
            friendly_name: format!("Renderer {}", index),
            manufacturer: "ACME".into(),
            desc_url: format!("http://192.168.1.{}:49152/desc.xml", 10 + index),
            presentation_url: String::new(),
            ip: std::net::IpAddr::V4(std::net::Ipv4Addr::new(192, 168, 1, 10 + index as u8)),
            mac,
        };
        let device = Renderer::new(
            index,
            identity,
            config,
            Default::default(),
            Arc::clone(&self.events),
            self.client.clone(),
            self.net.clone(),
            Arc::clone(&self.pool),
        );
        devices[index] = Some(Arc::clone(&device));
        device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::player::test_support::RecordingEvents;
    use crate::bridge::player::PlayerHandle;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct FakeHost {
        reserved: PlMutex<u32>,
        released: PlMutex<Vec<PlayerHandle>>,
    }

    impl PlayerHost for FakeHost {
        fn reserve(
            &self,
            _name: &str,
            _mac: [u8; 6],
            _config: &DeviceConfig,
        ) -> crate::error::BridgeResult<PlayerHandle> {
            let mut next = self.reserved.lock();
            *next += 1;
            Ok(PlayerHandle(*next))
        }

        fn release(&self, handle: PlayerHandle) {
            self.released.lock().push(handle);
        }
    }

    fn test_registry(dir: &std::path::Path) -> (Arc<Registry>, Arc<FakeHost>) {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pool = Arc::new(SlotPool::new(dir.to_str().unwrap(), tx));
        let host = Arc::new(FakeHost::default());
        let registry = Registry::new(
            pool,
            NetworkContext::explicit(49152, "127.0.0.1".parse().unwrap()),
            reqwest::Client::new(),
            host.clone(),
            Arc::new(RecordingEvents::default()),
            GlobalConfig::default(),
            DeviceConfig::default(),
            ConfigStore::empty(&dir.join("config.xml")),
            false,
        );
        (registry, host)
    }

    fn run_eviction_cycle(registry: &Registry, answered: &[&str]) {
        for device in registry.live_devices() {
            device.state.lock().stale = true;
        }
        for udn in answered {
            if let Some(device) = registry.device_by_udn(udn) {
                device.refresh();
            }
        }
    }

    #[tokio::test]
    async fn continuously_present_device_survives_scans() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, host) = test_registry(dir.path());
        let config = DeviceConfig { remove_timeout: 2, ..Default::default() };
        let device = registry.insert_for_test("uuid:steady", config);
        device.state.lock().missing_count = 2;

        for _ in 0..5 {
            run_eviction_cycle(&registry, &["uuid:steady"]);
            registry.evict_stale().await;
        }
        assert!(registry.device_by_udn("uuid:steady").is_some());
        assert!(host.released.lock().is_empty());
    }

    #[tokio::test]
    async fn absent_device_is_torn_down_after_remove_timeout_scans() {
        // present for two scans, then absent for remove_timeout scans:
        // the device is evicted on the scan after the timeout elapses,
        // its slot frees, its player releases, its origin slots disappear
        let dir = tempfile::tempdir().unwrap();
        let (registry, host) = test_registry(dir.path());
        let config = DeviceConfig { remove_timeout: 2, ..Default::default() };
        let device = registry.insert_for_test("uuid:flaky", config.clone());
        device.state.lock().missing_count = 2;
        *device.handle.lock() = Some(PlayerHandle(7));
        let mac = device.identity.mac;
        registry.pool.create_pair(device.index, &mac, &config);
        let slot_name = format!("{}-idx-0", crate::utils::format_mac(&mac, '-'));
        assert!(registry.pool.get(&slot_name).is_some());

        // first missed scan decrements, device stays
        run_eviction_cycle(&registry, &[]);
        registry.evict_stale().await;
        assert!(registry.device_by_udn("uuid:flaky").is_some());

        // second missed scan hits zero: teardown
        run_eviction_cycle(&registry, &[]);
        registry.evict_stale().await;
        assert!(registry.device_by_udn("uuid:flaky").is_none());
        assert_eq!(host.released.lock().as_slice(), &[PlayerHandle(7)]);
        assert!(registry.pool.get(&slot_name).is_none());
    }

    #[tokio::test]
    async fn refresh_between_misses_resets_the_counter() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _host) = test_registry(dir.path());
        let config = DeviceConfig { remove_timeout: 2, ..Default::default() };
        let device = registry.insert_for_test("uuid:blinky", config);
        device.state.lock().missing_count = 2;

        run_eviction_cycle(&registry, &[]);
        registry.evict_stale().await;
        // it answers again: the counter refills
        run_eviction_cycle(&registry, &["uuid:blinky"]);
        registry.evict_stale().await;
        assert_eq!(device.state.lock().missing_count, 2);

        run_eviction_cycle(&registry, &[]);
        registry.evict_stale().await;
        assert!(registry.device_by_udn("uuid:blinky").is_some());
    }

    #[test]
    fn table_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _host) = test_registry(dir.path());
        for i in 0..crate::protocol_constants::MAX_RENDERERS {
            registry.insert_for_test(&format!("uuid:dev-{}", i), DeviceConfig::default());
        }
        assert_eq!(registry.live_devices().len(), crate::protocol_constants::MAX_RENDERERS);
        assert!(registry.devices.lock().iter().all(Option::is_some));
    }
}

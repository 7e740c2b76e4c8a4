//! Service wiring and lifecycle.
//!
//! Builds the slot pool, registry and origin from configuration, starts
//! the background tasks (discovery loop, slot-event forwarding, origin
//! server, log rotation), and owns the shutdown ordering: discovery stops
//! first, then every bridge tears down (silencing still-playing
//! renderers synchronously), and the origin last.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{start_server, AppState};
use crate::bridge::player::{PlayerEvents, PlayerHost};
use crate::config::store::ConfigStore;
use crate::config::{DeviceConfig, GlobalConfig};
use crate::context::{LocalIpDetector, NetworkContext};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::Registry;
use crate::stream::slot::SlotEvent;
use crate::stream::SlotPool;

/// How often the log rotation check runs.
const LOG_CHECK_SECS: u64 = 30;

/// Everything the supervisor needs to run and stop the bridge.
pub struct BootstrappedServices {
    pub registry: Arc<Registry>,
    pub pool: Arc<SlotPool>,
    pub net: NetworkContext,
    pub cancel: CancellationToken,
    slot_events: Mutex<Option<mpsc::UnboundedReceiver<SlotEvent>>>,
    log_file: Option<PathBuf>,
    log_limit_mb: i32,
}

/// Derives the network context from the `binding` config value
/// (`ip[:port]`, or `?` for auto-detection).
pub fn network_from_binding(binding: &str) -> BridgeResult<NetworkContext> {
    if binding.contains('?') || binding.is_empty() {
        return NetworkContext::auto_detect(0, LocalIpDetector::arc())
            .map_err(|e| BridgeError::Configuration(e.to_string()));
    }
    let (ip, port) = match binding.rsplit_once(':') {
        Some((ip, port)) => (
            ip,
            port.parse::<u16>()
                .map_err(|_| BridgeError::Configuration(format!("bad binding '{}'", binding)))?,
        ),
        None => (binding, 0),
    };
    let ip = ip
        .parse()
        .map_err(|_| BridgeError::Configuration(format!("bad binding '{}'", binding)))?;
    Ok(NetworkContext::explicit(port, ip))
}

/// Builds every service from configuration. Nothing runs until
/// [`BootstrappedServices::start_background_tasks`] is called.
pub fn bootstrap_services(
    global: GlobalConfig,
    common: DeviceConfig,
    store: ConfigStore,
    host: Arc<dyn PlayerHost>,
    events: Arc<dyn PlayerEvents>,
    autosave: bool,
) -> BridgeResult<BootstrappedServices> {
    let net = network_from_binding(&global.binding)?;

    let (slot_tx, slot_rx) = mpsc::unbounded_channel();
    let pool = Arc::new(SlotPool::new(&common.buffer_dir, slot_tx));

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| BridgeError::Internal(e.to_string()))?;

    let log_file = None;
    let log_limit_mb = global.log_limit_mb;

    let registry = Registry::new(
        Arc::clone(&pool),
        net.clone(),
        client,
        host,
        events,
        global,
        common,
        store,
        autosave,
    );

    Ok(BootstrappedServices {
        cancel: registry.cancel.clone(),
        registry,
        pool,
        net,
        slot_events: Mutex::new(Some(slot_rx)),
        log_file,
        log_limit_mb,
    })
}

impl BootstrappedServices {
    /// Registers the log file for size-bounded rotation.
    pub fn set_log_file(&mut self, path: PathBuf) {
        self.log_file = Some(path);
    }

    /// Starts the origin, the discovery loop, the slot-event forwarder
    /// and (when configured) log rotation.
    pub fn start_background_tasks(&self) {
        let state = AppState {
            pool: Arc::clone(&self.pool),
            registry: Arc::clone(&self.registry),
        };
        let net = self.net.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(state, net, cancel).await {
                log::error!("[Origin] server error: {}", e);
            }
        });

        tokio::spawn(Arc::clone(&self.registry).discovery_loop());

        if let Some(mut rx) = self.slot_events.lock().take() {
            let registry = Arc::clone(&self.registry);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = rx.recv() => {
                            let Some(event) = event else { break };
                            let index = match &event {
                                SlotEvent::EndOfTrack { device, .. }
                                | SlotEvent::Underrun { device, .. } => *device,
                            };
                            if let Some(device) = registry.device(index) {
                                device.on_slot_event(&event);
                            }
                        }
                    }
                }
            });
        }

        if let (Some(path), limit) = (self.log_file.clone(), self.log_limit_mb) {
            if limit > 0 {
                let cancel = self.cancel.clone();
                let limit_bytes = limit as u64 * 1024 * 1024;
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(LOG_CHECK_SECS)) => {}
                        }
                        if let Err(e) = rotate_log(&path, limit_bytes) {
                            log::warn!("[Main] log rotation failed: {}", e);
                        }
                    }
                });
            }
        }
    }

    /// Graceful shutdown. A non-graceful exit skips this entirely.
    pub async fn shutdown(&self) {
        log::info!("[Main] stopping renderers ...");
        self.registry.shutdown().await;
        self.cancel.cancel();
        log::info!("[Main] all done");
    }
}

/// Halves the log file in place once it exceeds the size limit, keeping
/// the most recent half.
pub fn rotate_log(path: &std::path::Path, limit_bytes: u64) -> std::io::Result<()> {
    let size = std::fs::metadata(path)?.len();
    if size <= limit_bytes {
        return Ok(());
    }
    log::debug!("[Main] resizing log ({} bytes)", size);

    let content = std::fs::read(path)?;
    let keep_from = content.len() / 2;
    // cut at a line boundary so the head of the kept half stays readable
    let keep_from = content[keep_from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| keep_from + p + 1)
        .unwrap_or(keep_from);

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.write_all(&content[keep_from..])?;
    file.set_len((content.len() - keep_from) as u64)?;
    Ok(())
}

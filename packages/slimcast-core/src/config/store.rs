//! Persistent XML configuration store.
//!
//! Document shape: root `squeeze2upnp` with global keys as direct children,
//! one `common` child holding device defaults, and zero or more `device`
//! children keyed by `udn`.
//!
//! Save is a merge, not a rewrite: with `full = false` the previously
//! loaded document is reused so unknown elements survive untouched,
//! currently-live devices are rewritten, and `device` entries for offline
//! players are re-appended as-is. The store therefore keeps the raw
//! document tree (`xmltree`) rather than a typed model.
//!
//! Migration: the legacy `upnp_socket` key is read as `binding`.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use xmltree::{Element, XMLNode};

use crate::config::{
    parse_bool, DeviceConfig, FlacHeaderMode, GlobalConfig, L24Format, LogLevel, VolumeOnPlay,
};
use crate::error::{BridgeError, BridgeResult};
use crate::utils::{format_mac, parse_mac};

const ROOT_TAG: &str = "squeeze2upnp";

/// Runtime values of one live device written back on save.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub udn: String,
    pub mac: [u8; 6],
    pub friendly_name: String,
    /// Player name (LMS may have renamed the player at runtime).
    pub name: String,
    /// LMS address override; `?` means unset and is not persisted.
    pub server: String,
    pub enabled: bool,
}

/// The configuration store: path plus the last loaded document.
pub struct ConfigStore {
    path: PathBuf,
    doc: Option<Element>,
}

impl ConfigStore {
    /// Loads the document at `path` and applies recognized keys.
    ///
    /// A missing or unparsable file logs an error and yields defaults; the
    /// bridge runs on and will not save until asked to (spec: config load
    /// failure is not fatal).
    pub fn load(path: &Path) -> (Self, GlobalConfig, DeviceConfig) {
        let mut global = GlobalConfig::default();
        let mut common = DeviceConfig::default();

        let doc = match std::fs::File::open(path) {
            Ok(file) => match Element::parse(file) {
                Ok(root) if root.name == ROOT_TAG => Some(root),
                Ok(root) => {
                    log::error!(
                        "[Config] {} has unexpected root <{}>, using defaults",
                        path.display(),
                        root.name
                    );
                    None
                }
                Err(e) => {
                    log::error!("[Config] cannot parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::error!("[Config] cannot open {}: {}", path.display(), e);
                None
            }
        };

        if let Some(root) = &doc {
            for child in element_children(root) {
                if let Some(value) = text_of(child) {
                    apply_global_key(&mut global, &child.name, &value);
                }
            }
            if let Some(common_el) = root.get_child("common") {
                for child in element_children(common_el) {
                    if let Some(value) = text_of(child) {
                        apply_device_key(&mut common, &child.name, &value);
                    }
                }
            }
        }

        global.normalize_scan_timing();
        (Self { path: path.to_path_buf(), doc }, global, common)
    }

    /// Creates an empty store for a path with no config file yet.
    #[must_use]
    pub fn empty(path: &Path) -> Self {
        Self { path: path.to_path_buf(), doc: None }
    }

    /// Applies the `device` entry for `udn` over a config (already seeded
    /// from the common defaults). Returns the persisted MAC, when present.
    pub fn load_device(&self, udn: &str, config: &mut DeviceConfig) -> Option<[u8; 6]> {
        let device = self.find_device(udn)?;
        let mut mac = None;
        for child in element_children(device) {
            if let Some(value) = text_of(child) {
                if child.name == "mac" {
                    mac = parse_mac(&value);
                }
                apply_device_key(config, &child.name, &value);
            }
        }
        mac
    }

    fn find_device(&self, udn: &str) -> Option<&Element> {
        let root = self.doc.as_ref()?;
        element_children(root)
            .filter(|e| e.name == "device")
            .find(|e| device_udn(e).as_deref() == Some(udn))
    }

    /// Writes the configuration to the given path.
    ///
    /// With `full = false` the previously loaded document is merged over:
    /// unknown fields and offline devices are preserved. With `full = true`
    /// a fresh document is generated.
    pub fn save(
        &self,
        path: &Path,
        global: &GlobalConfig,
        common: &DeviceConfig,
        devices: &[DeviceSnapshot],
    ) -> BridgeResult<()> {
        self.save_merged(path, global, common, devices, false)
    }

    /// See [`ConfigStore::save`]; `full` selects a from-scratch rewrite.
    pub fn save_merged(
        &self,
        path: &Path,
        global: &GlobalConfig,
        common: &DeviceConfig,
        devices: &[DeviceSnapshot],
        full: bool,
    ) -> BridgeResult<()> {
        let mut root = match (&self.doc, full) {
            (Some(old), false) => old.clone(),
            _ => Element::new(ROOT_TAG),
        };

        // old device entries, removed from the tree and re-appended below
        // for those not currently live
        let old_devices = take_devices(&mut root);

        write_global_keys(&mut root, global);

        {
            // write the common block in place to preserve its unknown keys
            if root.get_child("common").is_none() {
                root.children.push(XMLNode::Element(Element::new("common")));
            }
            let common_el = root
                .get_mut_child("common")
                .expect("common element just ensured");
            write_device_keys(common_el, common);
        }

        for snapshot in devices {
            let mut node = old_devices
                .iter()
                .find(|d| device_udn(d).as_deref() == Some(snapshot.udn.as_str()))
                .cloned()
                .unwrap_or_else(|| {
                    let mut el = Element::new("device");
                    update_child(&mut el, "udn", &snapshot.udn);
                    update_child(&mut el, "mac", &format_mac(&snapshot.mac, ':'));
                    update_child(&mut el, "enabled", if snapshot.enabled { "1" } else { "0" });
                    el
                });

            // runtime values always refresh, everything else is preserved
            update_child(&mut node, "name", &snapshot.name);
            update_child(&mut node, "friendly_name", &snapshot.friendly_name);
            if !snapshot.server.contains('?') {
                update_child(&mut node, "server", &snapshot.server);
            }
            root.children.push(XMLNode::Element(node));
        }

        for old in old_devices {
            let udn = device_udn(&old);
            let live = udn
                .as_deref()
                .map(|u| devices.iter().any(|d| d.udn == u))
                .unwrap_or(false);
            if !live {
                root.children.push(XMLNode::Element(old));
            }
        }

        let mut out = Vec::new();
        root.write(&mut out)
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;
        let mut file = std::fs::File::create(path)
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;
        file.write_all(&out)
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;

        log::info!("[Config] saved {} ({} live devices)", path.display(), devices.len());
        Ok(())
    }

    /// The path the store was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree helpers
// ─────────────────────────────────────────────────────────────────────────────

fn element_children(el: &Element) -> impl Iterator<Item = &Element> {
    el.children.iter().filter_map(|n| match n {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

fn text_of(el: &Element) -> Option<String> {
    el.get_text().map(|t| t.trim().to_string())
}

fn device_udn(device: &Element) -> Option<String> {
    device.get_child("udn").and_then(text_of)
}

/// Detaches every `device` child from the root, preserving order.
fn take_devices(root: &mut Element) -> Vec<Element> {
    let mut devices = Vec::new();
    root.children.retain_mut(|node| match node {
        XMLNode::Element(e) if e.name == "device" => {
            devices.push(std::mem::replace(e, Element::new("device")));
            false
        }
        _ => true,
    });
    devices
}

/// Sets the text of the named child, creating it when absent.
fn update_child(parent: &mut Element, name: &str, value: &str) {
    if let Some(child) = parent.get_mut_child(name) {
        child.children = vec![XMLNode::Text(value.to_string())];
    } else {
        let mut el = Element::new(name);
        el.children.push(XMLNode::Text(value.to_string()));
        parent.children.push(XMLNode::Element(el));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recognized keys
// ─────────────────────────────────────────────────────────────────────────────

fn apply_global_key(global: &mut GlobalConfig, name: &str, value: &str) {
    match name {
        // legacy name kept readable
        "binding" | "upnp_socket" => global.binding = value.to_string(),
        "custom_discovery" => {
            global.custom_discovery = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        }
        "slimproto_log" => global.log.slimproto = LogLevel::parse(value),
        "stream_log" => global.log.stream = LogLevel::parse(value),
        "decode_log" => global.log.decode = LogLevel::parse(value),
        "output_log" => global.log.output = LogLevel::parse(value),
        "main_log" => global.log.main = LogLevel::parse(value),
        "upnp_log" => global.log.upnp = LogLevel::parse(value),
        "util_log" => global.log.util = LogLevel::parse(value),
        "slimmain_log" => global.log.slimmain = LogLevel::parse(value),
        "log_limit" => global.log_limit_mb = value.parse().unwrap_or(-1),
        "scan_interval" => global.scan_interval_secs = value.parse().unwrap_or(global.scan_interval_secs),
        "scan_timeout" => global.scan_timeout_secs = value.parse().unwrap_or(global.scan_timeout_secs),
        _ => {} // unknown keys pass through on save
    }
}

fn apply_device_key(config: &mut DeviceConfig, name: &str, value: &str) {
    match name {
        "enabled" => config.enabled = parse_bool(value),
        "name" => config.name = value.to_string(),
        "server" => config.server = value.to_string(),
        "coverart" => config.coverart = value.to_string(),
        "remove_timeout" => config.remove_timeout = value.parse().unwrap_or(config.remove_timeout),
        "streambuf_size" => config.streambuf_size = value.parse().unwrap_or(config.streambuf_size),
        "output_size" => config.output_size = value.parse().unwrap_or(config.output_size),
        "stream_length" => config.stream_length = value.parse().unwrap_or(config.stream_length),
        "buffer_limit" => config.buffer_limit = value.parse().unwrap_or(config.buffer_limit),
        "buffer_dir" => config.buffer_dir = value.to_string(),
        "max_read_wait" => config.max_read_wait = value.parse().unwrap_or(config.max_read_wait),
        "max_GET_bytes" => config.max_get_bytes = value.parse().unwrap_or(config.max_get_bytes),
        "keep_buffer_file" => config.keep_buffer_file = parse_bool(value),
        "codecs" => config.codecs = value.to_string(),
        "sample_rate" => config.sample_rate = value.parse().unwrap_or(config.sample_rate),
        "L24_format" => config.l24_format = L24Format::from_config(value),
        "flac_header" => config.flac_header = FlacHeaderMode::from_config(value),
        "raw_audio_format" => config.raw_audio_format = value.to_string(),
        "match_endianness" => config.match_endianness = parse_bool(value),
        "allow_flac" => config.allow_flac = parse_bool(value),
        "accept_nexturi" => config.accept_nexturi = parse_bool(value),
        "next_delay" => config.next_delay = value.parse().unwrap_or(config.next_delay),
        "seek_after_pause" => config.seek_after_pause = parse_bool(value),
        "byte_seek" => config.byte_seek = parse_bool(value),
        "live_pause" => config.live_pause = parse_bool(value),
        "send_icy" => config.send_icy = parse_bool(value),
        "send_metadata" => config.send_metadata = parse_bool(value),
        "send_coverart" => config.send_coverart = parse_bool(value),
        "volume_on_play" => config.volume_on_play = VolumeOnPlay::from_config(value),
        "volume_feedback" => config.volume_feedback = parse_bool(value),
        "max_volume" => config.max_volume = value.parse().unwrap_or(config.max_volume),
        "pause_volume" => config.pause_volume = parse_bool(value),
        "auto_play" => config.auto_play = parse_bool(value),
        "forced_mimetypes" => config.forced_mimetypes = value.to_string(),
        "roon_mode" => config.roon_mode = parse_bool(value),
        // `udn`, `mac`, `friendly_name` are identity fields handled by the
        // caller; anything else passes through on save
        _ => {}
    }
}

fn write_global_keys(root: &mut Element, global: &GlobalConfig) {
    update_child(root, "binding", &global.binding);
    if !global.custom_discovery.is_empty() {
        update_child(root, "custom_discovery", &global.custom_discovery.join(","));
    }
    update_child(root, "slimproto_log", &global.log.slimproto.to_string());
    update_child(root, "stream_log", &global.log.stream.to_string());
    update_child(root, "decode_log", &global.log.decode.to_string());
    update_child(root, "output_log", &global.log.output.to_string());
    update_child(root, "main_log", &global.log.main.to_string());
    update_child(root, "upnp_log", &global.log.upnp.to_string());
    update_child(root, "util_log", &global.log.util.to_string());
    update_child(root, "slimmain_log", &global.log.slimmain.to_string());
    update_child(root, "log_limit", &global.log_limit_mb.to_string());
    update_child(root, "scan_interval", &global.scan_interval_secs.to_string());
    update_child(root, "scan_timeout", &global.scan_timeout_secs.to_string());
    // the legacy spelling is never written back
    if let Some(pos) = root.children.iter().position(
        |n| matches!(n, XMLNode::Element(e) if e.name == "upnp_socket"),
    ) {
        root.children.remove(pos);
    }
}

fn write_device_keys(el: &mut Element, config: &DeviceConfig) {
    update_child(el, "enabled", if config.enabled { "1" } else { "0" });
    update_child(el, "name", &config.name);
    update_child(el, "server", &config.server);
    update_child(el, "coverart", &config.coverart);
    update_child(el, "remove_timeout", &config.remove_timeout.to_string());
    update_child(el, "streambuf_size", &config.streambuf_size.to_string());
    update_child(el, "output_size", &config.output_size.to_string());
    update_child(el, "stream_length", &config.stream_length.to_string());
    update_child(el, "buffer_limit", &config.buffer_limit.to_string());
    update_child(el, "buffer_dir", &config.buffer_dir);
    update_child(el, "max_read_wait", &config.max_read_wait.to_string());
    update_child(el, "max_GET_bytes", &config.max_get_bytes.to_string());
    update_child(el, "keep_buffer_file", if config.keep_buffer_file { "1" } else { "0" });
    update_child(el, "codecs", &config.codecs);
    update_child(el, "sample_rate", &config.sample_rate.to_string());
    update_child(el, "L24_format", config.l24_format.to_config());
    update_child(el, "flac_header", config.flac_header.to_config());
    update_child(el, "raw_audio_format", &config.raw_audio_format);
    update_child(el, "match_endianness", if config.match_endianness { "1" } else { "0" });
    update_child(el, "allow_flac", if config.allow_flac { "1" } else { "0" });
    update_child(el, "accept_nexturi", if config.accept_nexturi { "1" } else { "0" });
    update_child(el, "next_delay", &config.next_delay.to_string());
    update_child(el, "seek_after_pause", if config.seek_after_pause { "1" } else { "0" });
    update_child(el, "byte_seek", if config.byte_seek { "1" } else { "0" });
    update_child(el, "live_pause", if config.live_pause { "1" } else { "0" });
    update_child(el, "send_icy", if config.send_icy { "1" } else { "0" });
    update_child(el, "send_metadata", if config.send_metadata { "1" } else { "0" });
    update_child(el, "send_coverart", if config.send_coverart { "1" } else { "0" });
    update_child(el, "volume_on_play", config.volume_on_play.to_config());
    update_child(el, "volume_feedback", if config.volume_feedback { "1" } else { "0" });
    update_child(el, "max_volume", &config.max_volume.to_string());
    update_child(el, "pause_volume", if config.pause_volume { "1" } else { "0" });
    update_child(el, "auto_play", if config.auto_play { "1" } else { "0" });
    update_child(el, "forced_mimetypes", &config.forced_mimetypes);
    update_child(el, "roon_mode", if config.roon_mode { "1" } else { "0" });
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<squeeze2upnp>
  <upnp_socket>192.168.1.2:49152</upnp_socket>
  <scan_interval>60</scan_interval>
  <scan_timeout>20</scan_timeout>
  <main_log>debug</main_log>
  <mystery_key>keep me</mystery_key>
  <common>
    <enabled>1</enabled>
    <codecs>flc,mp3</codecs>
    <volume_on_play>1</volume_on_play>
    <accept_nexturi>1</accept_nexturi>
    <custom_common_key>opaque</custom_common_key>
  </common>
  <device>
    <udn>uuid:live-device</udn>
    <mac>00:04:20:11:22:33</mac>
    <name>Old Name</name>
    <friendly_name>Old Friendly</friendly_name>
    <max_volume>30</max_volume>
    <foo>bar</foo>
  </device>
  <device>
    <udn>uuid:offline-device</udn>
    <mac>00:04:20:44:55:66</mac>
    <name>Bedroom</name>
    <friendly_name>Bedroom Radio</friendly_name>
    <foo>survives</foo>
  </device>
</squeeze2upnp>"#;

    fn store_from(xml: &str, dir: &std::path::Path) -> (ConfigStore, GlobalConfig, DeviceConfig) {
        let path = dir.join("config.xml");
        std::fs::write(&path, xml).unwrap();
        ConfigStore::load(&path)
    }

    #[test]
    fn load_applies_global_and_common_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, global, common) = store_from(SAMPLE, dir.path());

        // migrated legacy key
        assert_eq!(global.binding, "192.168.1.2:49152");
        assert_eq!(global.scan_interval_secs, 60);
        assert_eq!(global.scan_timeout_secs, 20);
        assert_eq!(global.log.main, LogLevel::Debug);

        assert_eq!(common.codecs, "flc,mp3");
        assert_eq!(common.volume_on_play, VolumeOnPlay::PlayOnly);
        assert!(common.accept_nexturi);
    }

    #[test]
    fn load_device_overrides_common() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _global, common) = store_from(SAMPLE, dir.path());

        let mut config = common.clone();
        let mac = store.load_device("uuid:live-device", &mut config);
        assert_eq!(mac, Some([0x00, 0x04, 0x20, 0x11, 0x22, 0x33]));
        assert_eq!(config.max_volume, 30);
        assert_eq!(config.name, "Old Name");
        // untouched keys keep the common values
        assert_eq!(config.codecs, "flc,mp3");

        assert!(store.load_device("uuid:unknown", &mut config.clone()).is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (store, global, common) = ConfigStore::load(&dir.path().join("absent.xml"));
        assert!(store.doc.is_none());
        assert_eq!(global.scan_interval_secs, 30);
        assert_eq!(common.max_volume, 100);
    }

    #[test]
    fn merge_save_preserves_unknown_fields_and_offline_devices() {
        // Scenario: live device X updated, offline device Y and its <foo>
        // preserved, unknown root/common keys preserved.
        let dir = tempfile::tempdir().unwrap();
        let (store, global, common) = store_from(SAMPLE, dir.path());

        let live = DeviceSnapshot {
            udn: "uuid:live-device".into(),
            mac: [0x00, 0x04, 0x20, 0x11, 0x22, 0x33],
            friendly_name: "New Friendly".into(),
            name: "New Name".into(),
            server: "192.168.1.9:3483".into(),
            enabled: true,
        };

        let out = dir.path().join("saved.xml");
        store.save(&out, &global, &common, &[live]).unwrap();

        let (store2, global2, common2) = ConfigStore::load(&out);
        assert_eq!(global2.binding, "192.168.1.2:49152");

        // unknown root and common keys survive
        let root = store2.doc.as_ref().unwrap();
        assert_eq!(
            root.get_child("mystery_key").and_then(text_of).as_deref(),
            Some("keep me")
        );
        assert_eq!(
            root.get_child("common")
                .and_then(|c| c.get_child("custom_common_key"))
                .and_then(text_of)
                .as_deref(),
            Some("opaque")
        );

        // live device rewritten with runtime values, unknown key intact
        let mut live_cfg = common2.clone();
        store2.load_device("uuid:live-device", &mut live_cfg);
        assert_eq!(live_cfg.name, "New Name");
        assert_eq!(live_cfg.server, "192.168.1.9:3483");
        let live_el = store2.find_device("uuid:live-device").unwrap();
        assert_eq!(live_el.get_child("foo").and_then(text_of).as_deref(), Some("bar"));
        assert_eq!(
            live_el.get_child("friendly_name").and_then(text_of).as_deref(),
            Some("New Friendly")
        );

        // offline device intact, including its unknown key
        let offline = store2.find_device("uuid:offline-device").unwrap();
        assert_eq!(offline.get_child("foo").and_then(text_of).as_deref(), Some("survives"));
        assert_eq!(offline.get_child("name").and_then(text_of).as_deref(), Some("Bedroom"));
    }

    #[test]
    fn save_load_round_trip_is_idempotent_on_known_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut global, mut common) = store_from(SAMPLE, dir.path());
        global.log.upnp = LogLevel::Sdebug;
        common.max_volume = 75;
        common.byte_seek = true;

        let out = dir.path().join("round.xml");
        store.save(&out, &global, &common, &[]).unwrap();
        let (store2, global2, common2) = ConfigStore::load(&out);

        assert_eq!(global2.binding, global.binding);
        assert_eq!(global2.log.upnp, LogLevel::Sdebug);
        assert_eq!(global2.scan_interval_secs, global.scan_interval_secs);
        assert_eq!(common2.max_volume, 75);
        assert!(common2.byte_seek);
        assert_eq!(common2.codecs, common.codecs);

        // saving again changes nothing semantically
        let out2 = dir.path().join("round2.xml");
        store2.save(&out2, &global2, &common2, &[]).unwrap();
        let (_store3, global3, common3) = ConfigStore::load(&out2);
        assert_eq!(global3.binding, global2.binding);
        assert_eq!(common3.max_volume, common2.max_volume);
    }

    #[test]
    fn legacy_key_is_not_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let (store, global, common) = store_from(SAMPLE, dir.path());
        let out = dir.path().join("migrated.xml");
        store.save(&out, &global, &common, &[]).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(!text.contains("upnp_socket"));
        assert!(text.contains("<binding>192.168.1.2:49152</binding>"));
    }

    #[test]
    fn full_save_generates_fresh_document() {
        let dir = tempfile::tempdir().unwrap();
        let (store, global, common) = store_from(SAMPLE, dir.path());

        let live = DeviceSnapshot {
            udn: "uuid:new".into(),
            mac: [1, 2, 3, 4, 5, 6],
            friendly_name: "Fresh".into(),
            name: "Fresh".into(),
            server: "?".into(),
            enabled: true,
        };
        let out = dir.path().join("full.xml");
        store.save_merged(&out, &global, &common, &[live], true).unwrap();

        let (store2, _g, _c) = ConfigStore::load(&out);
        // fresh document: old devices and unknown keys gone
        assert!(store2.find_device("uuid:offline-device").is_none());
        assert!(store2.doc.as_ref().unwrap().get_child("mystery_key").is_none());
        let new_dev = store2.find_device("uuid:new").unwrap();
        assert_eq!(new_dev.get_child("mac").and_then(text_of).as_deref(), Some("01:02:03:04:05:06"));
        // `?` server is not persisted
        assert!(new_dev.get_child("server").is_none());
    }
}

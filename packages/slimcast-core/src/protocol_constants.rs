//! Fixed protocol constants that should NOT be changed.
//!
//! These values come from external specifications (UPnP, DLNA, the LMS
//! volume model) or from renderer interop constraints; changing them would
//! break protocol compliance or field-tested timing.

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// UPnP device class searched for during discovery.
pub const MEDIA_RENDERER: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// Default interval between discovery scans (seconds).
pub const SCAN_INTERVAL_SECS: u32 = 30;

/// Default duration of one multicast search (seconds).
pub const SCAN_TIMEOUT_SECS: u32 = 15;

/// Pad kept between a search window and the next scan. `scan_interval` is
/// floored at `scan_timeout + SCAN_PAD_SECS` so searches never overlap.
pub const SCAN_PAD_SECS: u32 = 15;

/// Fixed upper bound of the device table. Slot indices are stable for the
/// lifetime of a device and are not reused until teardown completes.
pub const MAX_RENDERERS: usize = 32;

/// Manufacturers skipped during discovery (substring match). LMS players
/// must not be re-bridged onto themselves.
pub const EXCLUDED_MANUFACTURERS: &[&str] = &["Logitech"];

// ─────────────────────────────────────────────────────────────────────────────
// Bridge loop timing
// ─────────────────────────────────────────────────────────────────────────────

/// Bridge loop tick, and `GetTransportInfo` poll period (ms). Transport
/// eventing is unreliable on many renderers; polling is authoritative.
pub const STATE_POLL_MS: u64 = 500;

/// `GetPositionInfo` poll period while playing (ms).
pub const TRACK_POLL_MS: u64 = 1000;

/// `GetVolume` keep-alive period (ms).
pub const VOLUME_POLL_MS: u64 = 10_000;

/// Consecutive RPC failures after which a device is quiesced until the
/// next discovery refresh.
pub const MAX_ACTION_ERRORS: u32 = 5;

/// How long bring-up waits for the `GetProtocolInfo` response before
/// giving up on capability filtering (ms), polled every
/// [`PROTOCOL_CAP_POLL_MS`].
pub const PROTOCOL_CAP_WAIT_MS: u64 = 500;
pub const PROTOCOL_CAP_POLL_MS: u64 = 10;

/// Maximum number of sink protocolInfo entries kept per renderer.
pub const MAX_PROTO: usize = 128;

// ─────────────────────────────────────────────────────────────────────────────
// GENA (UPnP eventing)
// ─────────────────────────────────────────────────────────────────────────────

/// Subscription timeout requested for RenderingControl events (seconds).
/// AVTransport and ConnectionManager use 0, meaning no subscription.
pub const RENDERING_SUB_TIMEOUT_SECS: u32 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP origin
// ─────────────────────────────────────────────────────────────────────────────

/// Virtual directory the renderers pull audio from.
pub const STREAM_VDIR: &str = "LMS2UPNP";

/// Poll step while the origin waits for the write side to produce data (ms).
pub const READ_POLL_MS: u64 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// SOAP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for SOAP HTTP requests (seconds). LAN operations only.
pub const SOAP_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Volume model
// ─────────────────────────────────────────────────────────────────────────────

/// LMS gain value per percent step. LMS volume commands arrive in this
/// curve's codomain (0..=128); the inverse scan maps them back to a
/// percentage before scaling by the device `max_volume`.
pub const LMS_VOLUME_MAP: [u8; 101] = [
    0, 1, 1, 1, 2, 2, 2, 3, 3, 4, //
    5, 5, 6, 6, 7, 8, 9, 9, 10, 11, //
    12, 13, 14, 15, 16, 16, 17, 18, 19, 20, //
    22, 23, 24, 25, 26, 27, 28, 29, 30, 32, //
    33, 34, 35, 37, 38, 39, 40, 42, 43, 44, //
    46, 47, 48, 50, 51, 53, 54, 56, 57, 59, //
    60, 61, 63, 65, 66, 68, 69, 71, 72, 74, //
    75, 77, 79, 80, 82, 84, 85, 87, 89, 90, //
    92, 94, 96, 97, 99, 101, 103, 104, 106, 108, //
    110, 112, 113, 115, 117, 119, 121, 123, 125, 127, 128,
];

/// Application name, used in log banners.
pub const APP_NAME: &str = "slimcast";

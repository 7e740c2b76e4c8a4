//! slimcast core - bridges DLNA/UPnP media renderers onto LMS as native
//! players.
//!
//! For every renderer found by multicast search, the bridge reserves a
//! virtual LMS player, translates player commands into AVTransport /
//! RenderingControl actions, serves the audio LMS streams through an
//! embedded HTTP origin the renderer pulls from, and feeds renderer-side
//! state changes (transport, position, volume) back to LMS.
//!
//! # Architecture
//!
//! - [`registry`]: device table, discovery loop, add/refresh/evict
//! - [`bridge`]: per-renderer state machine, RPC sequencing, polling loop
//! - [`upnp`]: SSDP, description parsing, SOAP, GENA, DIDL, protocolInfo
//! - [`stream`]: virtual output buffers and container-header injection
//! - [`api`]: the embedded origin (stream pull + GENA callback)
//! - [`config`]: typed configuration over a pass-through XML store
//! - [`bootstrap`]: wiring and shutdown ordering
//!
//! The slim-wire client itself is an external collaborator: it implements
//! [`PlayerHost`]/[`PlayerEvents`] and drives the command surface on
//! [`Renderer`](bridge::Renderer).

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod protocol_constants;
pub mod registry;
pub mod stream;
pub mod upnp;
pub mod utils;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, ServerError};
pub use bootstrap::{bootstrap_services, network_from_binding, BootstrappedServices};
pub use bridge::{
    PlayerEvent, PlayerEvents, PlayerHandle, PlayerHost, Renderer, RendererIdentity,
    TransportState,
};
pub use config::{ConfigStore, DeviceConfig, GlobalConfig, LogLevel};
pub use context::{IpDetector, LocalIpDetector, NetworkContext, UrlBuilder};
pub use error::{BridgeError, BridgeResult, ErrorCode};
pub use registry::Registry;
pub use stream::{SlotPool, SlotReader, SlotWriter, StreamFormat, StreamSlot, TrackMetadata};
pub use utils::now_millis;

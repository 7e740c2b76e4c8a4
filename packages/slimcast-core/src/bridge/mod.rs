//! The per-renderer bridge: device records, RPC sequencing, the transport
//! state machine, the polling loop, and the LMS-facing interfaces.

pub mod device;
pub mod player;
pub mod poller;
pub mod queue;
pub mod state;
pub mod volume;

pub use device::{Renderer, RendererIdentity};
pub use player::{PlayerEvent, PlayerEvents, PlayerHandle, PlayerHost};
pub use state::{Intent, RendererState, TransportState};

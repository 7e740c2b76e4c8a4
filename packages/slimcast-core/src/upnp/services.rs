//! UPnP service definitions.
//!
//! Single source of truth for the three service roles the bridge drives on
//! every renderer, their URNs, and their subscription policy. Unlike fixed
//! topologies, generic renderers publish per-device control and event URLs
//! in their description document, so endpoints live in [`ServiceEndpoint`]
//! rather than here.

use serde::Serialize;

/// The service roles used for control and event subscriptions.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceKind {
    /// Transport control (SetAVTransportURI, Play, Pause, Stop, Seek...).
    AvTransport,
    /// Volume and mute control.
    RenderingControl,
    /// Sink capability discovery (GetProtocolInfo).
    ConnectionManager,
}

/// All service roles, in device-table index order.
pub const ALL_SERVICES: [ServiceKind; 3] = [
    ServiceKind::AvTransport,
    ServiceKind::RenderingControl,
    ServiceKind::ConnectionManager,
];

impl ServiceKind {
    /// Returns the UPnP service URN for SOAP requests and description lookup.
    #[must_use]
    pub fn urn(&self) -> &'static str {
        match self {
            Self::AvTransport => "urn:schemas-upnp-org:service:AVTransport:1",
            Self::RenderingControl => "urn:schemas-upnp-org:service:RenderingControl:1",
            Self::ConnectionManager => "urn:schemas-upnp-org:service:ConnectionManager:1",
        }
    }

    /// Returns the GENA subscription timeout for this role (seconds).
    ///
    /// 0 means the role is never subscribed: transport events are unreliable
    /// on too many renderers to be trusted (polling is authoritative), and
    /// ConnectionManager has nothing to event.
    #[must_use]
    pub fn subscription_timeout(&self) -> u32 {
        match self {
            Self::RenderingControl => crate::protocol_constants::RENDERING_SUB_TIMEOUT_SECS,
            Self::AvTransport | Self::ConnectionManager => 0,
        }
    }

    /// Returns a human-readable name for this service.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AvTransport => "AVTransport",
            Self::RenderingControl => "RenderingControl",
            Self::ConnectionManager => "ConnectionManager",
        }
    }
}

/// Per-device endpoints of one service, read from the description document.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoint {
    /// Service ID as published by the device.
    pub id: String,
    /// Full service type string as published (may carry a higher version).
    pub service_type: String,
    /// Absolute control URL.
    pub control_url: String,
    /// Absolute event-subscription URL.
    pub event_url: String,
    /// Current subscription ID, when subscribed.
    pub sid: Option<String>,
    /// Remaining subscription timeout granted by the device (seconds).
    pub timeout_secs: u32,
}

impl ServiceEndpoint {
    /// True when the description document carried this service.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.control_url.is_empty()
    }
}

/// The three service endpoints of a renderer, indexed by role.
#[derive(Debug, Clone, Default)]
pub struct ServiceSet {
    avt: ServiceEndpoint,
    rendering: ServiceEndpoint,
    connection: ServiceEndpoint,
}

impl ServiceSet {
    /// Returns the endpoint for a role.
    #[must_use]
    pub fn get(&self, kind: ServiceKind) -> &ServiceEndpoint {
        match kind {
            ServiceKind::AvTransport => &self.avt,
            ServiceKind::RenderingControl => &self.rendering,
            ServiceKind::ConnectionManager => &self.connection,
        }
    }

    /// Returns the endpoint for a role, mutably.
    pub fn get_mut(&mut self, kind: ServiceKind) -> &mut ServiceEndpoint {
        match kind {
            ServiceKind::AvTransport => &mut self.avt,
            ServiceKind::RenderingControl => &mut self.rendering,
            ServiceKind::ConnectionManager => &mut self.connection,
        }
    }

    /// Looks a role up by subscription ID.
    #[must_use]
    pub fn by_sid(&self, sid: &str) -> Option<ServiceKind> {
        ALL_SERVICES
            .into_iter()
            .find(|kind| self.get(*kind).sid.as_deref() == Some(sid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rendering_control_subscribes() {
        assert_eq!(ServiceKind::RenderingControl.subscription_timeout(), 300);
        assert_eq!(ServiceKind::AvTransport.subscription_timeout(), 0);
        assert_eq!(ServiceKind::ConnectionManager.subscription_timeout(), 0);
    }

    #[test]
    fn service_set_lookup_by_sid() {
        let mut set = ServiceSet::default();
        set.get_mut(ServiceKind::RenderingControl).sid = Some("uuid:sub-1".into());
        assert_eq!(set.by_sid("uuid:sub-1"), Some(ServiceKind::RenderingControl));
        assert_eq!(set.by_sid("uuid:sub-2"), None);
    }
}

//! Typed action builders for the three renderer services.
//!
//! Pure constructors only: every function returns a [`SoapCall`] that the
//! device's RPC facade submits through its single-flight gate. This keeps
//! action construction usable under the device mutex while the network
//! side stays async.

use crate::upnp::services::ServiceKind;
use crate::upnp::soap::SoapCall;
use crate::utils::format_time_hms;

// ─────────────────────────────────────────────────────────────────────────────
// AVTransport
// ─────────────────────────────────────────────────────────────────────────────

/// `SetAVTransportURI` with the DIDL metadata for the track.
#[must_use]
pub fn set_av_transport_uri(uri: &str, didl: &str) -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "SetAVTransportURI")
        .instance_id()
        .arg("CurrentURI", uri)
        .arg("CurrentURIMetaData", didl)
}

/// `SetNextAVTransportURI` for gapless-capable renderers.
#[must_use]
pub fn set_next_av_transport_uri(uri: &str, didl: &str) -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "SetNextAVTransportURI")
        .instance_id()
        .arg("NextURI", uri)
        .arg("NextURIMetaData", didl)
}

#[must_use]
pub fn play() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "Play")
        .instance_id()
        .arg("Speed", "1")
}

#[must_use]
pub fn pause() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "Pause").instance_id()
}

#[must_use]
pub fn stop() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "Stop").instance_id()
}

#[must_use]
pub fn next() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "Next").instance_id()
}

/// `SetPlayMode(NORMAL)`, sent ahead of Play so shuffle/repeat left by a
/// control point cannot leak into bridged playback.
#[must_use]
pub fn set_play_mode() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "SetPlayMode")
        .instance_id()
        .arg("NewPlayMode", "NORMAL")
}

/// `Seek` to an absolute track position (ms rounded to whole seconds).
#[must_use]
pub fn seek(position_ms: u32) -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "Seek")
        .instance_id()
        .arg("Unit", "REL_TIME")
        .arg("Target", format_time_hms(position_ms))
}

#[must_use]
pub fn get_position_info() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "GetPositionInfo").instance_id()
}

#[must_use]
pub fn get_transport_info() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "GetTransportInfo").instance_id()
}

#[must_use]
pub fn get_media_info() -> SoapCall {
    SoapCall::new(ServiceKind::AvTransport, "GetMediaInfo").instance_id()
}

// ─────────────────────────────────────────────────────────────────────────────
// RenderingControl
// ─────────────────────────────────────────────────────────────────────────────

#[must_use]
pub fn set_volume(volume: u32) -> SoapCall {
    SoapCall::new(ServiceKind::RenderingControl, "SetVolume")
        .instance_id()
        .arg("Channel", "Master")
        .arg("DesiredVolume", volume.to_string())
}

#[must_use]
pub fn set_mute(mute: bool) -> SoapCall {
    SoapCall::new(ServiceKind::RenderingControl, "SetMute")
        .instance_id()
        .arg("Channel", "Master")
        .arg("DesiredMute", if mute { "1" } else { "0" })
}

#[must_use]
pub fn get_volume() -> SoapCall {
    SoapCall::new(ServiceKind::RenderingControl, "GetVolume")
        .instance_id()
        .arg("Channel", "Master")
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionManager
// ─────────────────────────────────────────────────────────────────────────────

#[must_use]
pub fn get_protocol_info() -> SoapCall {
    SoapCall::new(ServiceKind::ConnectionManager, "GetProtocolInfo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_carries_speed_one() {
        let call = play();
        assert_eq!(call.kind, ServiceKind::AvTransport);
        assert_eq!(call.action, "Play");
        assert_eq!(call.args, vec![("InstanceID", "0".into()), ("Speed", "1".into())]);
    }

    #[test]
    fn seek_target_is_hms() {
        let call = seek(65_400);
        assert_eq!(call.action, "Seek");
        assert_eq!(call.args[1], ("Unit", "REL_TIME".into()));
        assert_eq!(call.args[2], ("Target", "0:01:05".into()));
    }

    #[test]
    fn set_volume_targets_master_channel() {
        let call = set_volume(37);
        assert_eq!(call.kind, ServiceKind::RenderingControl);
        assert_eq!(
            call.args,
            vec![
                ("InstanceID", "0".into()),
                ("Channel", "Master".into()),
                ("DesiredVolume", "37".into()),
            ]
        );
    }

    #[test]
    fn get_protocol_info_has_no_instance_id() {
        let call = get_protocol_info();
        assert_eq!(call.kind, ServiceKind::ConnectionManager);
        assert!(call.args.is_empty());
    }
}

//! DIDL-Lite metadata synthesis.
//!
//! Builds the `CurrentURIMetaData` / `NextURIMetaData` document renderers
//! use to display track information. Finite tracks are `musicTrack` items
//! with a `duration` attribute on the resource; live streams (duration 0)
//! are `audioBroadcast` items without one.

use crate::stream::TrackMetadata;
use crate::utils::{escape_xml, format_duration_didl};

/// Formats the DIDL-Lite document for one track.
///
/// # Arguments
/// * `uri` - The stream URL the renderer will pull
/// * `protocol_info` - Full four-field protocolInfo with DLNA options
/// * `metadata` - Track metadata snapshot
/// * `send_metadata` - When false, only the class and resource are emitted
///   (some renderers mis-render long titles or refuse foreign artwork)
#[must_use]
pub fn format_didl(
    uri: &str,
    protocol_info: &str,
    metadata: &TrackMetadata,
    send_metadata: bool,
) -> String {
    let mut didl = String::from(
        r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:dlna="urn:schemas-dlna-org:metadata-1-0/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">"#,
    );
    didl.push_str(r#"<item id="1" parentID="0" restricted="1">"#);

    if send_metadata {
        didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(&metadata.title)));
        didl.push_str(&format!("<dc:creator>{}</dc:creator>", escape_xml(&metadata.artist)));
        didl.push_str(&format!("<upnp:genre>{}</upnp:genre>", escape_xml(&metadata.genre)));

        if let Some(artwork) = &metadata.artwork {
            didl.push_str(&format!(
                "<upnp:albumArtURI>{}</upnp:albumArtURI>",
                escape_xml(artwork)
            ));
        }
    }

    if metadata.duration_ms > 0 {
        if send_metadata {
            didl.push_str(&format!("<upnp:artist>{}</upnp:artist>", escape_xml(&metadata.artist)));
            didl.push_str(&format!("<upnp:album>{}</upnp:album>", escape_xml(&metadata.album)));
            didl.push_str(&format!(
                "<upnp:originalTrackNumber>{}</upnp:originalTrackNumber>",
                metadata.track
            ));
        }
        didl.push_str("<upnp:class>object.item.audioItem.musicTrack</upnp:class>");
        didl.push_str(&format!(
            r#"<res duration="{}" protocolInfo="{}">{}</res>"#,
            format_duration_didl(metadata.duration_ms),
            escape_xml(protocol_info),
            escape_xml(uri)
        ));
    } else {
        if send_metadata {
            didl.push_str(&format!(
                "<upnp:channelName>{}</upnp:channelName>",
                escape_xml(&metadata.artist)
            ));
            didl.push_str(&format!("<upnp:channelNr>{}</upnp:channelNr>", metadata.track));
        }
        didl.push_str("<upnp:class>object.item.audioItem.audioBroadcast</upnp:class>");
        didl.push_str(&format!(
            r#"<res protocolInfo="{}">{}</res>"#,
            escape_xml(protocol_info),
            escape_xml(uri)
        ));
    }

    didl.push_str("</item>");
    didl.push_str("</DIDL-Lite>");

    didl
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(duration_ms: u32) -> TrackMetadata {
        TrackMetadata {
            title: "Make You Feel My Love".into(),
            artist: "Adele".into(),
            album: "19".into(),
            genre: "Pop".into(),
            artwork: Some("http://192.168.1.2:9000/cover.jpg".into()),
            track: 9,
            duration_ms,
        }
    }

    #[test]
    fn finite_track_gets_music_track_class_and_duration() {
        let didl = format_didl(
            "http://192.168.1.5:49152/LMS2UPNP/00-aa-idx-0",
            "http-get:*:audio/mpeg:DLNA.ORG_CI=0",
            &metadata(212_123),
            true,
        );
        assert!(didl.contains("object.item.audioItem.musicTrack"));
        assert!(didl.contains(r#"duration="0:03:32.123""#));
        assert!(didl.contains("<upnp:originalTrackNumber>9</upnp:originalTrackNumber>"));
        assert!(didl.contains(r#"<item id="1" parentID="0" restricted="1">"#));
    }

    #[test]
    fn zero_duration_is_a_broadcast_without_duration_attr() {
        let didl = format_didl(
            "http://192.168.1.5:49152/LMS2UPNP/00-aa-idx-0",
            "http-get:*:audio/mpeg:DLNA.ORG_CI=0",
            &metadata(0),
            true,
        );
        assert!(didl.contains("object.item.audioItem.audioBroadcast"));
        assert!(!didl.contains("duration="));
        assert!(didl.contains("<upnp:channelNr>9</upnp:channelNr>"));
    }

    #[test]
    fn metadata_suppression_keeps_class_and_res_only() {
        let didl = format_didl("http://h/u", "http-get:*:audio/flac:*", &metadata(1000), false);
        assert!(!didl.contains("dc:title"));
        assert!(!didl.contains("albumArtURI"));
        assert!(didl.contains("object.item.audioItem.musicTrack"));
        assert!(didl.contains("<res "));
    }

    #[test]
    fn special_characters_are_escaped() {
        let mut md = metadata(1000);
        md.title = "Rock & Roll <Live>".into();
        let didl = format_didl("http://h/u?a=1&b=2", "http-get:*:audio/mpeg:*", &md, true);
        assert!(didl.contains("Rock &amp; Roll &lt;Live&gt;"));
        assert!(didl.contains("http://h/u?a=1&amp;b=2"));
    }
}

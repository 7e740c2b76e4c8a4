//! GENA (UPnP eventing) client and event parsing.
//!
//! Only RenderingControl is subscribed (volume feedback); transport
//! eventing is unreliable on too many renderers, so transport state is
//! polled instead. Renewal runs on the subscription timeout with a
//! one-shot re-subscribe on failure.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::{Client, Method};
use thiserror::Error;

use crate::utils::{extract_xml_text, unescape_xml};

/// Errors that can occur during GENA operations.
#[derive(Debug, Error)]
pub enum GenaError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Device rejected the SUBSCRIBE request.
    #[error("Subscription failed with status {0}")]
    SubscriptionFailed(u16),

    /// Device rejected the renewal request.
    #[error("Renewal failed with status {0}")]
    RenewalFailed(u16),

    /// Device accepted the subscription but returned no SID.
    #[error("Subscription response missing SID header")]
    MissingSid,
}

/// Convenient Result alias for GENA operations.
pub type GenaResult<T> = Result<T, GenaError>;

/// Response from a successful GENA subscription.
pub struct SubscribeResponse {
    /// The subscription ID returned by the device.
    pub sid: String,
    /// The timeout value granted by the device (seconds).
    pub timeout_secs: u32,
}

/// HTTP client for GENA subscription operations.
///
/// This struct handles only the HTTP protocol aspects; subscription state
/// lives on the device's [`ServiceEndpoint`](crate::upnp::services::ServiceEndpoint).
pub struct GenaClient {
    client: Client,
}

impl GenaClient {
    /// Creates a new GENA client with the given HTTP client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn subscribe_method() -> Method {
        Method::from_bytes(b"SUBSCRIBE").expect("SUBSCRIBE is a valid method")
    }

    fn unsubscribe_method() -> Method {
        Method::from_bytes(b"UNSUBSCRIBE").expect("UNSUBSCRIBE is a valid method")
    }

    /// Extracts the granted timeout from a GENA response.
    ///
    /// The TIMEOUT header has the form `Second-N`. Falls back to the
    /// requested value when missing or malformed.
    fn extract_timeout_secs(response: &reqwest::Response, requested: u32) -> u32 {
        response
            .headers()
            .get("TIMEOUT")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Second-"))
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(requested)
    }

    /// Sends a SUBSCRIBE request to create a new subscription.
    ///
    /// # Arguments
    /// * `event_url` - Absolute event-subscription URL from the description
    /// * `callback_url` - URL where NOTIFY events should be sent
    /// * `timeout_secs` - Requested subscription timeout
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_secs: u32,
    ) -> GenaResult<SubscribeResponse> {
        let response = self
            .client
            .request(Self::subscribe_method(), event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::SubscriptionFailed(response.status().as_u16()));
        }

        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or(GenaError::MissingSid)?;

        let timeout_secs = Self::extract_timeout_secs(&response, timeout_secs);

        Ok(SubscribeResponse { sid, timeout_secs })
    }

    /// Sends a SUBSCRIBE request to renew an existing subscription.
    ///
    /// Returns the new timeout granted by the device.
    pub async fn renew(&self, event_url: &str, sid: &str, timeout_secs: u32) -> GenaResult<u32> {
        let response = self
            .client
            .request(Self::subscribe_method(), event_url)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{}", timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::RenewalFailed(response.status().as_u16()));
        }

        Ok(Self::extract_timeout_secs(&response, timeout_secs))
    }

    /// Sends an UNSUBSCRIBE request to cancel a subscription.
    ///
    /// Returns `true` on success; on failure the subscription should still
    /// be dropped locally.
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> bool {
        match self
            .client
            .request(Self::unsubscribe_method(), event_url)
            .header("SID", sid)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NOTIFY body parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts the Master-channel volume from a RenderingControl NOTIFY body.
///
/// The body is a propertyset whose `LastChange` property carries an
/// escaped `<Event>` document with `<Volume channel="Master" val="N"/>`
/// entries. Missing pieces yield `None`, never an error.
#[must_use]
pub fn parse_notify_volume(body: &str) -> Option<u16> {
    let last_change = extract_xml_text(body, "LastChange")?;
    parse_last_change_volume(&last_change)
}

/// Parses the inner (already unescaped) LastChange event document.
#[must_use]
pub fn parse_last_change_volume(event_xml: &str) -> Option<u16> {
    let xml = unescape_xml(event_xml);
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"Volume" {
                    let mut channel = None;
                    let mut val = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"channel" => {
                                channel = attr.unescape_value().ok().map(|v| v.into_owned())
                            }
                            b"val" => val = attr.unescape_value().ok().map(|v| v.into_owned()),
                            _ => {}
                        }
                    }
                    // devices with a single channel omit the attribute
                    let is_master = channel.as_deref().map(|c| c == "Master").unwrap_or(true);
                    if is_master {
                        if let Some(v) = val.and_then(|v| v.parse().ok()) {
                            return Some(v);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("[GENA] LastChange parse error: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFY_BODY: &str = r#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
<e:property><LastChange>&lt;Event xmlns="urn:schemas-upnp-org:metadata-1-0/RCS/"&gt;&lt;InstanceID val="0"&gt;&lt;Volume channel="Master" val="37"/&gt;&lt;Volume channel="LF" val="100"/&gt;&lt;Mute channel="Master" val="0"/&gt;&lt;/InstanceID&gt;&lt;/Event&gt;</LastChange></e:property>
</e:propertyset>"#;

    #[test]
    fn notify_body_yields_master_volume() {
        assert_eq!(parse_notify_volume(NOTIFY_BODY), Some(37));
    }

    #[test]
    fn channel_less_volume_is_accepted() {
        let xml = r#"<Event><InstanceID val="0"><Volume val="12"/></InstanceID></Event>"#;
        assert_eq!(parse_last_change_volume(xml), Some(12));
    }

    #[test]
    fn non_master_channels_are_ignored() {
        let xml = r#"<Event><InstanceID val="0"><Volume channel="LF" val="9"/></InstanceID></Event>"#;
        assert_eq!(parse_last_change_volume(xml), None);
    }

    #[test]
    fn body_without_last_change_is_none() {
        assert_eq!(parse_notify_volume("<e:propertyset/>"), None);
    }
}

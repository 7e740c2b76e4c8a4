//! Device description document fetch and parse.
//!
//! A search hit only carries a LOCATION URL; everything the registry needs
//! to decide add/refresh/skip (UDN, manufacturer, friendly name) and
//! everything bring-up needs (service control/event URLs) comes from the
//! description document parsed here.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use url::Url;

use crate::upnp::services::{ServiceEndpoint, ServiceKind, ServiceSet, ALL_SERVICES};
use crate::upnp::soap::{SoapError, SoapResult};

/// Parsed renderer description document.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescription {
    /// Unique device name, the stable identity.
    pub udn: String,
    /// Friendly name shown to users.
    pub friendly_name: String,
    /// Manufacturer string (used to skip incompatible devices).
    pub manufacturer: String,
    /// Base URL for resolving relative service URLs, when published.
    pub url_base: Option<String>,
    /// Presentation URL, resolved to absolute form.
    pub presentation_url: String,
    /// The three service endpoints, absolute URLs.
    pub services: ServiceSet,
}

/// Fetches and parses the description document at `location`.
pub async fn fetch_description(client: &Client, location: &str) -> SoapResult<DeviceDescription> {
    let res = client.get(location).send().await?;
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), body));
    }
    parse_description(&body, location)
}

/// Matches a published serviceType against one of the three roles.
///
/// Compared without the trailing version so `AVTransport:2` devices still
/// bind; actions used here are all version-1 actions.
fn service_kind_of(service_type: &str) -> Option<ServiceKind> {
    ALL_SERVICES.into_iter().find(|kind| {
        let urn = kind.urn();
        let base = &urn[..urn.rfind(':').unwrap_or(urn.len())];
        service_type.starts_with(base)
    })
}

/// Resolves a possibly relative URL against URLBase, falling back to the
/// description location.
fn resolve_url(raw: &str, url_base: Option<&str>, location: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let base = url_base.unwrap_or(location);
    match Url::parse(base).and_then(|b| b.join(raw)) {
        Ok(u) => u.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Parses a description document.
///
/// Missing elements degrade to empty strings (spec: never fatal); the
/// registry rejects devices without a UDN or an AVTransport service.
pub fn parse_description(xml: &str, location: &str) -> SoapResult<DeviceDescription> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut desc = DeviceDescription::default();

    // current leaf element name, and the service entry being accumulated
    let mut current: Vec<u8> = Vec::new();
    let mut in_service = false;
    let mut svc_type = String::new();
    let mut svc_id = String::new();
    let mut svc_control = String::new();
    let mut svc_event = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"service" {
                    in_service = true;
                    svc_type.clear();
                    svc_id.clear();
                    svc_control.clear();
                    svc_event.clear();
                }
                current = name;
            }
            Ok(Event::Text(ref t)) => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if in_service {
                    match current.as_slice() {
                        b"serviceType" => svc_type = text,
                        b"serviceId" => svc_id = text,
                        b"controlURL" => svc_control = text,
                        b"eventSubURL" => svc_event = text,
                        _ => {}
                    }
                } else {
                    match current.as_slice() {
                        // first UDN wins: embedded sub-devices re-declare it
                        b"UDN" if desc.udn.is_empty() => desc.udn = text,
                        b"friendlyName" if desc.friendly_name.is_empty() => {
                            desc.friendly_name = text
                        }
                        b"manufacturer" if desc.manufacturer.is_empty() => {
                            desc.manufacturer = text
                        }
                        b"URLBase" => desc.url_base = Some(text),
                        b"presentationURL" if desc.presentation_url.is_empty() => {
                            desc.presentation_url = text
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"service" {
                    in_service = false;
                    if let Some(kind) = service_kind_of(&svc_type) {
                        let endpoint = desc.services.get_mut(kind);
                        // keep the first match; embedded sub-devices may
                        // re-publish the same service
                        if !endpoint.is_present() {
                            *endpoint = ServiceEndpoint {
                                id: svc_id.clone(),
                                service_type: svc_type.clone(),
                                control_url: svc_control.clone(),
                                event_url: svc_event.clone(),
                                sid: None,
                                timeout_secs: kind.subscription_timeout(),
                            };
                        }
                    }
                }
                current.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("[UPnP] Description parse error at {}: {}", location, e);
                return Err(SoapError::Parse);
            }
            _ => {}
        }
        buf.clear();
    }

    // resolve URLs once the whole document (and any URLBase) is read
    let base = desc.url_base.clone();
    desc.presentation_url = resolve_url(&desc.presentation_url, base.as_deref(), location);
    for kind in ALL_SERVICES {
        let endpoint = desc.services.get_mut(kind);
        endpoint.control_url = resolve_url(&endpoint.control_url, base.as_deref(), location);
        endpoint.event_url = resolve_url(&endpoint.event_url, base.as_deref(), location);
    }

    Ok(desc)
}

/// Extracts the IPv4 address from a description location URL.
#[must_use]
pub fn ip_from_location(location: &str) -> Option<std::net::IpAddr> {
    Url::parse(location)
        .ok()?
        .host_str()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room Radio</friendlyName>
    <manufacturer>ACME Audio</manufacturer>
    <UDN>uuid:01234567-89ab-cdef-0123-456789abcdef</UDN>
    <presentationURL>/web/index.html</presentationURL>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>/upnp/control/avt</controlURL>
        <eventSubURL>/upnp/event/avt</eventSubURL>
        <SCPDURL>/avt.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/upnp/control/rcs</controlURL>
        <eventSubURL>/upnp/event/rcs</eventSubURL>
        <SCPDURL>/rcs.xml</SCPDURL>
      </service>
      <service>
        <serviceType>urn:schemas-upnp-org:service:ConnectionManager:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:ConnectionManager</serviceId>
        <controlURL>/upnp/control/cm</controlURL>
        <eventSubURL>/upnp/event/cm</eventSubURL>
        <SCPDURL>/cm.xml</SCPDURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    #[test]
    fn parses_identity_and_services() {
        let desc = parse_description(SAMPLE, "http://192.168.1.20:49152/desc.xml").unwrap();
        assert_eq!(desc.udn, "uuid:01234567-89ab-cdef-0123-456789abcdef");
        assert_eq!(desc.friendly_name, "Living Room Radio");
        assert_eq!(desc.manufacturer, "ACME Audio");
        assert_eq!(
            desc.presentation_url,
            "http://192.168.1.20:49152/web/index.html"
        );

        let avt = desc.services.get(ServiceKind::AvTransport);
        assert_eq!(avt.control_url, "http://192.168.1.20:49152/upnp/control/avt");
        assert_eq!(avt.event_url, "http://192.168.1.20:49152/upnp/event/avt");
        assert_eq!(avt.timeout_secs, 0);

        let rcs = desc.services.get(ServiceKind::RenderingControl);
        assert_eq!(rcs.timeout_secs, 300);
        assert!(desc.services.get(ServiceKind::ConnectionManager).is_present());
    }

    #[test]
    fn url_base_overrides_location() {
        let xml = SAMPLE.replace(
            "<presentationURL>",
            "<URLBase>http://10.0.0.9:8080/</URLBase><presentationURL>",
        );
        let desc = parse_description(&xml, "http://192.168.1.20:49152/desc.xml").unwrap();
        assert_eq!(
            desc.services.get(ServiceKind::AvTransport).control_url,
            "http://10.0.0.9:8080/upnp/control/avt"
        );
    }

    #[test]
    fn higher_service_versions_still_bind() {
        let xml = SAMPLE.replace("service:AVTransport:1", "service:AVTransport:2");
        let desc = parse_description(&xml, "http://192.168.1.20:49152/desc.xml").unwrap();
        assert!(desc.services.get(ServiceKind::AvTransport).is_present());
    }

    #[test]
    fn missing_fields_are_empty_not_fatal() {
        let desc =
            parse_description("<root><device></device></root>", "http://h/desc.xml").unwrap();
        assert!(desc.udn.is_empty());
        assert!(!desc.services.get(ServiceKind::AvTransport).is_present());
    }

    #[test]
    fn location_ip_extraction() {
        assert_eq!(
            ip_from_location("http://192.168.1.20:49152/desc.xml"),
            Some("192.168.1.20".parse().unwrap())
        );
        assert_eq!(ip_from_location("not a url"), None);
    }
}

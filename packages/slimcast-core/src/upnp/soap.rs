//! Low-level SOAP protocol implementation for UPnP control.
//!
//! This module handles the raw SOAP envelope building, HTTP transport,
//! and fault parsing. For typed renderer actions, see `control.rs`.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::protocol_constants::SOAP_TIMEOUT_SECS;
use crate::utils::{escape_xml, extract_xml_text};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with a renderer.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the renderer failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Renderer returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Renderer returned a SOAP fault response.
    #[error("SOAP fault: {0}")]
    Fault(String),

    /// Failed to parse the SOAP response.
    #[error("Failed to parse SOAP response")]
    Parse,
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// Sends a SOAP request to a renderer control URL.
///
/// This is the core transport function for all UPnP SOAP operations. It
/// builds the SOAP envelope, sends the HTTP request, and surfaces SOAP
/// faults in the response.
///
/// # Arguments
/// * `client` - The HTTP client to use for the request
/// * `control_url` - Absolute control URL from the device description
/// * `service` - The UPnP service URN (e.g. `urn:schemas-upnp-org:service:AVTransport:1`)
/// * `action` - The SOAP action name (e.g. `Play`, `Stop`, `GetVolume`)
/// * `args` - Key-value pairs for action arguments (order is preserved)
pub async fn send_soap_request(
    client: &Client,
    control_url: &str,
    service: &str,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    // Build SOAP envelope - must be a single line with no leading whitespace.
    // Some SOAP parsers reject XML with whitespace before the root element.
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, service
    );

    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }

    body.push_str(&format!(r#"</u:{}></s:Body></s:Envelope>"#, action));

    log::debug!("[SOAP] {} -> {} ({} bytes)", action, control_url, body.len());
    log::trace!("[SOAP] Request body: {}", body);

    let res = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", service, action))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await?;

    let status = res.status();
    let response_text = res.text().await?;

    // Check for a SOAP fault before the HTTP status: faults usually ride on
    // a 500 response and carry the useful diagnostic.
    if response_text.contains("<s:Fault>") || response_text.contains("<soap:Fault>") {
        let fault_msg = extract_fault_string(&response_text)
            .unwrap_or_else(|| "Unknown SOAP fault".to_string());
        return Err(SoapError::Fault(fault_msg));
    }

    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

/// Extracts the faultstring (falling back to the UPnP errorDescription)
/// from a SOAP fault response.
fn extract_fault_string(xml: &str) -> Option<String> {
    extract_xml_text(xml, "errorDescription")
        .or_else(|| extract_xml_text(xml, "faultstring"))
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// A fully-described SOAP call, ready to be sent.
///
/// Calls are built synchronously (often under the device mutex) and sent
/// later by the RPC facade, which serializes them per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapCall {
    /// Target service role; the facade resolves it to the device's
    /// control URL.
    pub kind: crate::upnp::services::ServiceKind,
    /// Action name.
    pub action: &'static str,
    /// Ordered action arguments.
    pub args: Vec<(&'static str, String)>,
}

impl SoapCall {
    /// Creates a call for the given service role and action.
    #[must_use]
    pub fn new(kind: crate::upnp::services::ServiceKind, action: &'static str) -> Self {
        Self { kind, action, args: Vec::new() }
    }

    /// Adds an argument. Arguments are serialized in insertion order.
    #[must_use]
    pub fn arg(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.args.push((key, value.into()));
        self
    }

    /// Adds the standard `InstanceID=0` argument used by every AVTransport
    /// and RenderingControl action.
    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Sends this call to the given control URL.
    pub async fn send(&self, client: &Client, control_url: &str) -> SoapResult<String> {
        let args: Vec<(&str, &str)> = self.args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        send_soap_request(client, control_url, self.kind.urn(), self.action, &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_captures_args_in_order() {
        let call = SoapCall::new(crate::upnp::services::ServiceKind::RenderingControl, "SetVolume")
            .instance_id()
            .arg("Channel", "Master")
            .arg("DesiredVolume", "75");

        assert_eq!(call.action, "SetVolume");
        assert_eq!(call.args.len(), 3);
        assert_eq!(call.args[0], ("InstanceID", "0".to_string()));
        assert_eq!(call.args[1], ("Channel", "Master".to_string()));
        assert_eq!(call.args[2], ("DesiredVolume", "75".to_string()));
    }

    #[test]
    fn fault_string_prefers_upnp_error_description() {
        let xml = r#"<s:Fault><faultstring>UPnPError</faultstring>
            <errorDescription>Transition not available</errorDescription></s:Fault>"#;
        assert_eq!(
            extract_fault_string(xml).as_deref(),
            Some("Transition not available")
        );
    }
}

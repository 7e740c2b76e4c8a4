//! Centralized error types for the slimcast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes for the streaming origin
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::upnp::gena::GenaError;
use crate::upnp::soap::SoapError;
use crate::upnp::ssdp::DiscoveryError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::SendSearch(_) => "ssdp_send_failed",
            Self::NoInterfaces => "no_network_interfaces",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Parse => "soap_parse_error",
        }
    }
}

impl ErrorCode for GenaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::SubscriptionFailed(_) => "gena_subscription_failed",
            Self::RenewalFailed(_) => "gena_renewal_failed",
            Self::MissingSid => "gena_missing_sid",
        }
    }
}

/// Application-wide error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Renderer discovery failed (SSDP/network issues).
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// SOAP request to a renderer failed.
    #[error("SOAP request failed: {0}")]
    Soap(String),

    /// Renderer not found or unreachable.
    #[error("Renderer not found: {0}")]
    RendererNotFound(String),

    /// Requested stream slot does not exist.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Another session already holds this stream slot open.
    #[error("Stream busy: {0}")]
    StreamBusy(String),

    /// The device table is full; a newly discovered renderer was dropped.
    #[error("Device table full")]
    DeviceTableFull,

    /// No advertised sink format matches the requested source format.
    #[error("No matching codec: {0}")]
    CodecMismatch(String),

    /// Configuration load/save error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Soap(_) => "soap_error",
            Self::RendererNotFound(_) => "renderer_not_found",
            Self::StreamNotFound(_) => "stream_not_found",
            Self::StreamBusy(_) => "stream_busy",
            Self::DeviceTableFull => "device_table_full",
            Self::CodecMismatch(_) => "codec_mismatch",
            Self::Configuration(_) => "configuration_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RendererNotFound(_) | Self::StreamNotFound(_) => StatusCode::NOT_FOUND,
            Self::StreamBusy(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SoapError> for BridgeError {
    fn from(err: SoapError) -> Self {
        Self::Soap(err.to_string())
    }
}

impl From<GenaError> for BridgeError {
    fn from(err: GenaError) -> Self {
        Self::Soap(err.to_string())
    }
}

impl From<DiscoveryError> for BridgeError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_not_found_maps_to_404() {
        let err = BridgeError::StreamNotFound("00-aa-idx-0".into());
        assert_eq!(err.code(), "stream_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn stream_busy_maps_to_409() {
        let err = BridgeError::StreamBusy("00-aa-idx-0".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}

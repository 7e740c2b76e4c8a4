//! Generic-device protocol plumbing: discovery, description, SOAP control,
//! eventing, capability negotiation and DIDL synthesis.

pub mod control;
pub mod description;
pub mod didl;
pub mod gena;
pub mod protocol_info;
pub mod services;
pub mod soap;
pub mod ssdp;

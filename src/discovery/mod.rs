//! Discovery: advertising this service over mDNS (component G) and finding
//! peers' services (component H).

pub mod client;
pub mod mdns;

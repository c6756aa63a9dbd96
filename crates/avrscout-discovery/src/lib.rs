//! avrscout Discovery - SSDP discovery of Denon and marantz AV receivers
//!
//! This crate drives the discovery pipeline:
//! - A time-boxed SSDP M-SEARCH cycle over UDP multicast
//! - Hardware-address resolution via the kernel neighbor table
//! - Two-stage HTTP metadata enrichment for each unique device

pub mod arp;
pub mod enrich;
pub mod session;
pub mod ssdp;

pub use arp::{ArpResolver, ResolveError, ResolveHardware};
pub use enrich::Enricher;
pub use session::{DiscoveryEvent, DiscoverySession, SessionConfig};

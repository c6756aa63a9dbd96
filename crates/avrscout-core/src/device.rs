//! Device record for discovered AV receivers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Sentinel manufacturer value before any enrichment stage has reported one
pub const UNKNOWN_MANUFACTURER: &str = "Unknown Manufacturer";

/// Sentinel model value before any enrichment stage has reported one
pub const UNKNOWN_MODEL: &str = "Unknown Model";

/// Prefix some firmware versions prepend to UPnP name fields
const JUNK_PREFIX: &str = "ACT-";

/// An AV receiver observed during a discovery session
///
/// One record exists per distinct hardware address; the MAC is the
/// deduplication key for the whole session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Source address of the discovery reply that first revealed this device
    pub ip: Ipv4Addr,
    /// Resolved link-layer address
    pub mac: String,
    /// Description callback URL advertised in the discovery reply
    pub location: String,
    /// Human-readable name reported by the device, empty until enriched
    pub friendly_name: String,
    /// Manufacturer name, sentinel until an enrichment stage reports one
    pub manufacturer: String,
    /// Model name, sentinel until an enrichment stage reports one
    pub model: String,
    /// Firmware version, if the description document exposes one
    pub firmware_version: Option<String>,
    /// When the device was first seen in this session
    pub first_seen: DateTime<Utc>,
}

impl DiscoveredDevice {
    /// Create a new device record with default metadata
    pub fn new(ip: Ipv4Addr, mac: String, location: String) -> Self {
        Self {
            ip,
            mac,
            location,
            friendly_name: String::new(),
            manufacturer: UNKNOWN_MANUFACTURER.to_string(),
            model: UNKNOWN_MODEL.to_string(),
            firmware_version: None,
            first_seen: Utc::now(),
        }
    }

    /// Whether an enrichment stage has reported a real manufacturer
    pub fn has_manufacturer(&self) -> bool {
        self.manufacturer != UNKNOWN_MANUFACTURER
    }

    /// Clean up vendor junk in the name fields
    ///
    /// Strips the `ACT-` prefix from friendly name and manufacturer, then
    /// strips a leading `"<manufacturer> "` token from the model so the
    /// model string does not duplicate the manufacturer.
    pub fn normalize(&mut self) {
        self.friendly_name = strip_junk_prefix(&self.friendly_name).to_string();
        self.manufacturer = strip_junk_prefix(&self.manufacturer).to_string();
        let prefix = format!("{} ", self.manufacturer);
        if let Some(rest) = self.model.strip_prefix(&prefix) {
            self.model = rest.to_string();
        }
    }
}

fn strip_junk_prefix(s: &str) -> &str {
    s.strip_prefix(JUNK_PREFIX).unwrap_or(s)
}

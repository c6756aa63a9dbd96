//! Parsing of the two XML documents an AV receiver can serve
//!
//! Stage 1 of enrichment fetches the standard UPnP device description
//! advertised in the discovery reply. Stage 2 falls back to the vendor's
//! `/goform/Deviceinfo.xml` endpoint, which carries a numeric brand code
//! instead of a manufacturer name.

use quick_xml::de::from_str;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Brand codes reported by the vendor Deviceinfo endpoint
///
/// Only two codes are known to be in use. Anything else falls back to the
/// unknown-manufacturer sentinel at the call site.
const BRAND_NAMES: [&str; 2] = ["Denon", "marantz"];

#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("Failed to parse description document: {0}")]
    Parse(String),
}

/// Root of a UPnP device-description document (`<root>`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDescription {
    #[serde(default)]
    pub device: Option<DescribedDevice>,
}

/// A `<device>` element, top-level or nested in a `<deviceList>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescribedDevice {
    #[serde(rename = "friendlyName", default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,
    #[serde(rename = "firmware_version", default)]
    pub firmware_version: Option<String>,
    #[serde(rename = "deviceList", default)]
    pub device_list: Option<DeviceList>,
}

/// A `<deviceList>` of embedded devices
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub device: Vec<DescribedDevice>,
}

impl DescribedDevice {
    /// Find the firmware version for this device
    ///
    /// A `firmware_version` element directly on the device wins; otherwise
    /// the embedded device list is scanned in order and the first entry
    /// exposing one is used.
    pub fn find_firmware_version(&self) -> Option<&str> {
        if let Some(ref version) = self.firmware_version {
            return Some(version);
        }
        let list = self.device_list.as_ref()?;
        for embedded in &list.device {
            if let Some(ref version) = embedded.firmware_version {
                debug!(version = %version, "Firmware version found on embedded device");
                return Some(version);
            }
        }
        None
    }
}

/// Vendor `Device_Info` document served at `/goform/Deviceinfo.xml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorInfo {
    #[serde(rename = "BrandCode", default)]
    pub brand_code: Option<String>,
    #[serde(rename = "ModelName", default)]
    pub model_name: Option<String>,
}

/// Parse a UPnP device-description document
pub fn parse_device_description(xml: &str) -> Result<DeviceDescription, DescriptionError> {
    from_str(xml).map_err(|e| DescriptionError::Parse(e.to_string()))
}

/// Parse a vendor Deviceinfo document
pub fn parse_vendor_info(xml: &str) -> Result<VendorInfo, DescriptionError> {
    from_str(xml).map_err(|e| DescriptionError::Parse(e.to_string()))
}

/// Map a vendor brand code to a manufacturer name
///
/// Returns `None` for absent, non-numeric, or out-of-range codes.
pub fn brand_name(code: Option<&str>) -> Option<&'static str> {
    let idx: usize = code?.trim().parse().ok()?;
    BRAND_NAMES.get(idx).copied()
}

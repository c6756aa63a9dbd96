//! avrscout Core - Device model and description-document parsing
//!
//! This crate provides the foundational types for avrscout:
//! - The `DiscoveredDevice` record produced by a discovery session
//! - UPnP device-description and vendor Deviceinfo XML parsing
//! - The Denon/marantz brand-code table

pub mod description;
pub mod device;

pub use description::{
    brand_name, parse_device_description, parse_vendor_info, DescriptionError, DeviceDescription,
    VendorInfo,
};
pub use device::{DiscoveredDevice, UNKNOWN_MANUFACTURER, UNKNOWN_MODEL};

//! Two-stage metadata enrichment for discovered devices
//!
//! Stage 1 fetches the UPnP device description advertised in the discovery
//! reply. Stage 2 runs only when stage 1 left the manufacturer at its
//! sentinel, and asks the vendor `/goform/Deviceinfo.xml` endpoint instead.
//! Neither stage can fail the session: every error degrades to whatever
//! metadata was already populated.

use anyhow::{Context, Result};
use avrscout_core::{
    brand_name, parse_device_description, parse_vendor_info, DeviceDescription, DiscoveredDevice,
    VendorInfo,
};
use reqwest::StatusCode;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for both enrichment stages
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Vendor info endpoint path
const VENDOR_INFO_PATH: &str = "/goform/Deviceinfo.xml";

/// Port the vendor endpoint is tried on first
const VENDOR_PORT: u16 = 80;

/// Management port HEOS models answer on when port 80 is forbidden
const VENDOR_FALLBACK_PORT: u16 = 8080;

/// Metadata fetcher shared by all enrichment pipelines of a session
#[derive(Clone)]
pub struct Enricher {
    client: reqwest::Client,
}

impl Enricher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Fill in metadata for a freshly discovered device
    ///
    /// Always runs to completion; the returned device carries whatever
    /// fields could be populated.
    pub async fn enrich(&self, mut device: DiscoveredDevice) -> DiscoveredDevice {
        self.fetch_description(&mut device).await;
        if !device.has_manufacturer() {
            self.fetch_vendor_info(&mut device).await;
        }
        device
    }

    /// Stage 1: the device's own description document
    async fn fetch_description(&self, device: &mut DiscoveredDevice) {
        let body = match self.get_body(&device.location).await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %device.location, error = %e, "Description fetch failed");
                return;
            }
        };

        match parse_device_description(&body) {
            Ok(root) => apply_description(device, &root),
            Err(e) => {
                debug!(url = %device.location, error = %e, "Malformed description document");
            }
        }
    }

    /// Stage 2: the vendor Deviceinfo endpoint
    async fn fetch_vendor_info(&self, device: &mut DiscoveredDevice) {
        let body = match self.vendor_info_body(device.ip).await {
            Ok(body) => body,
            Err(e) => {
                debug!(ip = %device.ip, error = %e, "Vendor info fetch failed");
                return;
            }
        };

        match parse_vendor_info(&body) {
            Ok(info) => apply_vendor_info(device, &info),
            Err(e) => {
                debug!(ip = %device.ip, error = %e, "Malformed vendor info document");
            }
        }
    }

    /// Fetch the vendor info document, with the single port fallback
    ///
    /// HEOS models answer 403 on port 80 and serve the document on the
    /// management port instead; the retry happens exactly once.
    async fn vendor_info_body(&self, ip: Ipv4Addr) -> Result<String> {
        let mut response = self
            .client
            .get(format!("http://{ip}:{VENDOR_PORT}{VENDOR_INFO_PATH}"))
            .send()
            .await
            .context("Vendor info request failed")?;

        if should_retry_on_fallback_port(response.status(), VENDOR_PORT) {
            debug!(ip = %ip, "Port {VENDOR_PORT} forbidden, retrying on {VENDOR_FALLBACK_PORT}");
            response = self
                .client
                .get(format!("http://{ip}:{VENDOR_FALLBACK_PORT}{VENDOR_INFO_PATH}"))
                .send()
                .await
                .context("Vendor info retry failed")?;
        }

        if response.status() != StatusCode::OK {
            anyhow::bail!("Vendor info endpoint returned {}", response.status());
        }
        response.text().await.context("Failed to read vendor info body")
    }

    async fn get_body(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Request failed")?;

        if response.status() != StatusCode::OK {
            anyhow::bail!("Unexpected status {}", response.status());
        }
        response.text().await.context("Failed to read body")
    }
}

/// Whether a vendor info response warrants the one-shot port fallback
fn should_retry_on_fallback_port(status: StatusCode, port: u16) -> bool {
    status == StatusCode::FORBIDDEN && port == VENDOR_PORT
}

/// Populate device fields from a parsed description document
///
/// Absent fields keep their prior value; present ones are normalized
/// afterwards. The firmware version comes from the root device or, failing
/// that, the first embedded device that exposes one.
pub fn apply_description(device: &mut DiscoveredDevice, root: &DeviceDescription) {
    let Some(described) = root.device.as_ref() else {
        return;
    };

    if let Some(ref name) = described.friendly_name {
        device.friendly_name = name.clone();
    }
    if let Some(ref manufacturer) = described.manufacturer {
        device.manufacturer = manufacturer.clone();
    }
    if let Some(ref model) = described.model_name {
        device.model = model.clone();
    }
    device.normalize();

    if let Some(version) = described.find_firmware_version() {
        device.firmware_version = Some(version.to_string());
    }
}

/// Populate device fields from a parsed vendor info document
pub fn apply_vendor_info(device: &mut DiscoveredDevice, info: &VendorInfo) {
    if let Some(name) = brand_name(info.brand_code.as_deref()) {
        device.manufacturer = name.to_string();
    }
    if let Some(ref model) = info.model_name {
        device.model = model.clone();
    }
}

//! Time-boxed SSDP discovery session
//!
//! A session owns the multicast socket lifecycle, the reply filter, and
//! the deduplication ledger, and drives one enrichment pipeline per unique
//! hardware address. Devices are reported exactly once, after their
//! pipeline completes.

use anyhow::{Context, Result};
use avrscout_core::DiscoveredDevice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::arp::{ArpResolver, ResolveHardware};
use crate::enrich::Enricher;
use crate::ssdp::{self, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to listen for discovery replies, in seconds
    pub window_secs: u64,
    /// MX max-wait hint placed in the search probe, in seconds
    pub max_wait_secs: u32,
    /// Multicast TTL for the outbound probe
    pub multicast_ttl: u32,
    /// Token a reply must contain (case-insensitively) to be considered
    pub vendor_token: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_secs: 5,
            max_wait_secs: 3,
            multicast_ttl: 4,
            vendor_token: "denon".to_string(),
        }
    }
}

/// Discovery event for callers observing the session
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Probe sent, listen window opened
    SearchStarted,
    /// A unique device finished enrichment
    DeviceDiscovered(DiscoveredDevice),
    /// Window closed and all pipelines drained
    SearchCompleted { found: usize },
}

/// One-shot discovery session for Denon/marantz receivers
pub struct DiscoverySession {
    config: SessionConfig,
    resolver: Arc<dyn ResolveHardware>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoverySession {
    /// Create a session using the kernel neighbor table for resolution
    pub fn new(config: SessionConfig) -> Self {
        Self::with_resolver(config, Arc::new(ArpResolver))
    }

    /// Create a session with a custom hardware address resolver
    pub fn with_resolver(config: SessionConfig, resolver: Arc<dyn ResolveHardware>) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            config,
            resolver,
            event_tx,
        }
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Run one discovery cycle
    ///
    /// Sends the probe, listens until the window elapses, and returns every
    /// unique device found. Each device is also emitted as a
    /// [`DiscoveryEvent::DeviceDiscovered`] once its enrichment pipeline
    /// completes. Transport errors end the session and are logged, never
    /// surfaced; a session that could not open its socket reports no
    /// devices, the same as an empty network.
    pub async fn run(&self) -> Vec<DiscoveredDevice> {
        let _ = self.event_tx.send(DiscoveryEvent::SearchStarted);

        let found = match self.run_window().await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Discovery session ended early");
                Vec::new()
            }
        };

        let _ = self.event_tx.send(DiscoveryEvent::SearchCompleted {
            found: found.len(),
        });
        info!(found = found.len(), "Discovery session complete");

        found
    }

    /// Open the socket, probe, listen, and drain enrichment pipelines
    async fn run_window(&self) -> Result<Vec<DiscoveredDevice>> {
        // Ephemeral port: binding 1900 would make the kernel load-balance
        // unicast replies with any UPnP server on this host.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to bind discovery socket")?;
        socket
            .join_multicast_v4(SSDP_MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)
            .context("Failed to join SSDP multicast group")?;
        socket
            .set_multicast_ttl_v4(self.config.multicast_ttl)
            .context("Failed to set multicast TTL")?;

        let probe = ssdp::search_probe(self.config.max_wait_secs);
        socket
            .send_to(probe.as_bytes(), (SSDP_MULTICAST_ADDR, SSDP_PORT))
            .await
            .context("Failed to send search probe")?;

        info!(
            window_secs = self.config.window_secs,
            "Search probe sent, listening for replies"
        );

        let enricher = Enricher::new()?;
        let mut ledger: HashMap<String, DiscoveredDevice> = HashMap::new();
        let mut pipelines: JoinSet<DiscoveredDevice> = JoinSet::new();
        let mut found = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(self.config.window_secs);
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                recv = timeout_at(deadline, socket.recv_from(&mut buf)) => match recv {
                    Err(_) => {
                        debug!("Discovery window elapsed");
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Discovery socket error, closing window early");
                        break;
                    }
                    Ok(Ok((len, from))) => {
                        trace!(from = %from, len, "Discovery reply received");
                        let reply = String::from_utf8_lossy(&buf[..len]).into_owned();
                        // The ledger insert happens here, before the pipeline
                        // spawns, so a second reply for the same hardware
                        // address cannot start a second pipeline.
                        if let Some(device) = self.register_reply(&mut ledger, &reply) {
                            let enricher = enricher.clone();
                            pipelines.spawn(async move { enricher.enrich(device).await });
                        }
                    }
                },
                // Devices are reported the moment their pipeline finishes,
                // not at window expiry.
                Some(result) = pipelines.join_next() => {
                    self.report(&mut found, result);
                }
            }
        }

        // Window is closed; no new pipeline can start. In-flight ones run
        // to completion and still report their device.
        drop(socket);

        while let Some(result) = pipelines.join_next().await {
            self.report(&mut found, result);
        }

        Ok(found)
    }

    /// Emit one finished enrichment pipeline's device
    fn report(
        &self,
        found: &mut Vec<DiscoveredDevice>,
        result: Result<DiscoveredDevice, JoinError>,
    ) {
        match result {
            Ok(device) => {
                info!(
                    ip = %device.ip,
                    mac = %device.mac,
                    manufacturer = %device.manufacturer,
                    model = %device.model,
                    "Device discovered"
                );
                let _ = self
                    .event_tx
                    .send(DiscoveryEvent::DeviceDiscovered(device.clone()));
                found.push(device);
            }
            Err(e) => warn!(error = %e, "Enrichment pipeline panicked"),
        }
    }

    /// Filter one inbound reply and record it in the dedup ledger
    ///
    /// Returns the new device record when the reply passes the vendor
    /// filter, yields a parseable location, resolves to a hardware address,
    /// and that address has not been seen this session. Every other case
    /// discards the reply.
    fn register_reply(
        &self,
        ledger: &mut HashMap<String, DiscoveredDevice>,
        reply: &str,
    ) -> Option<DiscoveredDevice> {
        if !ssdp::matches_vendor(reply, &self.config.vendor_token) {
            return None;
        }

        let location = ssdp::extract_location(reply)?;

        let mac = match self.resolver.resolve(location.ip) {
            Ok(mac) => mac,
            Err(e) => {
                debug!(ip = %location.ip, error = %e, "Resolution failed, skipping reply");
                return None;
            }
        };

        if ledger.contains_key(&mac) {
            debug!(mac = %mac, "Device already recorded, ignoring duplicate reply");
            return None;
        }

        let device = DiscoveredDevice::new(location.ip, mac.clone(), location.url);
        ledger.insert(mac, device.clone());
        Some(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arp::ResolveError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeResolver {
        mac: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeResolver {
        fn returning(mac: &str) -> Self {
            Self {
                mac: Some(mac.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                mac: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ResolveHardware for FakeResolver {
        fn resolve(&self, ip: Ipv4Addr) -> Result<String, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.mac.clone().ok_or(ResolveError::NotFound(ip))
        }
    }

    fn session(resolver: Arc<FakeResolver>) -> DiscoverySession {
        DiscoverySession::with_resolver(SessionConfig::default(), resolver)
    }

    fn reply(ip: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\n\
             LOCATION: http://{ip}:8080/description.xml\r\n\
             SERVER: LINUX UPnP/1.0 Denon-AVR/2.0\r\n\
             ST: upnp:rootdevice\r\n\
             \r\n"
        )
    }

    #[test]
    fn test_matching_reply_creates_device() {
        let resolver = Arc::new(FakeResolver::returning("aa:bb:cc:dd:ee:ff"));
        let session = session(resolver.clone());
        let mut ledger = HashMap::new();

        let device = session.register_reply(&mut ledger, &reply("10.0.0.5")).unwrap();
        assert_eq!(device.ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(device.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(device.location, "http://10.0.0.5:8080/description.xml");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_duplicate_mac_is_recorded_once() {
        let resolver = Arc::new(FakeResolver::returning("aa:bb:cc:dd:ee:ff"));
        let session = session(resolver.clone());
        let mut ledger = HashMap::new();

        assert!(session.register_reply(&mut ledger, &reply("10.0.0.5")).is_some());
        // second reply for the same device, different source address
        assert!(session.register_reply(&mut ledger, &reply("10.0.0.6")).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_non_vendor_reply_never_resolves() {
        let resolver = Arc::new(FakeResolver::returning("aa:bb:cc:dd:ee:ff"));
        let session = session(resolver.clone());
        let mut ledger = HashMap::new();

        let reply = "HTTP/1.1 200 OK\r\n\
                     LOCATION: http://10.0.0.9/desc.xml\r\n\
                     SERVER: Sonos/1.0\r\n\
                     \r\n";
        assert!(session.register_reply(&mut ledger, reply).is_none());
        assert_eq!(resolver.calls(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_unparseable_location_never_resolves() {
        let resolver = Arc::new(FakeResolver::returning("aa:bb:cc:dd:ee:ff"));
        let session = session(resolver.clone());
        let mut ledger = HashMap::new();

        let reply = "HTTP/1.1 200 OK\r\n\
                     LOCATION: http://receiver.local/desc.xml\r\n\
                     SERVER: Denon-AVR/2.0\r\n\
                     \r\n";
        assert!(session.register_reply(&mut ledger, reply).is_none());
        assert_eq!(resolver.calls(), 0);
    }

    #[test]
    fn test_resolution_failure_skips_reply() {
        let resolver = Arc::new(FakeResolver::failing());
        let session = session(resolver.clone());
        let mut ledger = HashMap::new();

        assert!(session.register_reply(&mut ledger, &reply("10.0.0.5")).is_none());
        assert_eq!(resolver.calls(), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_malformed_datagram_is_discarded() {
        let resolver = Arc::new(FakeResolver::returning("aa:bb:cc:dd:ee:ff"));
        let session = session(resolver);
        let mut ledger = HashMap::new();

        assert!(session.register_reply(&mut ledger, "denon").is_none());
        assert!(session.register_reply(&mut ledger, "").is_none());
    }

    #[tokio::test]
    async fn test_empty_window_closes_cleanly() {
        let config = SessionConfig {
            window_secs: 1,
            // token no real device advertises, so the run finds nothing
            // even on a network with live receivers
            vendor_token: "no-such-vendor".to_string(),
            ..SessionConfig::default()
        };
        let session = DiscoverySession::with_resolver(config, Arc::new(FakeResolver::failing()));
        let mut events = session.subscribe();

        let found = session.run().await;
        assert!(found.is_empty());

        assert!(matches!(events.try_recv(), Ok(DiscoveryEvent::SearchStarted)));
        assert!(matches!(
            events.try_recv(),
            Ok(DiscoveryEvent::SearchCompleted { found: 0 })
        ));
        // no DeviceDiscovered was ever emitted
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.window_secs, 5);
        assert_eq!(config.max_wait_secs, 3);
        assert_eq!(config.multicast_ttl, 4);
        assert_eq!(config.vendor_token, "denon");
    }
}

//! SSDP probe construction and reply parsing
//!
//! Everything here is pure text handling so it can be tested without a
//! socket. The session feeds each inbound datagram through
//! [`matches_vendor`] and [`extract_location`]; a `None` at any step means
//! the reply is discarded, never an error.

use std::net::Ipv4Addr;
use std::str::FromStr;

/// SSDP multicast group address
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP discovery port
pub const SSDP_PORT: u16 = 1900;

/// Build the M-SEARCH probe payload
///
/// Search target is the generic `upnp:rootdevice`; the vendor filter is
/// applied to the replies instead, since the receivers do not advertise a
/// vendor-specific search target.
pub fn search_probe(mx: u32) -> String {
    let mx = mx.max(1); // MX must be >= 1
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
         ST: upnp:rootdevice\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         \r\n"
    )
}

/// Case-insensitive substring match for the target vendor token
pub fn matches_vendor(reply: &str, token: &str) -> bool {
    reply
        .to_ascii_lowercase()
        .contains(&token.to_ascii_lowercase())
}

/// Callback URL extracted from a discovery reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLocation {
    /// Full description URL as advertised, trimmed
    pub url: String,
    /// IPv4 address embedded in the URL
    pub ip: Ipv4Addr,
}

/// Extract the LOCATION header from a discovery reply
///
/// Header names are matched case-insensitively and split on the first
/// colon; the header value must embed a dotted-quad address.
pub fn extract_location(reply: &str) -> Option<ReplyLocation> {
    let mut lines = reply.lines();
    let _status = lines.next()?;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            // end of headers
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("LOCATION") {
            let value = value.trim();
            let (_, ip, _) = split_location(value)?;
            return Some(ReplyLocation {
                url: value.to_string(),
                ip,
            });
        }
    }
    None
}

/// Split a location value into prefix, embedded IPv4 address, and suffix
///
/// Returns `None` when no dotted-quad is embedded anywhere in the value.
pub fn split_location(value: &str) -> Option<(&str, Ipv4Addr, &str)> {
    let bytes = value.as_bytes();

    for start in 0..bytes.len() {
        if !bytes[start].is_ascii_digit() {
            continue;
        }
        // only consider the beginning of a digit/dot run
        if start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            continue;
        }

        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
            end += 1;
        }

        let candidate = value[start..end].trim_end_matches('.');
        if let Ok(ip) = Ipv4Addr::from_str(candidate) {
            let end = start + candidate.len();
            return Some((&value[..start], ip, &value[end..]));
        }
    }
    None
}

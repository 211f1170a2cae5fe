//! Geolocation adapter -- coarse device position from the ipinfo.io IP
//! lookup.
//!
//! The deck has no GPS. An IP-based fix is city-accurate at best, but it is
//! what an SOS message can carry when nothing better exists. The lookup is
//! kept on a short timeout so a dead network cannot stall an emergency
//! workflow; the workflow substitutes a zeroed fix when this adapter fails.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult};

/// Lookup endpoint answering with JSON for the caller's own IP.
const IPINFO_ENDPOINT: &str = "https://ipinfo.io/json";

/// Hard ceiling on the lookup round trip.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(4);

/// IP geolocation capability.
pub struct IpGeolocator {
    /// Optional ipinfo.io access token for higher rate limits.
    token: Option<String>,
    http: reqwest::Client,
}

impl IpGeolocator {
    /// Create a geolocator, optionally authenticated with an ipinfo token.
    pub fn new(token: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("Neurodeck/0.1")
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { token, http }
    }

    /// Lookup URL with the token appended when one is configured.
    fn lookup_url(&self) -> Result<Url, CapabilityError> {
        let mut url = Url::parse(IPINFO_ENDPOINT).map_err(|e| CapabilityError::Unavailable {
            reason: format!("invalid geolocation endpoint: {e}"),
        })?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

/// Split an ipinfo `loc` field (`"lat,lon"`) into coordinates.
fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// Build the position payload from a lookup response body. A missing `loc`
/// degrades to the zeroed coordinates rather than failing; missing text
/// fields degrade to `"unknown"`.
fn fix_from_body(body: &Value) -> Result<Value, CapabilityError> {
    let loc = body.get("loc").and_then(Value::as_str).unwrap_or("0,0");
    let (lat, lon) = parse_loc(loc).ok_or_else(|| CapabilityError::MalformedResponse {
        reason: format!("unparseable `loc` field: `{loc}`"),
    })?;

    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };

    Ok(json!({
        "lat": lat,
        "lon": lon,
        "ip": field("ip"),
        "city": field("city"),
        "region": field("region"),
        "country": field("country"),
        "timestamp": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
}

#[async_trait]
impl Capability for IpGeolocator {
    fn name(&self) -> &str {
        "geolocate"
    }

    async fn invoke(&self, _request: Value) -> CapabilityResult {
        let url = self.lookup_url()?;

        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CapabilityError::Transport {
                    reason: format!(
                        "geolocation lookup timed out after {}s",
                        LOOKUP_TIMEOUT.as_secs()
                    ),
                }
            } else {
                CapabilityError::Transport {
                    reason: format!("geolocation lookup failed: {e}"),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Transport {
                reason: format!("geolocation service answered {status}"),
            });
        }

        let body: Value =
            response
                .json()
                .await
                .map_err(|e| CapabilityError::MalformedResponse {
                    reason: format!("geolocation response is not JSON: {e}"),
                })?;

        let fix = fix_from_body(&body)?;
        if let Some(city) = fix.get("city").and_then(Value::as_str) {
            debug!(city, "location fix acquired");
        }
        Ok(fix)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

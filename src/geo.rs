//! Read-only, eventually-populated geolocation cache.
//!
//! The lookup itself is best-effort: one request to `ip-api.com`, falling
//! back to `ipwho.is`. Failures leave the cache empty and every consumer
//! keeps working with placeholders.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

const IP_API_URL: &str =
    "http://ip-api.com/json/?fields=status,message,country,regionName,city,lat,lon,timezone,isp,query";
const IPWHOIS_URL: &str = "https://ipwho.is/";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoSnapshot {
    pub ip: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub timezone: String,
    pub lat: f64,
    pub lon: f64,
}

impl GeoSnapshot {
    /// "City, Region", degrading to whatever is known.
    pub fn short_location(&self) -> String {
        match (self.city.is_empty(), self.region.is_empty()) {
            (false, false) => format!("{}, {}", self.city, self.region),
            (false, true) => self.city.clone(),
            (true, false) => self.region.clone(),
            (true, true) if !self.country.is_empty() => self.country.clone(),
            _ => "Unknown".to_string(),
        }
    }

    /// "City, Region, Country", skipping blanks.
    pub fn full_location(&self) -> String {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country]
            .into_iter()
            .map(String::as_str)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            "Unknown".to_string()
        } else {
            parts.join(", ")
        }
    }

    fn from_ip_api(json: &Value) -> Option<Self> {
        if json.get("status").and_then(Value::as_str) != Some("success") {
            return None;
        }
        Some(Self {
            ip: str_field(json, &["query"]),
            city: str_field(json, &["city"]),
            region: str_field(json, &["regionName"]),
            country: str_field(json, &["country"]),
            timezone: str_field(json, &["timezone"]),
            lat: json.get("lat").and_then(Value::as_f64).unwrap_or_default(),
            lon: json.get("lon").and_then(Value::as_f64).unwrap_or_default(),
        })
    }

    fn from_ipwhois(json: &Value) -> Option<Self> {
        if json.get("success").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        Some(Self {
            ip: str_field(json, &["ip"]),
            city: str_field(json, &["city"]),
            region: str_field(json, &["region"]),
            country: str_field(json, &["country"]),
            timezone: str_field(json, &["timezone"]),
            lat: json
                .get("latitude")
                .and_then(Value::as_f64)
                .unwrap_or_default(),
            lon: json
                .get("longitude")
                .and_then(Value::as_f64)
                .unwrap_or_default(),
        })
    }
}

// ipwho.is nests some fields (`timezone.id`), so objects are searched one level down.
fn str_field(json: &Value, keys: &[&str]) -> String {
    for key in keys {
        match json.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Object(nested)) => {
                for nested_key in ["id", "name"] {
                    if let Some(Value::String(s)) = nested.get(nested_key) {
                        return s.clone();
                    }
                }
            }
            _ => {}
        }
    }
    String::new()
}

#[derive(Debug, Default)]
pub struct GeoCache {
    snapshot: RwLock<Option<GeoSnapshot>>,
    fetching: AtomicBool,
}

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<GeoSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }

    /// Populates the cache directly. Later calls replace earlier values.
    pub fn set(&self, snapshot: GeoSnapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Looks the address up once. Concurrent callers return the current
    /// cache state instead of issuing a second request.
    pub async fn fetch(&self, client: &reqwest::Client) -> Option<GeoSnapshot> {
        if let Some(snapshot) = self.get() {
            return Some(snapshot);
        }
        if self
            .fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.get();
        }

        let result = lookup(client).await;
        if let Some(snapshot) = &result {
            log::info!(
                "Location resolved: {} ({})",
                snapshot.short_location(),
                snapshot.ip
            );
            self.set(snapshot.clone());
        }
        self.fetching.store(false, Ordering::Release);
        result
    }
}

async fn lookup(client: &reqwest::Client) -> Option<GeoSnapshot> {
    let providers: [(&str, fn(&Value) -> Option<GeoSnapshot>); 2] = [
        (IP_API_URL, GeoSnapshot::from_ip_api),
        (IPWHOIS_URL, GeoSnapshot::from_ipwhois),
    ];
    for (url, parse) in providers {
        match fetch_json(client, url).await {
            Ok(json) => {
                if let Some(snapshot) = parse(&json) {
                    return Some(snapshot);
                }
                log::debug!("Geolocation provider {url} returned an unsuccessful body");
            }
            Err(e) => log::debug!("Geolocation provider {url} failed: {e}"),
        }
    }
    log::warn!("Geolocation lookup failed on every provider");
    None
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> Result<Value, reqwest::Error> {
    client
        .get(url)
        .timeout(LOOKUP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(city: &str, region: &str, country: &str) -> GeoSnapshot {
        GeoSnapshot {
            ip: "203.0.113.7".into(),
            city: city.into(),
            region: region.into(),
            country: country.into(),
            timezone: "Europe/Oslo".into(),
            lat: 59.9,
            lon: 10.7,
        }
    }

    #[test]
    fn location_strings_skip_blanks() {
        assert_eq!(snapshot("Oslo", "Oslo", "Norway").short_location(), "Oslo, Oslo");
        assert_eq!(snapshot("", "", "Norway").short_location(), "Norway");
        assert_eq!(snapshot("", "", "").short_location(), "Unknown");
        assert_eq!(snapshot("Oslo", "", "Norway").full_location(), "Oslo, Norway");
        assert_eq!(snapshot("", "", "").full_location(), "Unknown");
    }

    #[test]
    fn parses_ip_api_body() {
        let body = json!({
            "status": "success", "query": "203.0.113.7", "city": "Lyon",
            "regionName": "Auvergne", "country": "France", "timezone": "Europe/Paris",
            "lat": 45.75, "lon": 4.85
        });
        let geo = GeoSnapshot::from_ip_api(&body).expect("parsed");
        assert_eq!(geo.region, "Auvergne");
        assert_eq!(geo.lon, 4.85);

        assert!(GeoSnapshot::from_ip_api(&json!({ "status": "fail" })).is_none());
    }

    #[test]
    fn parses_nested_ipwhois_timezone() {
        let body = json!({
            "success": true, "ip": "198.51.100.2", "city": "Kyiv", "region": "Kyiv",
            "country": "Ukraine", "timezone": { "id": "Europe/Kyiv" },
            "latitude": 50.45, "longitude": 30.52
        });
        let geo = GeoSnapshot::from_ipwhois(&body).expect("parsed");
        assert_eq!(geo.timezone, "Europe/Kyiv");
        assert_eq!(geo.lat, 50.45);
    }

    #[test]
    fn cache_starts_empty() {
        let cache = GeoCache::new();
        assert!(!cache.is_available());
        cache.set(snapshot("Oslo", "Oslo", "Norway"));
        assert_eq!(cache.get().map(|g| g.city), Some("Oslo".to_string()));
    }
}

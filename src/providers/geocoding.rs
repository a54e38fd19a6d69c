//! Forward and reverse geocoding against a Nominatim-compatible address
//! service.
//!
//! This is the geospatial engine's only I/O. No caching or rate limiting
//! is performed here; burst callers must throttle themselves per the
//! service's usage policy.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::GeocodingConfig;
use crate::geo::Point;

#[derive(Debug, Error)]
pub enum GeocodeError {
    /// Forward lookup returned no match for the given address text.
    #[error("no match found for address")]
    AddressNotFound,
    /// Reverse lookup returned no address for the given coordinates.
    #[error("no address found for coordinates")]
    LocationNotFound,
    #[error("geocoding network error: {0}")]
    Network(String),
    #[error("malformed geocoding response: {0}")]
    Malformed(String),
}

/// Best-match result of a forward or reverse lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedAddress {
    pub point: Point,
    pub display_name: String,
}

/// Client for the external address-search service.
pub struct GeocodingClient {
    client: Client,
    base_url: String,
    user_agent: String,
}

impl GeocodingClient {
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GeocodeError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
        })
    }

    /// Forward lookup: best match for a free-form address.
    pub async fn search(&self, address: &str) -> Result<GeocodedAddress, GeocodeError> {
        let url = format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(address)
        );
        let body = self.fetch(&url).await?;
        parse_search_response(&body)
    }

    /// Reverse lookup: nearest address for a coordinate pair.
    pub async fn reverse(&self, lat: f64, lng: f64) -> Result<GeocodedAddress, GeocodeError> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=json",
            self.base_url, lat, lng
        );
        let body = self.fetch(&url).await?;
        parse_reverse_response(&body)
    }

    async fn fetch(&self, url: &str) -> Result<String, GeocodeError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeocodeError::Network(format!(
                "service returned HTTP {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    lat: String,
    lon: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResult {
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lon: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    /// The service reports "no address here" as an error field, not an
    /// empty body
    #[serde(default)]
    error: Option<String>,
}

fn parse_coordinate(value: &str) -> Result<f64, GeocodeError> {
    value
        .parse::<f64>()
        .map_err(|_| GeocodeError::Malformed(format!("non-numeric coordinate: {}", value)))
}

fn parse_search_response(body: &str) -> Result<GeocodedAddress, GeocodeError> {
    let results: Vec<SearchResult> =
        serde_json::from_str(body).map_err(|e| GeocodeError::Malformed(e.to_string()))?;

    let best = results.into_iter().next().ok_or(GeocodeError::AddressNotFound)?;

    Ok(GeocodedAddress {
        point: Point::new(parse_coordinate(&best.lat)?, parse_coordinate(&best.lon)?),
        display_name: best.display_name,
    })
}

fn parse_reverse_response(body: &str) -> Result<GeocodedAddress, GeocodeError> {
    let result: ReverseResult =
        serde_json::from_str(body).map_err(|e| GeocodeError::Malformed(e.to_string()))?;

    if result.error.is_some() {
        return Err(GeocodeError::LocationNotFound);
    }

    match (result.lat, result.lon, result.display_name) {
        (Some(lat), Some(lon), Some(display_name)) => Ok(GeocodedAddress {
            point: Point::new(parse_coordinate(&lat)?, parse_coordinate(&lon)?),
            display_name,
        }),
        _ => Err(GeocodeError::Malformed(
            "reverse result missing coordinates or display name".to_string(),
        )),
    }
}

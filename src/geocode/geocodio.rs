use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{GeocodeResult, Geocoder};
use crate::error::{Error, Result};

/// Geocodio batch endpoint client. One POST per batch, no retries.
pub struct GeocodioClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    #[serde(default)]
    query: String,
    response: ItemResponse,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error: Option<String>,
}

impl GeocodioClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for GeocodioClient {
    async fn batch_geocode(&self, addresses: &[String]) -> Result<Vec<Option<GeocodeResult>>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/geocode", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .json(addresses)
            .send()
            .await
            .map_err(|e| e.without_url())?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::GeocoderStatus(status));
        }

        // The request URL carries the api key; keep it out of errors and logs.
        let body: BatchResponse = response.json().await.map_err(|e| e.without_url())?;
        first_results(body, addresses.len())
    }
}

/// Keep the best (first) match per input address, in input order.
fn first_results(body: BatchResponse, sent: usize) -> Result<Vec<Option<GeocodeResult>>> {
    if body.results.len() != sent {
        return Err(Error::GeocoderShape {
            sent,
            got: body.results.len(),
        });
    }
    Ok(body
        .results
        .into_iter()
        .map(|item| {
            if let Some(err) = &item.response.error {
                debug!(address = %item.query, error = %err, "Geocodio rejected address");
            }
            item.response.results.into_iter().next()
        })
        .collect())
}

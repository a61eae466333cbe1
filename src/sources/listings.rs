//! Listing-portal scrapers. Three portals share one client; each portal
//! publishes roughly the same flat JSON shape with formatted price and
//! count strings, which normalization cleans up downstream.

use crate::sources::{FetchFuture, SourceFetcher};
use crate::valuation::error::SourceError;
use crate::valuation::types::{SourceId, SubjectKey};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::info;

pub struct ListingScraper {
    client: Client,
    base_url: String,
    source: SourceId,
}

impl ListingScraper {
    pub fn new(source: SourceId, base_url: &str) -> Result<ListingScraper, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("Mozilla/5.0 (compatible; valuation-engine)")
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(ListingScraper {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            source,
        })
    }

    async fn get_listing(&self, key: SubjectKey) -> Result<serde_json::Value, SourceError> {
        let url = format!("{}/listing", self.base_url);
        info!(source = %self.source, subject = %key, "fetching listing");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("street", key.street.as_str()),
                ("city", key.city.as_str()),
                ("state", key.state.as_str()),
                ("zip", key.postal_code.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited(format!(
                "{} returned 429",
                self.source
            ))),
            status if !status.is_success() => Err(SourceError::Unavailable(format!(
                "{} returned {}",
                self.source, status
            ))),
            _ => response.json::<serde_json::Value>().await.map_err(|e| {
                SourceError::Unavailable(format!("invalid listing body from {}: {}", self.source, e))
            }),
        }
    }
}

impl SourceFetcher for ListingScraper {
    fn source(&self) -> SourceId {
        self.source
    }

    fn fetch(&self, key: SubjectKey) -> FetchFuture<'_> {
        Box::pin(self.get_listing(key))
    }
}

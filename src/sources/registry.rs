//! Registry API client - the authoritative property-records provider
//! (assessments, sale history, AVM)

use crate::sources::{FetchFuture, SourceFetcher};
use crate::valuation::error::SourceError;
use crate::valuation::types::{SourceId, SubjectKey};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::info;

pub struct RegistryClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RegistryClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<RegistryClient, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(RegistryClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_profile(&self, key: SubjectKey) -> Result<serde_json::Value, SourceError> {
        let url = format!("{}/property/expandedprofile", self.base_url);
        info!(subject = %key, "fetching registry profile");

        let locality = format!("{}, {} {}", key.city, key.state, key.postal_code);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .query(&[
                ("address1", key.street.as_str()),
                ("address2", locality.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                Err(SourceError::RateLimited("registry returned 429".to_string()))
            }
            status if !status.is_success() => Err(SourceError::Unavailable(format!(
                "registry returned {}",
                status
            ))),
            _ => response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| SourceError::Unavailable(format!("invalid registry body: {}", e))),
        }
    }
}

impl SourceFetcher for RegistryClient {
    fn source(&self) -> SourceId {
        SourceId::RegistryApi
    }

    fn fetch(&self, key: SubjectKey) -> FetchFuture<'_> {
        Box::pin(self.get_profile(key))
    }
}

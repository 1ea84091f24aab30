//! Uploaded thumbnail storage (Cloudinary)

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    config::AssetsConfig,
    error::{AppError, AppResult},
};

static PUBLIC_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/upload/(?:v\d+/)?(.*?)\.[^./]+$").expect("valid regex"));

/// Public id of an uploaded asset, from its delivery URL
pub fn extract_public_id(url: &str) -> Option<String> {
    PUBLIC_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Delete the asset behind a thumbnail reference. Unknown references are ignored.
    async fn delete(&self, reference: &str) -> AppResult<()>;
}

/// Asset store used when no credentials are configured
pub struct NoAssets;

#[async_trait]
impl AssetStore for NoAssets {
    async fn delete(&self, reference: &str) -> AppResult<()> {
        tracing::debug!("No asset store configured, keeping {}", reference);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

pub struct CloudinaryAssets {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl CloudinaryAssets {
    /// `None` unless every credential is set
    pub fn from_config(config: &AssetsConfig) -> Option<Self> {
        match (&config.cloud_name, &config.api_key, &config.api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(Self {
                client: reqwest::Client::new(),
                cloud_name: cloud_name.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            }),
            _ => None,
        }
    }

    fn sign(&self, public_id: &str, timestamp: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("public_id={}&timestamp={}{}", public_id, timestamp, self.api_secret));
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl AssetStore for CloudinaryAssets {
    async fn delete(&self, reference: &str) -> AppResult<()> {
        let Some(public_id) = extract_public_id(reference) else {
            tracing::debug!("Not an uploaded asset: {}", reference);
            return Ok(());
        };

        let timestamp = Utc::now().timestamp();
        let url = format!("https://api.cloudinary.com/v1_1/{}/image/destroy", self.cloud_name);
        let form = [
            ("public_id", public_id.clone()),
            ("timestamp", timestamp.to_string()),
            ("api_key", self.api_key.clone()),
            ("signature", self.sign(&public_id, timestamp)),
            ("signature_algorithm", "sha256".to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Asset delete request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("Asset delete rejected: {}", e)))?
            .json::<DestroyResponse>()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid asset delete response: {}", e)))?;

        tracing::info!("Asset {} delete: {}", public_id, response.result);
        Ok(())
    }
}

//! Out-of-band checksum lookup.

use super::{ChecksumStrategy, ExternalChecksum, SourceCandidate};
use crate::download::{Algorithm, ChecksumDirective, HttpClient};
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resolves the expected digest for a candidate, if its strategy has one.
#[async_trait]
pub trait ChecksumFetcher: Send + Sync {
    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        cancel: &CancellationToken,
    ) -> CacheResult<Option<ChecksumDirective>>;
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
    name: String,
    #[serde(default)]
    digest: Option<String>,
}

/// Fetches digests over HTTP. Release listings are fetched once per URL
/// for the life of the fetcher.
pub struct HttpChecksumFetcher {
    client: HttpClient,
    listings: tokio::sync::Mutex<HashMap<String, Arc<Vec<ReleaseAsset>>>>,
}

impl HttpChecksumFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            listings: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn inline(
        &self,
        url: &str,
        algorithm: Algorithm,
        cancel: &CancellationToken,
    ) -> CacheResult<ChecksumDirective> {
        let sidecar = format!("{url}.{algorithm}");
        let body = self.client.get_text(&sidecar, Vec::new(), cancel).await?;
        parse_checksum_file(&body, algorithm).map_err(|reason| CacheError::ChecksumUnavailable {
            url: sidecar,
            reason,
        })
    }

    async fn object_metadata(
        &self,
        metadata_url: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<ChecksumDirective> {
        let body = self
            .client
            .get_text(metadata_url, Vec::new(), cancel)
            .await?;
        let value: Value = serde_json::from_str(&body)?;
        let raw = value
            .get("md5Hash")
            .or_else(|| value.get("md5"))
            .and_then(Value::as_str)
            .ok_or_else(|| CacheError::ChecksumUnavailable {
                url: metadata_url.to_string(),
                reason: "metadata has no md5Hash".to_string(),
            })?;
        let hex = normalize_md5(raw).ok_or_else(|| CacheError::ChecksumUnavailable {
            url: metadata_url.to_string(),
            reason: format!("unrecognized md5 {raw:?}"),
        })?;
        ChecksumDirective::new(Algorithm::Md5, &hex)
    }

    async fn release_asset(
        &self,
        listing_url: &str,
        asset: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<ChecksumDirective> {
        let assets = self.listing(listing_url, cancel).await?;
        let found = assets.iter().find(|a| a.name == asset).ok_or_else(|| {
            CacheError::ChecksumUnavailable {
                url: listing_url.to_string(),
                reason: format!("asset {asset} not listed"),
            }
        })?;
        let digest = found
            .digest
            .as_deref()
            .ok_or_else(|| CacheError::ChecksumUnavailable {
                url: listing_url.to_string(),
                reason: format!("asset {asset} has no digest"),
            })?;
        let hex = digest.strip_prefix("sha256:").ok_or_else(|| {
            CacheError::ChecksumUnavailable {
                url: listing_url.to_string(),
                reason: format!("unsupported digest {digest:?}"),
            }
        })?;
        ChecksumDirective::new(Algorithm::Sha256, hex)
    }

    async fn listing(
        &self,
        listing_url: &str,
        cancel: &CancellationToken,
    ) -> CacheResult<Arc<Vec<ReleaseAsset>>> {
        let mut listings = self.listings.lock().await;
        if let Some(assets) = listings.get(listing_url) {
            return Ok(assets.clone());
        }
        debug!("Fetching release listing {}", listing_url);
        let headers = vec![(
            "Accept".to_string(),
            "application/vnd.github+json".to_string(),
        )];
        let body = self.client.get_text(listing_url, headers, cancel).await?;
        let assets = Arc::new(parse_listing(&body)?);
        listings.insert(listing_url.to_string(), assets.clone());
        Ok(assets)
    }
}

#[async_trait]
impl ChecksumFetcher for HttpChecksumFetcher {
    async fn fetch(
        &self,
        candidate: &SourceCandidate,
        cancel: &CancellationToken,
    ) -> CacheResult<Option<ChecksumDirective>> {
        let directive = match &candidate.checksum {
            ChecksumStrategy::None => return Ok(None),
            ChecksumStrategy::InlineFile(algo) => self.inline(&candidate.url, *algo, cancel).await?,
            ChecksumStrategy::External(ExternalChecksum::ObjectMetadata { metadata_url }) => {
                self.object_metadata(metadata_url, cancel).await?
            }
            ChecksumStrategy::External(ExternalChecksum::ReleaseAsset { listing_url, asset }) => {
                self.release_asset(listing_url, asset, cancel).await?
            }
        };
        debug!("Checksum for {}: {}", candidate.url, directive);
        Ok(Some(directive))
    }
}

/// First token of a checksum file (`<hex>` or `<hex>  <name>`).
fn parse_checksum_file(body: &str, algorithm: Algorithm) -> Result<ChecksumDirective, String> {
    let token = body
        .split_whitespace()
        .next()
        .ok_or_else(|| "empty checksum file".to_string())?;
    ChecksumDirective::new(algorithm, token).map_err(|e| e.to_string())
}

/// Release listings are either a bare asset array or a release object.
fn parse_listing(body: &str) -> CacheResult<Vec<ReleaseAsset>> {
    let value: Value = serde_json::from_str(body)?;
    let assets = match value {
        Value::Array(_) => value,
        Value::Object(mut obj) => obj.remove("assets").unwrap_or(Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    };
    Ok(serde_json::from_value(assets)?)
}

/// MD5 as lowercase hex, from either hex or base64 of the 16 raw bytes.
fn normalize_md5(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() == 32 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Some(raw.to_ascii_lowercase());
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
    (bytes.len() == 16).then(|| hex::encode(bytes))
}

//! Candidate sources per artifact kind.
//!
//! The selector only builds URLs; it never touches the network. Checksums
//! are fetched separately by a [`ChecksumFetcher`] according to each
//! candidate's [`ChecksumStrategy`].

pub mod digest;
pub mod preload;

pub use digest::{ChecksumFetcher, HttpChecksumFetcher};
pub use preload::{PreloadExistenceCache, PreloadIndex, PreloadMode, PreloadSource};

use crate::cache::artifact::{Binary, BootImage, Driver, Licenses, Preload};
use crate::config::schema::{PreloadConfig, SourcesConfig};
use crate::download::Algorithm;
use std::fmt;

/// Who serves a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    ObjectStore,
    ReleaseHost,
    Mirror,
    Custom,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ObjectStore => "object-store",
            Self::ReleaseHost => "release-host",
            Self::Mirror => "mirror",
            Self::Custom => "custom",
        })
    }
}

/// Out-of-band digest sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChecksum {
    /// Object metadata carrying an MD5 hash.
    ObjectMetadata { metadata_url: String },
    /// Release listing whose asset carries a `sha256:<hex>` digest.
    ReleaseAsset { listing_url: String, asset: String },
}

/// How to learn the expected digest of a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStrategy {
    /// Fetch `<url>.<algo>` next to the artifact.
    InlineFile(Algorithm),
    External(ExternalChecksum),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub url: String,
    pub checksum: ChecksumStrategy,
    pub origin: Origin,
}

impl SourceCandidate {
    pub fn new(url: impl Into<String>, checksum: ChecksumStrategy, origin: Origin) -> Self {
        Self {
            url: url.into(),
            checksum,
            origin,
        }
    }

    pub fn scheme(&self) -> &str {
        self.url.split_once("://").map_or("file", |(s, _)| s)
    }
}

/// Builds ordered candidate lists from configured base URLs.
#[derive(Debug, Clone)]
pub struct SourceSelector {
    sources: SourcesConfig,
    preload: PreloadConfig,
}

impl SourceSelector {
    pub fn new(sources: SourcesConfig, preload: PreloadConfig) -> Self {
        Self { sources, preload }
    }

    pub fn preload_mode(&self) -> PreloadMode {
        self.preload.source
    }

    /// Object store, then release host, then regional mirror.
    pub fn boot_image(&self, iso: &BootImage) -> Vec<SourceCandidate> {
        if !iso.urls.is_empty() {
            return iso
                .urls
                .iter()
                .map(|u| SourceCandidate::new(u.clone(), ChecksumStrategy::None, Origin::Custom))
                .collect();
        }
        let s = &self.sources;
        let file = iso.file_name();
        let sha = ChecksumStrategy::InlineFile(Algorithm::Sha256);
        vec![
            SourceCandidate::new(
                format!("{}/{}/{}", s.object_store_url, s.iso_path, file),
                sha.clone(),
                Origin::ObjectStore,
            ),
            SourceCandidate::new(
                format!(
                    "{}/{}/releases/download/{}/{}",
                    s.release_host_url, s.release_repository, iso.version, file
                ),
                sha.clone(),
                Origin::ReleaseHost,
            ),
            SourceCandidate::new(
                format!("{}/{}", s.iso_mirror_url, file),
                sha,
                Origin::Mirror,
            ),
        ]
    }

    /// Single Kubernetes release URL; sha1 sidecars before 1.17.0.
    pub fn binary(&self, bin: &Binary) -> Vec<SourceCandidate> {
        let url = format!(
            "{}/{}/bin/{}/{}/{}",
            self.sources.kubernetes_release_url, bin.version, bin.os, bin.arch, bin.name
        );
        vec![SourceCandidate::new(
            url,
            ChecksumStrategy::InlineFile(binary_checksum_algorithm(&bin.version)),
            Origin::ObjectStore,
        )]
    }

    pub fn driver(&self, driver: &Driver) -> Vec<SourceCandidate> {
        let s = &self.sources;
        let url = format!(
            "{}/{}/releases/download/{}/{}-{}",
            s.release_host_url, s.release_repository, driver.version, driver.name, driver.arch
        );
        vec![SourceCandidate::new(
            url,
            ChecksumStrategy::InlineFile(Algorithm::Sha256),
            Origin::ReleaseHost,
        )]
    }

    pub fn licenses(&self, licenses: &Licenses) -> Vec<SourceCandidate> {
        let url = format!(
            "{}/minikube/releases/{}/licenses.tar.gz",
            self.sources.object_store_url, licenses.version
        );
        vec![SourceCandidate::new(
            url,
            ChecksumStrategy::InlineFile(Algorithm::Sha256),
            Origin::ObjectStore,
        )]
    }

    /// Candidate for a preload at one particular source.
    pub fn preload(&self, preload: &Preload, source: PreloadSource) -> SourceCandidate {
        let s = &self.sources;
        let p = &self.preload;
        let tarball = preload.tarball_name();
        match source {
            PreloadSource::Gcs => SourceCandidate::new(
                format!("{}/{}/{}", s.object_store_url, p.bucket, tarball),
                ChecksumStrategy::External(ExternalChecksum::ObjectMetadata {
                    metadata_url: format!(
                        "{}/b/{}/o/{}",
                        s.object_store_api_url,
                        p.bucket,
                        encode_object_name(&tarball)
                    ),
                }),
                Origin::ObjectStore,
            ),
            PreloadSource::Github => SourceCandidate::new(
                format!(
                    "{}/{}/releases/download/{}/{}",
                    s.release_host_url, p.repository, preload.generation, tarball
                ),
                ChecksumStrategy::External(ExternalChecksum::ReleaseAsset {
                    listing_url: format!(
                        "{}/repos/{}/releases/tags/{}",
                        s.release_api_url, p.repository, preload.generation
                    ),
                    asset: tarball,
                }),
                Origin::ReleaseHost,
            ),
        }
    }

    /// Preload candidates in configured order.
    pub fn preload_candidates(&self, preload: &Preload) -> Vec<(PreloadSource, SourceCandidate)> {
        self.preload
            .source
            .order()
            .iter()
            .map(|src| (*src, self.preload(preload, *src)))
            .collect()
    }
}

/// `sha256` for v1.17.0 and later, `sha1` before. Unparseable versions get `sha256`.
pub fn binary_checksum_algorithm(version: &str) -> Algorithm {
    let cutoff = semver::Version::new(1, 17, 0);
    match semver::Version::parse(version.trim_start_matches('v')) {
        Ok(v) if v < cutoff => Algorithm::Sha1,
        _ => Algorithm::Sha256,
    }
}

/// Percent-encode an object name for a metadata path segment.
fn encode_object_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

//! Checksum directives and streaming verification.
//!
//! A directive travels inside the source URL as `?checksum=<algo>:<hex>` so
//! every layer between the source selector and the getter only has to pass
//! a string around.

use crate::error::{CacheError, CacheResult};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Query parameter carrying the directive.
pub const CHECKSUM_PARAM: &str = "checksum";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha1,
    Md5,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Length of a hex digest produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha1 => 40,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            other => Err(CacheError::InvalidChecksum(format!(
                "unknown algorithm {other}"
            ))),
        }
    }
}

/// An expected digest: algorithm plus lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChecksumDirective {
    pub algorithm: Algorithm,
    digest: String,
}

impl ChecksumDirective {
    pub fn new(algorithm: Algorithm, digest: &str) -> CacheResult<Self> {
        let digest = digest.trim().to_ascii_lowercase();
        if digest.len() != algorithm.hex_len() || !digest.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(CacheError::InvalidChecksum(format!("{algorithm}:{digest}")));
        }
        Ok(Self { algorithm, digest })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn hasher(&self) -> Hasher {
        Hasher::new(self.algorithm)
    }

    /// Compare a finished hasher against this directive.
    pub fn check(&self, hasher: Hasher, path: &Path) -> CacheResult<()> {
        let actual = hasher.finalize_hex();
        if actual == self.digest {
            Ok(())
        } else {
            Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: self.to_string(),
                actual: format!("{}:{actual}", self.algorithm),
            })
        }
    }
}

impl fmt::Display for ChecksumDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for ChecksumDirective {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| CacheError::InvalidChecksum(s.to_string()))?;
        Self::new(algo.parse()?, hex)
    }
}

/// Incremental digest over any supported algorithm.
pub enum Hasher {
    Sha256(Sha256),
    Sha1(Sha1),
    Md5(md5::Context),
}

impl Hasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
            Algorithm::Sha1 => Self::Sha1(Sha1::new()),
            Algorithm::Md5 => Self::Md5(md5::Context::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.consume(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => format!("{:x}", h.compute()),
        }
    }

    /// Feed the whole of `reader` into the hasher.
    pub fn consume_reader(&mut self, reader: &mut impl Read) -> io::Result<u64> {
        io::copy(reader, self)
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash a file on disk and compare it to `directive`.
pub fn verify_file(path: &Path, directive: &ChecksumDirective) -> CacheResult<()> {
    let mut file =
        File::open(path).map_err(|e| CacheError::io(format!("opening {}", path.display()), e))?;
    let mut hasher = directive.hasher();
    hasher
        .consume_reader(&mut file)
        .map_err(|e| CacheError::io(format!("hashing {}", path.display()), e))?;
    directive.check(hasher, path)
}

/// Append a directive to a source URL.
pub fn fold_into(source: &str, directive: &ChecksumDirective) -> String {
    let sep = if source.contains('?') { '&' } else { '?' };
    format!("{source}{sep}{CHECKSUM_PARAM}={directive}")
}

/// Split a source string into its URL and optional directive.
///
/// Bare absolute paths are accepted and treated as `file://` URLs.
pub fn split_source(source: &str) -> CacheResult<(Url, Option<ChecksumDirective>)> {
    let mut url = match Url::parse(source) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) if Path::new(source).is_absolute() => {
            let (path, query) = match source.split_once('?') {
                Some((p, q)) => (p, Some(q)),
                None => (source, None),
            };
            let mut url = Url::from_file_path(path).map_err(|()| CacheError::InvalidUrl {
                url: source.to_string(),
                reason: "not an absolute path".to_string(),
            })?;
            url.set_query(query);
            url
        }
        Err(e) => {
            return Err(CacheError::InvalidUrl {
                url: source.to_string(),
                reason: e.to_string(),
            })
        }
    };

    let mut directive = None;
    let mut rest = Vec::new();
    for (k, v) in url.query_pairs() {
        if k == CHECKSUM_PARAM {
            directive = Some(v.parse::<ChecksumDirective>()?);
        } else {
            rest.push((k.into_owned(), v.into_owned()));
        }
    }
    if directive.is_some() {
        if rest.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(rest);
        }
    }
    Ok((url, directive))
}

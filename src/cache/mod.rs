//! Local artifact cache
//!
//! Artifacts are published under the cache root at a path derived only
//! from their descriptor. A published file is complete: downloads land in
//! a `.download` sibling and are renamed into place after verification.
//!
//! # Layout
//!
//! | Artifact | Path under root |
//! |----------|-----------------|
//! | Boot image | `iso/<file>` |
//! | Binary | `cache/<os>/<arch>/<version>/<name>` |
//! | Preload | `cache/preloaded-tarball/<tarball>` |
//! | Driver | `cache/driver/<arch>/<version>/<name>` |
//! | Image | `kic/<name>:<tag>.tar` |
//! | Licenses | `cache/licenses/<version>/licenses.tar.gz` |

pub mod artifact;
pub mod clean;
pub mod image;
pub mod lock;
pub mod manager;
pub mod paths;
pub mod probe;

pub use artifact::{Artifact, Binary, BootImage, ContainerImage, Driver, Licenses, Preload};
pub use image::{DockerCliSaver, ImageRef, ImageSaver};
pub use lock::{DownloadLock, LOCK_TIMEOUT};
pub use manager::CacheManager;
pub use paths::ArtifactPaths;
pub use probe::{FileInfo, ProbeFn};

//! minicache - artifact download and local cache for cluster bootstrapping
//!
//! Boot images, Kubernetes binaries, preloaded image tarballs, driver
//! binaries, container images and license bundles are fetched once into
//! a local cache root and served from there afterwards.

pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod env;
pub mod error;
pub mod localpath;
pub mod progress;
pub mod source;
pub mod ui;

pub use error::{CacheError, CacheResult};

//! CLI argument definitions using clap derive

use crate::cache::artifact::{self, Artifact, Binary, BootImage, ContainerImage, Driver, Licenses, Preload};
use crate::config::Config;
use crate::error::CacheResult;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// minicache - download and cache cluster bootstrap artifacts
///
/// Fetches boot images, Kubernetes binaries, preloaded image tarballs,
/// drivers, container images and license bundles into the local cache.
#[derive(Parser, Debug)]
#[command(name = "minicache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MINICACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for progress and errors
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

/// Progress and error rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Progress bars and styled lines
    #[default]
    Text,
    /// One CloudEvents JSON object per line
    Json,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download an artifact into the cache (no-op when already cached)
    Fetch(TargetArgs),

    /// Print where an artifact is cached, without downloading
    Path(TargetArgs),

    /// Re-check a cached preload against the checksum recorded at download
    Verify(TargetArgs),

    /// Delete preloaded tarballs from older generations
    Clean(CleanArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments naming one artifact kind
#[derive(Parser, Debug)]
pub struct TargetArgs {
    #[command(subcommand)]
    pub target: Target,
}

/// Artifact kinds
#[derive(Subcommand, Debug, Clone)]
pub enum Target {
    /// Boot ISO image
    Iso {
        /// minikube release version (e.g. v1.34.0)
        #[arg(id = "version_pos", value_name = "VERSION")]
        version: String,

        /// Target architecture (defaults to the host)
        #[arg(long)]
        arch: Option<String>,

        /// Explicit download URL; repeat to give fallbacks
        #[arg(long = "url")]
        urls: Vec<String>,
    },

    /// Preloaded image tarball
    Preload {
        /// Kubernetes version (e.g. v1.30.0)
        k8s_version: String,

        /// Container runtime
        #[arg(long, default_value = "docker")]
        runtime: String,

        /// Target architecture (defaults to the host)
        #[arg(long)]
        arch: Option<String>,

        /// Preload generation (defaults to the configured one)
        #[arg(long)]
        generation: Option<String>,

        /// Check sources even when preload is disabled in config
        #[arg(long)]
        force: bool,
    },

    /// Kubernetes release binaries
    Binary {
        /// Kubernetes version (e.g. v1.30.0)
        #[arg(id = "version_pos", value_name = "VERSION")]
        version: String,

        /// Binary names (kubectl, kubelet, kubeadm)
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,

        /// Target OS (defaults to the host)
        #[arg(long)]
        os: Option<String>,

        /// Target architecture (defaults to the host)
        #[arg(long)]
        arch: Option<String>,
    },

    /// VM driver binary
    Driver {
        /// Driver name (e.g. docker-machine-driver-kvm2)
        name: String,

        /// minikube release version
        #[arg(id = "version_pos", value_name = "VERSION")]
        version: String,

        /// Target architecture (defaults to the host)
        #[arg(long)]
        arch: Option<String>,
    },

    /// Container image saved as a tarball
    Image {
        /// Image reference (e.g. registry.k8s.io/pause:3.9)
        reference: String,

        /// Target architecture (defaults to the host)
        #[arg(long)]
        arch: Option<String>,
    },

    /// Third-party license bundle
    Licenses {
        /// minikube release version
        #[arg(id = "version_pos", value_name = "VERSION")]
        version: String,
    },
}

impl Target {
    /// Descriptors named by this target, filling host defaults.
    pub fn artifacts(&self, config: &Config) -> CacheResult<Vec<Artifact>> {
        let arch = |a: &Option<String>| a.clone().unwrap_or_else(|| artifact::host_arch().to_string());
        let artifacts = match self {
            Self::Iso {
                version,
                arch: a,
                urls,
            } => vec![Artifact::BootImage(
                BootImage::new(version, arch(a)).with_urls(urls.clone()),
            )],
            Self::Preload {
                k8s_version,
                runtime,
                arch: a,
                generation,
                ..
            } => {
                let generation = generation
                    .clone()
                    .unwrap_or_else(|| config.preload.generation.clone());
                vec![Artifact::Preload(Preload::new(
                    k8s_version,
                    runtime,
                    generation,
                    arch(a),
                ))]
            }
            Self::Binary {
                version,
                names,
                os,
                arch: a,
            } => {
                let os = os.clone().unwrap_or_else(|| artifact::host_os().to_string());
                names
                    .iter()
                    .map(|n| Artifact::Binary(Binary::new(n, version, &os, arch(a))))
                    .collect()
            }
            Self::Driver {
                name,
                version,
                arch: a,
            } => vec![Artifact::Driver(Driver::new(name, version, arch(a)))],
            Self::Image { reference, arch: a } => {
                vec![Artifact::ContainerImage(ContainerImage::parse(
                    reference,
                    arch(a),
                )?)]
            }
            Self::Licenses { version } => vec![Artifact::Licenses(Licenses {
                version: version.clone(),
            })],
        };
        Ok(artifacts)
    }
}

/// Arguments for the clean command
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Generation to keep (defaults to the configured one)
    #[arg(long)]
    pub generation: Option<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

//! Fetch command - materialize artifacts in the cache

use super::report;
use crate::cache::{Artifact, Binary, CacheManager};
use crate::cli::args::{Target, TargetArgs};
use crate::config::Config;
use crate::error::CacheResult;
use crate::localpath::CacheRoot;
use crate::progress::{self, EventEmitter, OutputMode};
use crate::ui::{self, UiContext};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Execute the fetch command
pub async fn execute(
    args: TargetArgs,
    config: &Config,
    cancel: &CancellationToken,
) -> CacheResult<()> {
    let ctx = UiContext::detect();
    let root = CacheRoot::from_env()?;
    debug!("Cache root: {}", root.display());
    let manager = CacheManager::new(root, config);
    manager.startup_cleanup().await;

    let artifacts = args.target.artifacts(config)?;
    match (&args.target, artifacts.as_slice()) {
        (Target::Binary { .. }, _) => {
            let bins: Vec<Binary> = artifacts
                .iter()
                .filter_map(|a| match a {
                    Artifact::Binary(b) => Some(b.clone()),
                    _ => None,
                })
                .collect();
            let paths = manager.binaries(&bins, cancel).await?;
            for (bin, path) in bins.iter().zip(paths) {
                report(&ctx, &format!("{} {}", bin.name, bin.version), &path.display().to_string());
            }
        }
        (Target::Preload { force, .. }, [Artifact::Preload(p)]) => {
            match manager.preload(p, *force, cancel).await? {
                Some(path) => report(&ctx, &p.tarball_name(), &path.display().to_string()),
                None => not_available(&ctx, p.k8s_version.as_str(), p.runtime.as_str()),
            }
        }
        (_, [Artifact::BootImage(iso)]) => {
            let path = manager.iso(iso, cancel).await?;
            report(&ctx, &iso.file_name(), &path.display().to_string());
        }
        (_, [Artifact::Driver(d)]) => {
            let path = manager.driver(d, cancel).await?;
            report(&ctx, &format!("{} {}", d.name, d.version), &path.display().to_string());
        }
        (_, [Artifact::ContainerImage(image)]) => {
            let path = manager.image(image, cancel).await?;
            report(&ctx, &image.reference.to_string(), &path.display().to_string());
        }
        (_, [Artifact::Licenses(l)]) => {
            let path = manager.licenses(l, cancel).await?;
            report(&ctx, &format!("licenses {}", l.version), &path.display().to_string());
        }
        (_, other) => {
            debug!("Nothing to fetch for {} artifacts", other.len());
        }
    }
    Ok(())
}

fn not_available(ctx: &UiContext, k8s_version: &str, runtime: &str) {
    let message = format!("No preload available for {k8s_version} {runtime}");
    match progress::output_mode() {
        OutputMode::Json => EventEmitter::stdout().info(&message),
        OutputMode::Text => {
            ui::step_warn_hint(ctx, &message, "images will be pulled individually")
        }
    }
}

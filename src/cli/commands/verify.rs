//! Verify command - re-check a cached preload against its recorded checksum

use super::report;
use crate::cache::{Artifact, CacheManager};
use crate::cli::args::TargetArgs;
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use crate::localpath::CacheRoot;
use crate::ui::UiContext;
use tokio_util::sync::CancellationToken;

/// Execute the verify command. Only preloads keep a checksum record.
pub async fn execute(
    args: TargetArgs,
    config: &Config,
    cancel: &CancellationToken,
) -> CacheResult<()> {
    let ctx = UiContext::detect();
    let manager = CacheManager::new(CacheRoot::from_env()?, config);

    for artifact in args.target.artifacts(config)? {
        let preload = match artifact {
            Artifact::Preload(p) => p,
            other => {
                return Err(CacheError::InvalidDescriptor(format!(
                    "{} has no checksum record; only preloads can be verified",
                    other.key()
                )))
            }
        };
        let path = manager.verify_preload(&preload, cancel).await?;
        report(
            &ctx,
            &format!("{} verified", preload.tarball_name()),
            &path.display().to_string(),
        );
    }
    Ok(())
}

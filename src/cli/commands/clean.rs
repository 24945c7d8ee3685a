//! Clean command - purge preloads from other generations

use super::report;
use crate::cache::clean;
use crate::cli::args::CleanArgs;
use crate::config::Config;
use crate::error::CacheResult;
use crate::localpath::CacheRoot;
use crate::ui::UiContext;

/// Execute the clean command
pub async fn execute(args: CleanArgs, config: &Config) -> CacheResult<()> {
    let ctx = UiContext::detect();
    let root = CacheRoot::from_env()?;
    let keep = args
        .generation
        .unwrap_or_else(|| config.preload.generation.clone());

    let removed = clean::clean_old_generations(&root.preload_dir(), &keep).await;
    report(
        &ctx,
        &format!("Removed {removed} old preload(s)"),
        &format!("kept generation {keep}"),
    );
    Ok(())
}

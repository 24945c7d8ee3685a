//! Path command - print where an artifact lives in the cache

use crate::cache::paths;
use crate::cli::args::TargetArgs;
use crate::config::Config;
use crate::error::CacheResult;
use crate::localpath::CacheRoot;

/// Execute the path command. Prints one path per artifact, nothing is fetched.
pub async fn execute(args: TargetArgs, config: &Config) -> CacheResult<()> {
    let root = CacheRoot::from_env()?;
    for artifact in args.target.artifacts(config)? {
        let resolved = paths::resolve(&root, &artifact)?;
        println!("{}", resolved.target.display());
    }
    Ok(())
}

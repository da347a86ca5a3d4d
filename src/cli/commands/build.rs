//! Build command - plan and execute a buildfile

use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::context::DirContext;
use crate::error::{StrataError, StrataResult};
use crate::executor::process::ProcessExecutor;
use crate::graph::manifest::Buildfile;
use crate::platform::Platform;
use crate::scheduler::Scheduler;
use crate::store::disk::DiskStore;
use console::style;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> StrataResult<()> {
    let buildfile = Buildfile::from_file(&args.file).await?;

    // Platform precedence: CLI flags, then buildfile, then config default
    let platforms = resolve_platforms(&args, &buildfile, config)?;

    let context_dir = match args.context {
        Some(dir) => dir,
        None => args
            .file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let output_dir = args
        .output
        .unwrap_or_else(|| config.build.output_dir.clone());

    let graph = buildfile.into_graph()?;
    info!(
        "Building {} stage(s) for {} platform(s)",
        graph.stages().len(),
        platforms.len()
    );

    let store = Arc::new(DiskStore::open(ConfigManager::store_dir(config)).await?);
    let executor = Arc::new(ProcessExecutor::new(ConfigManager::scratch_dir()));
    let context = Arc::new(DirContext::new(context_dir));

    let scheduler = Scheduler::new(store, executor, context);
    let outcomes = scheduler.build_all(&graph, &platforms).await?;

    let mut first_failure = None;
    for outcome in outcomes {
        match outcome.result {
            Ok(build) => {
                let dest = output_dir.join(outcome.platform.slug());
                debug!("Writing bundle to {}", dest.display());
                build.bundle.write_to_dir(&dest)?;

                println!(
                    "{} {}: {} step(s), {} cached, bundle at {}",
                    style("✓").green(),
                    outcome.platform,
                    build.steps.len(),
                    build.cache_hits(),
                    dest.display()
                );
            }
            Err(e) => {
                println!("{} {}: {}", style("✗").red(), outcome.platform, e);
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn resolve_platforms(
    args: &BuildArgs,
    buildfile: &Buildfile,
    config: &Config,
) -> StrataResult<Vec<Platform>> {
    if !args.platform.is_empty() {
        return args
            .platform
            .iter()
            .map(|s| Platform::from_str(s))
            .collect();
    }
    if !buildfile.platforms.is_empty() {
        return Ok(buildfile.platforms.clone());
    }
    if config.build.platforms.is_empty() {
        return Err(StrataError::Internal(
            "no target platforms configured".to_string(),
        ));
    }
    Ok(config.build.platforms.clone())
}

//! Initialize command.

use std::path::Path;

use console::style;

use crate::config::Config;
use crate::repository::JobStatusStore;

use crate::cli::helpers::open_database;

/// Initialize the database, repair orphaned jobs, and write a starter
/// config when none was found.
pub async fn cmd_init(config: &Config) -> anyhow::Result<()> {
    let ctx = open_database(config).await?;

    let orphaned = ctx.jobs().fail_orphaned("orphaned by restart").await?;
    if orphaned > 0 {
        println!(
            "  {} Marked {} orphaned job(s) as failed",
            style("!").yellow(),
            orphaned
        );
    }

    if config.source_path.is_none() {
        let path = Path::new("listcrawl.toml");
        if path.exists() {
            println!("  {} {} already exists", style("!").yellow(), path.display());
        } else {
            tokio::fs::write(path, Config::template()).await?;
            println!("  {} Wrote {}", style("✓").green(), path.display());
        }
    }

    if config.targets.is_empty() {
        println!(
            "{} No targets configured; add a [targets.<id>] section to listcrawl.toml",
            style("!").yellow()
        );
    }

    println!(
        "{} Initialized listcrawl database at {}",
        style("✓").green(),
        config.database_url()
    );

    Ok(())
}

/// List configured targets.
pub fn cmd_targets(config: &Config) -> anyhow::Result<()> {
    if config.targets.is_empty() {
        println!("{} No targets configured", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Targets").bold());
    println!("{}", "-".repeat(60));
    for (id, target) in &config.targets {
        let limits = config.limits_for(target);
        println!(
            "{:<20} {} (max {} records)",
            style(id).cyan(),
            target.url,
            limits.max_records
        );
    }
    Ok(())
}

//! Record browsing commands.

use chrono::{TimeZone, Utc};
use console::style;

use crate::cli::helpers::{open_database, truncate};
use crate::config::Config;

/// Show the newest records for a target, or per-target totals.
pub async fn cmd_records(
    config: &Config,
    target_id: Option<&str>,
    limit: i64,
) -> anyhow::Result<()> {
    let ctx = open_database(config).await?;
    let repo = ctx.records();

    let Some(target_id) = target_id else {
        let totals = repo.totals().await?;
        if totals.is_empty() {
            println!("{} No records stored", style("!").yellow());
            return Ok(());
        }
        println!("\n{}", style("Records by target").bold());
        println!("{}", "-".repeat(40));
        for (target, count) in totals {
            println!("{:<28} {:>10}", target, count);
        }
        return Ok(());
    };

    let total = repo.count(target_id).await?;
    let records = repo.recent(target_id, limit).await?;

    println!(
        "\n{} ({} stored)",
        style(format!("Records: {}", target_id)).bold(),
        total
    );
    println!("{}", "-".repeat(80));

    for record in records {
        let published = Utc
            .timestamp_millis_opt(record.published_at)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let repost = if record.is_repost { " (repost)" } else { "" };

        println!(
            "{} {} {}{}",
            style(&record.id).cyan(),
            style(format!("@{}", record.author_handle)).dim(),
            published,
            repost
        );
        if !record.content.is_empty() {
            println!("  {}", truncate(&record.content, 100));
        }
    }

    Ok(())
}

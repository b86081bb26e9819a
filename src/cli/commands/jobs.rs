//! Job history commands.

use console::style;

use crate::cli::helpers::{format_duration_ms, open_database};
use crate::config::Config;
use crate::models::JobRunStatus;
use crate::repository::JobStatusStore;

/// Show recent crawl jobs from the durable mirror.
pub async fn cmd_jobs(
    config: &Config,
    status: Option<JobRunStatus>,
    limit: i64,
) -> anyhow::Result<()> {
    let ctx = open_database(config).await?;
    let jobs = ctx.jobs().list(status, limit).await?;

    if jobs.is_empty() {
        println!("{} No jobs found", style("!").yellow());
        return Ok(());
    }

    println!(
        "\n{:<36}  {:<16}  {:<10}  {:<22}  {}",
        style("Job").bold(),
        style("Target").bold(),
        style("Status").bold(),
        style("End Reason").bold(),
        style("Started").bold()
    );
    println!("{}", "-".repeat(110));

    for job in jobs {
        let status_str = match job.status {
            JobRunStatus::Running => style(job.status.as_str()).yellow().to_string(),
            JobRunStatus::Completed => style(job.status.as_str()).green().to_string(),
            JobRunStatus::Failed => style(job.status.as_str()).red().to_string(),
        };
        let (reason, detail) = match job.summary {
            Some(ref summary) => (
                summary.end_reason.as_str().to_string(),
                format!(
                    "{} new, {}",
                    summary.new_count,
                    format_duration_ms(summary.execution_time_ms)
                ),
            ),
            None => ("-".to_string(), String::new()),
        };

        println!(
            "{:<36}  {:<16}  {:<10}  {:<22}  {} {}",
            job.job_id,
            job.target_id,
            status_str,
            reason,
            job.started_at.format("%Y-%m-%d %H:%M"),
            style(detail).dim()
        );
        if let Some(ref error) = job.error {
            println!("  {} {}", style("→").dim(), error);
        }
    }

    Ok(())
}

/// Mark every job still recorded as running as failed.
///
/// Slots live in process memory, so any row left `running` belongs to a
/// process that is gone.
pub async fn cmd_reset(config: &Config) -> anyhow::Result<()> {
    let ctx = open_database(config).await?;
    let count = ctx.jobs().fail_orphaned("reset by operator").await?;

    println!(
        "{} Marked {} orphaned job(s) as failed",
        style("✓").green(),
        count
    );
    Ok(())
}

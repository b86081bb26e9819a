//! Crawl command.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::warn;
use uuid::Uuid;

use crate::cli::helpers::{format_duration_ms, open_database, session_factory};
use crate::config::Config;
use crate::crawl::CrawlEngine;
use crate::jobs::{ExclusivityError, JobExclusivityManager, JobStatus};
use crate::models::TaskResult;
use crate::repository::{InMemoryJobStore, InMemoryRecordStore, JobStatusStore, RecordStore};

/// Crawl the given targets, running up to `pool_size` at once.
///
/// The first Ctrl-C cancels every job cooperatively; a second one drops
/// all slots and exits.
pub async fn cmd_crawl(
    config: &Config,
    target_ids: &[String],
    max_records: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if target_ids.is_empty() {
        anyhow::bail!("No targets given (pass target IDs or --all)");
    }

    let mut requests = VecDeque::new();
    for target_id in target_ids {
        let mut request = config.crawl_request(target_id).await?;
        if let Some(n) = max_records {
            request.limits.max_records = n;
        }
        requests.push_back(request);
    }

    let (records, statuses): (Arc<dyn RecordStore>, Arc<dyn JobStatusStore>) = if dry_run {
        println!(
            "{} Dry run: records are kept in memory only",
            style("!").yellow()
        );
        let records: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let statuses: Arc<dyn JobStatusStore> = Arc::new(InMemoryJobStore::new());
        (records, statuses)
    } else {
        let ctx = open_database(config).await?;
        let records: Arc<dyn RecordStore> = Arc::new(ctx.records());
        let statuses: Arc<dyn JobStatusStore> = Arc::new(ctx.jobs());
        (records, statuses)
    };

    let engine = CrawlEngine::new(session_factory(config)?, records, statuses.clone())
        .with_bandwidth(config.bandwidth.policy());
    let manager = Arc::new(JobExclusivityManager::new(
        Arc::new(engine),
        config.pool_size,
    ));

    let interrupt = tokio::spawn(watch_interrupts(manager.clone(), statuses));

    let multi = MultiProgress::new();
    let style_spinner = ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?;
    let mut submitted: Vec<(Uuid, ProgressBar)> = Vec::new();
    let mut results = Vec::new();

    while let Some(request) = requests.pop_front() {
        match manager.submit(request.clone()) {
            Ok(job_id) => {
                let pb = multi.add(ProgressBar::new_spinner());
                pb.set_style(style_spinner.clone());
                pb.enable_steady_tick(Duration::from_millis(100));
                pb.set_message(format!("{}: starting", request.target_id));
                spawn_ticker(manager.clone(), job_id, request.target_id.clone(), pb.clone());
                submitted.push((job_id, pb));
            }
            Err(ExclusivityError::AtCapacity { .. }) => {
                // Wait for the oldest job to free a slot, then retry.
                requests.push_front(request);
                if let Some((job_id, pb)) = take_oldest(&manager, &mut submitted) {
                    results.push(finish(&manager, job_id, &pb).await?);
                }
            }
            Err(e @ ExclusivityError::Conflict { .. }) => {
                warn!("Skipping {}: {}", request.target_id, e);
                println!("{} {}", style("!").yellow(), e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    for (job_id, pb) in submitted {
        results.push(finish(&manager, job_id, &pb).await?);
    }
    interrupt.abort();

    let failures = results.iter().filter(|r| !r.success).count();
    for result in &results {
        print_result(result);
    }

    if failures > 0 {
        anyhow::bail!("{} of {} crawl(s) failed", failures, results.len());
    }
    Ok(())
}

fn take_oldest(
    manager: &JobExclusivityManager,
    submitted: &mut Vec<(Uuid, ProgressBar)>,
) -> Option<(Uuid, ProgressBar)> {
    let oldest = manager.running().into_iter().next()?;
    let idx = submitted.iter().position(|(id, _)| *id == oldest.job_id)?;
    Some(submitted.remove(idx))
}

async fn finish(
    manager: &JobExclusivityManager,
    job_id: Uuid,
    pb: &ProgressBar,
) -> anyhow::Result<TaskResult> {
    let result = manager.wait(job_id).await?;
    pb.finish_and_clear();
    Ok(result)
}

fn spawn_ticker(
    manager: Arc<JobExclusivityManager>,
    job_id: Uuid,
    target_id: String,
    pb: ProgressBar,
) {
    tokio::spawn(async move {
        loop {
            match manager.status(job_id) {
                Ok(JobStatus::Running { progress, .. }) => {
                    pb.set_message(format!(
                        "{}: {} new, {} dup, {} scrolls",
                        target_id,
                        progress.new_count,
                        progress.task_local_duplicate_count + progress.persisted_duplicate_count,
                        progress.scroll_attempts
                    ));
                }
                Ok(JobStatus::Finished(_)) | Err(_) => break,
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });
}

async fn watch_interrupts(manager: Arc<JobExclusivityManager>, statuses: Arc<dyn JobStatusStore>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    let n = manager.cancel_all();
    eprintln!(
        "\n{} Cancelling {} job(s); press Ctrl-C again to abort",
        style("!").yellow(),
        n
    );

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    manager.force_reset();
    if let Err(e) = statuses.fail_orphaned("aborted by operator").await {
        warn!("Failed to mark aborted jobs: {}", e);
    }
    std::process::exit(130);
}

fn print_result(result: &TaskResult) {
    let marker = if result.success {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "{} {}: {} ({} new, {} task-local dup, {} persisted dup, {} skipped, {} scrolls, {})",
        marker,
        style(&result.target_id).cyan(),
        result.end_reason,
        result.new_count,
        result.task_local_duplicate_count,
        result.persisted_duplicate_count,
        result.skipped_count,
        result.scroll_attempts,
        format_duration_ms(result.execution_time_ms)
    );
    if let Some(ref error) = result.error {
        println!("  {} {}: {}", style("→").dim(), error.code, error.message);
    }
}

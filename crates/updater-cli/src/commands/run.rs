//! `run`: the boot hook
//!
//! The orchestrator is synchronous and may block on storage for a long time,
//! so it runs on the blocking pool while this task renders progress from the
//! broadcast sink. The channel closes when the worker drops the orchestrator.

use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};
use updater_core::prelude::*;

use crate::error::CliError;
use crate::output;

pub async fn execute(config: &UpdaterConfig, json: bool) -> Result<()> {
    let channel = BroadcastProgressSink::default();
    let rx = channel.subscribe();
    let sink = FanoutSink::new().with(channel).with(TracingProgressSink::default());

    let mut orchestrator = UpdateOrchestrator::new(config.ports(Box::new(sink)), config.layout());
    let renderer = tokio::spawn(render_progress(rx, json));

    info!(boot_mode_path = %config.boot_mode_path.display(), "Running update worker");
    let result = tokio::task::spawn_blocking(move || orchestrator.run())
        .await
        .context("update worker did not finish")?;

    renderer.await.context("progress renderer did not finish")?;

    let outcome = result.map_err(CliError::PhaseFailed)?;
    output::print_outcome(&outcome, json);
    Ok(())
}

async fn render_progress(mut rx: broadcast::Receiver<UpdateProgress>, json: bool) {
    let mut bar: Option<ProgressBar> = None;

    loop {
        let progress = match rx.recv().await {
            Ok(progress) => progress,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress renderer lagging");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if json {
            output::print_progress_line(&progress);
            continue;
        }

        let pb = bar.get_or_insert_with(new_bar);
        pb.set_position(u64::from(progress.percent));
        pb.set_message(format!(
            "[{}/{}] {}",
            progress.stage_idx,
            progress.total_stages.saturating_add(1),
            progress.status
        ));

        if progress.failed {
            pb.abandon_with_message(progress.status.red().to_string());
        } else if progress.stage == Stage::Completed {
            pb.finish_with_message(progress.status.green().to_string());
        }
    }
}

fn new_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

use updater_core::{BootMode, Manifest, UpdateOutcome, UpdateProgress};

use crate::error;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "exit_code": error::exit_code(error),
            "causes": error.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format error as JSON: {}", e),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    for cause in error.chain().skip(1) {
        eprintln!("  {} {}", "Caused by:".yellow(), cause);
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format output as JSON: {}", e),
    }
}

/// One progress snapshot as a single JSON line
pub fn print_progress_line(progress: &UpdateProgress) {
    match serde_json::to_string(progress) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format progress as JSON: {}", e),
    }
}

fn mode_colored(mode: BootMode) -> ColoredString {
    match mode {
        BootMode::Normal => mode.as_str().green(),
        BootMode::PreUpdate | BootMode::PostUpdate => mode.as_str().yellow(),
        BootMode::Update => mode.as_str().cyan(),
    }
}

/// Print the result of `run`
pub fn print_outcome(outcome: &UpdateOutcome, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "outcome": outcome,
            "boot_mode": outcome.boot_mode(),
        }));
        return;
    }

    match outcome {
        UpdateOutcome::NoOp { found } => {
            println!(
                "{} not an update boot ({}), boot mode reset to {}",
                "•".dimmed(),
                found,
                mode_colored(BootMode::Normal)
            );
        }
        UpdateOutcome::BackupCompleted { backup_path } => {
            println!(
                "{} Settings backed up to {}",
                "✓".green(),
                backup_path.display()
            );
            println!("  Next boot: {}", mode_colored(outcome.boot_mode()));
        }
        UpdateOutcome::RestoreCompleted { resources } => {
            println!("{} Settings restored", "✓".green());
            match resources {
                Some(summary) => println!(
                    "  Resources: {} ({}/{} entries)",
                    summary.bundle.bold(),
                    summary.processed_entries,
                    summary.total_entries
                ),
                None => println!("  Resources: {}", "none".dimmed()),
            }
        }
    }
}

/// Staged package details printed by `prepare`
#[derive(Debug, Serialize)]
pub struct PreparedPackage {
    pub package: PathBuf,
    pub manifest: Manifest,
    pub boot_mode: BootMode,
}

pub fn print_prepared(prepared: &PreparedPackage, json: bool) {
    if json {
        print_json(&json!({ "success": true, "prepared": prepared }));
        return;
    }

    println!(
        "{} Package {} staged",
        "✓".green(),
        prepared.manifest.info.bold()
    );
    println!("  Path: {}", prepared.package.display());
    print_manifest_human(&prepared.manifest);
    println!("  Boot mode: {}", mode_colored(prepared.boot_mode));
}

/// Snapshot shown by `status`
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub boot_mode: BootMode,
    pub changed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub package: Option<PathBuf>,
    pub manifest: Option<Manifest>,
    pub problem: Option<String>,
}

pub fn print_status(status: &StatusReport, json: bool) {
    if json {
        print_json(&json!({ "success": true, "status": status }));
        return;
    }

    println!("{} {}", "Boot mode:".bold(), mode_colored(status.boot_mode));
    if let Some(changed_at) = status.changed_at {
        println!(
            "  Last changed: {}",
            changed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    match &status.package {
        Some(package) => println!("{} {}", "Package:".bold(), package.display()),
        None => println!("{} {}", "Package:".bold(), "none".dimmed()),
    }
    if let Some(manifest) = &status.manifest {
        print_manifest_human(manifest);
    }
    if let Some(problem) = &status.problem {
        println!("  {} {}", "!".yellow().bold(), problem.yellow());
    }
}

fn print_manifest_human(manifest: &Manifest) {
    println!("  Info: {}", manifest.info);
    println!("  Target: f{}", manifest.target);
    match manifest.loader_crc {
        Some(crc) => println!("  Loader: {} (crc {:08X})", manifest.loader, crc),
        None => println!("  Loader: {}", manifest.loader),
    }
    if let Some(radio) = &manifest.radio {
        println!("  Radio: {}", radio);
    }
    match manifest.resource_bundle() {
        Some(bundle) => println!("  Resources: {}", bundle),
        None => println!("  Resources: {}", "none".dimmed()),
    }
}

/// Print the result of `set-mode`
pub fn print_mode_set(previous: BootMode, mode: BootMode, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "previous": previous,
            "boot_mode": mode,
        }));
    } else {
        println!(
            "{} Boot mode {} → {}",
            "✓".green(),
            mode_colored(previous),
            mode_colored(mode)
        );
    }
}

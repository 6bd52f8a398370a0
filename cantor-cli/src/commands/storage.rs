//! Storage command handlers

use anyhow::Result;
use cantor_core::dto::stats::DirUsage;
use cantor_runner::Config;
use colored::*;

use crate::engine::Engine;

/// Run a single expiry sweep
///
/// Nothing is running in this process, so every expired entry counts as
/// abandoned and is deleted.
pub async fn handle_sweep(json: bool, config: &Config) -> Result<()> {
    let engine = Engine::build(config)?;
    let report = engine.reaper.sweep().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_quiet() {
        println!("{}", "Nothing has expired.".yellow());
        return Ok(());
    }

    println!("{}", "Sweep complete:".bold());
    println!("  Uploads deleted: {}", report.upload_deleted);
    println!("  Outputs deleted: {}", report.output_deleted);
    if report.errors > 0 {
        println!(
            "  Errors:          {}",
            report.errors.to_string().red()
        );
    }

    Ok(())
}

/// Show storage usage
pub async fn handle_storage(json: bool, config: &Config) -> Result<()> {
    let engine = Engine::build(config)?;
    let usage = engine.reaper.storage_usage().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
        return Ok(());
    }

    println!("{}", "Storage usage:".bold());
    print_usage("Uploads", &usage.upload, &config.upload_dir.display().to_string());
    print_usage("Outputs", &usage.output, &config.output_dir.display().to_string());
    print_usage("Total", &usage.total, "");
    println!(
        "  Files expire after {} hours",
        usage.expiry_hours.to_string().cyan()
    );

    Ok(())
}

fn print_usage(label: &str, usage: &DirUsage, path: &str) {
    println!(
        "  {:<8} {:>9.2} MB in {:>4} file(s) {}",
        label,
        usage.size_mb(),
        usage.file_count,
        path.dimmed()
    );
}

//! vidname - give hash-named video files descriptive names.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use vidname::inference::RenamePlanEntry;
use vidname::{FfmpegFrameExtractor, Pipeline, PipelineStats, RenameEngine, Settings, scan};

const LOG_FILE: &str = "video_renamer.log";

/// How many errors the summary lists before truncating
const SUMMARY_ERRORS: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "vidname")]
#[command(version)]
#[command(about = "Rename hash-named video files using AI screenshot analysis")]
#[command(long_about = "Scans a directory for videos whose names look like hashes, \
    takes a few screenshots of each, asks a vision endpoint for a descriptive name \
    and renames the files.\n\n\
    EXAMPLES:\n    \
    vidname ~/Downloads --dry-run\n    \
    vidname ~/Downloads --workers 4 --yes\n    \
    vidname ~/Downloads --interactive\n    \
    vidname ~/Downloads --min-mb 5 --max-mb 2000")]
struct Args {
    /// Directory to scan
    dir: PathBuf,

    /// Show what would be renamed without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Only look at the top level of the directory
    #[arg(long)]
    no_recursive: bool,

    /// Videos processed concurrently (1-10)
    #[arg(short, long)]
    workers: Option<u32>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Confirm every rename, optionally typing a name yourself
    #[arg(short, long)]
    interactive: bool,

    /// Do not ask for confirmation before starting
    #[arg(short, long)]
    yes: bool,

    /// Ignore videos smaller than this many MB
    #[arg(long, value_name = "MB")]
    min_mb: Option<f64>,

    /// Ignore videos larger than this many MB
    #[arg(long, value_name = "MB")]
    max_mb: Option<f64>,
}

fn init_logging(level: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}

fn prompt(question: &str) -> Result<String> {
    print!("{question}");
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = prompt(&format!("{question} [y/N] "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

/// Walk the plan with the user: accept, skip or type a custom name.
fn review_plan(engine: &RenameEngine, plan: Vec<RenamePlanEntry>) -> Result<Vec<RenamePlanEntry>> {
    let preview = engine.preview(&plan);
    let mut accepted = Vec::with_capacity(plan.len());

    for (mut entry, target) in plan.into_iter().zip(preview) {
        println!();
        println!("  {}", target.original_name);
        println!("  -> {}", target.new_name);

        loop {
            let answer = prompt("  [a]ccept, [s]kip, [c]ustom name: ")?;
            match answer.to_lowercase().as_str() {
                "" | "a" => {
                    accepted.push(entry);
                    break;
                }
                "s" => {
                    info!("Skipped by user: {}", target.original_name);
                    break;
                }
                "c" => {
                    let custom = prompt("  New name: ")?;
                    if custom.is_empty() {
                        println!("  Name cannot be empty");
                        continue;
                    }
                    entry.proposed = custom;
                    accepted.push(entry);
                    break;
                }
                _ => println!("  Please answer a, s or c"),
            }
        }
    }

    Ok(accepted)
}

fn print_summary(stats: &PipelineStats, dry_run: bool) {
    println!();
    println!("Summary{}", if dry_run { " (dry run)" } else { "" });
    println!("  total:     {}", stats.total);
    println!("  processed: {}", stats.processed);
    println!("  renamed:   {}", stats.renamed);
    println!("  failed:    {}", stats.failed);

    if !stats.errors.is_empty() {
        println!("Errors:");
        for err in stats.errors.iter().take(SUMMARY_ERRORS) {
            println!("  - {err}");
        }
        if stats.errors.len() > SUMMARY_ERRORS {
            println!("  ... and {} more", stats.errors.len() - SUMMARY_ERRORS);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::from_env().context("Invalid configuration")?;
    if let Some(workers) = args.workers {
        settings.max_workers = workers;
    }

    let level = if args.verbose {
        "debug".to_string()
    } else {
        settings.log_level.to_lowercase()
    };
    let _guard = init_logging(&level);

    let mut videos =
        scan::find_garbled_files(&args.dir, !args.no_recursive, &settings.video_extensions);
    if args.min_mb.is_some() || args.max_mb.is_some() {
        videos = scan::filter_by_size(videos, args.min_mb, args.max_mb);
    }
    if videos.is_empty() {
        println!("No hash-named videos found in {}", args.dir.display());
        return Ok(());
    }

    println!("Found {} videos to rename:", videos.len());
    for video in &videos {
        println!("  {}", video.display());
    }

    if !args.yes && !args.dry_run && !args.interactive && !confirm("Rename these files?")? {
        println!("Cancelled");
        return Ok(());
    }

    let extractor =
        FfmpegFrameExtractor::new(&settings.temp_dir, settings.screenshot_count as usize)?;
    let mut engine = RenameEngine::new(args.dry_run, settings.video_extensions.clone());
    let pipeline = Pipeline::new(settings, extractor)?;

    let stats = if args.interactive {
        pipeline.check_endpoint().await?;
        let (plan, stats) = pipeline.plan_renames(&videos).await;
        let plan = review_plan(&engine, plan)?;
        if plan.is_empty() {
            warn!("Nothing left to rename");
        }
        pipeline.apply_plan(&plan, &mut engine, stats)
    } else {
        pipeline.run(&videos, &mut engine).await?
    };

    print_summary(&stats, args.dry_run);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["vidname", "videos"]).unwrap();
        assert_eq!(args.dir, PathBuf::from("videos"));
        assert!(!args.dry_run && !args.no_recursive && !args.interactive && !args.yes);
        assert_eq!(args.workers, None);
        assert_eq!((args.min_mb, args.max_mb), (None, None));
    }

    #[test]
    fn test_args_size_bounds() {
        let args = Args::try_parse_from([
            "vidname", "videos", "--min-mb", "5", "--max-mb", "1500.5", "--dry-run", "-w", "4",
        ])
        .unwrap();
        assert_eq!(args.min_mb, Some(5.0));
        assert_eq!(args.max_mb, Some(1500.5));
        assert!(args.dry_run);
        assert_eq!(args.workers, Some(4));

        assert!(Args::try_parse_from(["vidname", "videos", "--min-mb", "big"]).is_err());
    }
}

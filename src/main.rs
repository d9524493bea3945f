//! SkyTrack CLI - Sweep Orchestrator for SkyPilot
//!
//! Runs, inspects and resumes hyperparameter and benchmark sweeps.

use clap::Parser;
use serde_json::Value;
use skytrack::cluster::{ClusterService, SkyCli};
use skytrack::config::{CliArgs, Commands, SweepConfig, DEFAULT_STATE_FILE, DEFAULT_TASKS_DIR};
use skytrack::core::SweepEngine;
use skytrack::error::{Result, SkyTrackError};
use skytrack::progress::{styled_status, SweepProgress};
use skytrack::state::StateStore;
use skytrack::tracking::{JsonlSink, RunConfig, RunHandle, SystemMonitor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status when `--fail-on-error` is set and jobs failed
const EXIT_JOBS_FAILED: i32 = 2;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_logging(&args);

    // Handle result
    match run(args) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(args: &CliArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<i32> {
    match &args.command {
        Commands::Tune {
            config,
            dry_run,
            progress,
            poll_interval,
            fail_on_error,
            metrics_log,
            monitor_interval,
        } => {
            let options = TuneOptions {
                dry_run: *dry_run,
                progress: *progress && !args.quiet,
                poll_interval: poll_interval.map(Duration::from_secs),
                fail_on_error: *fail_on_error,
                metrics_log: metrics_log.clone(),
                monitor_interval: monitor_interval.map(Duration::from_secs),
            };
            cmd_tune(config, &args.sky_binary, options)
        }
        Commands::Status { config, state_file } => {
            cmd_status(config.as_deref(), state_file.as_deref())
        }
        Commands::Clusters => cmd_clusters(&args.sky_binary),
        Commands::LogArtifacts {
            paths,
            metrics_log,
            name,
            kind,
            run_name,
        } => cmd_log_artifacts(paths, metrics_log, name, kind, run_name.clone()),
    }
}

struct TuneOptions {
    dry_run: bool,
    progress: bool,
    poll_interval: Option<Duration>,
    fail_on_error: bool,
    metrics_log: Option<PathBuf>,
    monitor_interval: Option<Duration>,
}

fn cmd_tune(config_path: &Path, sky_binary: &str, options: TuneOptions) -> Result<i32> {
    let config = SweepConfig::load(config_path)?;

    let mut sky = SkyCli::new(sky_binary, &config.tasks_dir)?;
    if let Some(template) = &config.task_template {
        sky = sky.with_task_template(template)?;
        if config.relies_on_task_run() && !sky.has_template_run() {
            return Err(SkyTrackError::config(format!(
                "no 'command' is set and task template {} has no run section",
                template.display()
            )));
        }
    }

    let run_config = RunConfig {
        project: None,
        run_name: Some(config.display_name().to_string()),
        config: match serde_json::to_value(&config)? {
            Value::Object(map) => map,
            _ => Default::default(),
        },
    };

    let mut engine = SweepEngine::new(config, Arc::new(sky))?;

    if options.dry_run {
        println!("=== Dry Run Mode ===");
        println!("No jobs will be submitted.");
        println!();
        let specs = engine.dry_run()?;
        for spec in &specs {
            println!("{}  (cluster {})", spec.name, spec.cluster);
            if spec.command.is_empty() {
                println!("  command:   (task template run)");
            } else {
                println!("  command:   {}", spec.command);
            }
            println!("  resources: {}", spec.resources);
        }
        println!("\n{} jobs to run", specs.len());
        return Ok(0);
    }

    let progress = if options.progress {
        SweepProgress::new()
    } else {
        SweepProgress::disabled()
    };
    engine = engine.with_progress(progress);

    if let Some(interval) = options.poll_interval {
        engine = engine.with_poll_interval(interval);
    }

    let mut monitor = None;
    if let Some(path) = &options.metrics_log {
        let run = Arc::new(RunHandle::new(run_config, Arc::new(JsonlSink::open(path)?)));
        if let Some(interval) = options.monitor_interval {
            monitor = Some(SystemMonitor::start(Arc::clone(&run), interval));
        }
        engine = engine.with_run(run);
    }

    let summary = engine.run();
    if let Some(monitor) = monitor {
        monitor.stop();
    }
    let summary = summary?;

    summary.print_summary();

    if options.fail_on_error && !summary.failed.is_empty() {
        return Ok(EXIT_JOBS_FAILED);
    }
    Ok(0)
}

fn cmd_status(config: Option<&Path>, state_file: Option<&Path>) -> Result<i32> {
    let path = match (state_file, config) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(config)) => SweepConfig::load(config)?.state_file,
        (None, None) => PathBuf::from(DEFAULT_STATE_FILE),
    };

    let store = StateStore::new(&path);
    if !store.exists() {
        println!("No state file at {}", path.display());
        return Ok(0);
    }
    let jobs = store.load()?;

    println!("=== Sweep Status ({}) ===", path.display());
    println!(
        "{:<32} {:<8} {:>8}  {:<24} DETAILS",
        "JOB", "STATUS", "ATTEMPTS", "SUBMISSION"
    );
    for job in &jobs.jobs {
        let details = match &job.error_message {
            Some(error) => error.clone(),
            None => job.parameters.to_string(),
        };
        println!(
            "{:<32} {:<8} {:>8}  {:<24} {}",
            job.slug,
            styled_status(job.status),
            job.attempts,
            job.submission_id.as_deref().unwrap_or("-"),
            details
        );
    }

    let counts = jobs.counts();
    println!(
        "\n{} jobs: {} done, {} failed, {} running, {} pending (updated {})",
        counts.total(),
        counts.done,
        counts.failed,
        counts.running,
        counts.pending,
        jobs.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(0)
}

fn cmd_clusters(sky_binary: &str) -> Result<i32> {
    let sky = SkyCli::new(sky_binary, DEFAULT_TASKS_DIR)?;
    let clusters = sky.list_active_clusters()?;

    if clusters.is_empty() {
        println!("No active clusters");
    } else {
        println!("=== Active Clusters ===");
        for name in clusters {
            println!("  {}", name);
        }
    }
    Ok(0)
}

fn cmd_log_artifacts(
    paths: &[PathBuf],
    metrics_log: &Path,
    name: &str,
    kind: &str,
    run_name: Option<String>,
) -> Result<i32> {
    let sink = Arc::new(JsonlSink::open(metrics_log)?);
    let run = RunHandle::new(
        RunConfig {
            run_name,
            ..Default::default()
        },
        sink,
    );
    let artifact = run.log_artifacts(paths, name, kind)?;
    println!(
        "Logged {} ({} files) for {} to {}",
        artifact.name,
        artifact.files.len(),
        run.name(),
        metrics_log.display()
    );
    Ok(0)
}

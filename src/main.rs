mod cli;

use audioforge::conversion::default_output_directory;
use audioforge::{Scheduler, SchedulerSettings};
use audioforge_av::ToolRegistry;
use audioforge_core::config::{self, Config};
use audioforge_core::events::{Event, EventPayload};
use audioforge_core::{
    is_supported_input, EventBus, FanoutNotifier, JobId, JobStatus, LogNotifier, Notifier,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Options of the `convert` subcommand that override the config file.
struct ConvertOptions {
    inputs: Vec<PathBuf>,
    format: Option<audioforge_core::OutputFormat>,
    quality: Option<audioforge_core::AudioQuality>,
    jobs: Option<usize>,
    output_dir: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "audioforge=trace,audioforge_av=debug,audioforge_core=debug".to_string()
        } else {
            "audioforge=info,audioforge_av=info,audioforge_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            inputs,
            format,
            quality,
            jobs,
            output_dir,
        } => {
            let options = ConvertOptions {
                inputs,
                format,
                quality,
                jobs,
                output_dir,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(options, cli.config.as_deref(), cli.verbose))
        }
        Commands::CheckTools { json } => check_tools(cli.config.as_deref(), json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("audioforge {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn convert(
    options: ConvertOptions,
    config_path: Option<&Path>,
    verbose: bool,
) -> Result<ExitCode> {
    let mut config = config::load_config_or_default(config_path)?;
    apply_overrides(&mut config, &options);
    config.validate()?;

    let files = collect_inputs(&options.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No FLAC files found in the given inputs");
    }

    let tools = ToolRegistry::discover(&config.tools);
    let bus = Arc::new(EventBus::default());
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![bus.clone() as Arc<dyn Notifier>];
    if verbose {
        notifiers.push(Arc::new(LogNotifier));
    }
    let notifier = FanoutNotifier::new(notifiers);
    let mut events = bus.subscribe();

    let settings = SchedulerSettings::from_config(&config);
    let output_dir = settings
        .output_directory
        .clone()
        .unwrap_or_else(default_output_directory);
    let scheduler = Scheduler::new(settings, tools, Arc::new(notifier));

    let mut names: HashMap<JobId, String> = HashMap::new();
    for file in &files {
        match scheduler.submit(file.clone()).await {
            Some(id) => {
                names.insert(id, display_name(file));
            }
            None => println!("Skipping duplicate {}", file.display()),
        }
    }

    println!(
        "Converting {} file(s) to {} ({}), {} at a time, into {}",
        names.len(),
        config.conversion.default_output_format,
        config.conversion.audio_quality,
        config.conversion.max_concurrent_tasks,
        output_dir.display()
    );

    let signal_scheduler = scheduler.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        let count = signal_scheduler.cancel_all().await;
        println!("Interrupted: cancelling {count} running conversion(s)");
    });

    scheduler.convert_all().await;

    let mut printer = ProgressPrinter::new(names);
    {
        let idle = scheduler.wait_idle();
        tokio::pin!(idle);
        loop {
            tokio::select! {
                _ = &mut idle => break,
                event = events.recv() => match event {
                    Ok(event) => printer.print(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Progress display skipped {skipped} events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        printer.print(&event);
    }
    signal_task.abort();

    let jobs = scheduler.jobs().await;
    let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
    let (completed, failed, cancelled, pending) = (
        count(JobStatus::Completed),
        count(JobStatus::Failed),
        count(JobStatus::Cancelled),
        count(JobStatus::Pending),
    );

    println!();
    println!("Completed: {completed}  Failed: {failed}  Cancelled: {cancelled}  Not started: {pending}");
    for job in jobs.iter().filter(|j| j.status == JobStatus::Failed) {
        println!(
            "  ✗ {}: {}",
            job.file_name,
            job.error_detail.as_deref().unwrap_or("unknown error")
        );
    }

    if completed == jobs.len() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn apply_overrides(config: &mut Config, options: &ConvertOptions) {
    if let Some(format) = options.format {
        config.conversion.default_output_format = format;
    }
    if let Some(quality) = options.quality {
        config.conversion.audio_quality = quality;
    }
    if let Some(jobs) = options.jobs {
        config.conversion.max_concurrent_tasks = jobs;
    }
    if let Some(ref dir) = options.output_dir {
        config.conversion.output_directory = Some(dir.clone());
    }
}

/// Expand directories one level to their FLAC files (sorted by name); keep
/// explicit files as given.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_supported_input(p))
                .collect();
            found.sort();
            files.extend(found);
        } else if is_supported_input(input) {
            files.push(input.clone());
        } else {
            println!("Skipping unsupported file {}", input.display());
        }
    }
    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Prints one line per state change and per 10% of progress.
struct ProgressPrinter {
    names: HashMap<JobId, String>,
    last_decile: HashMap<JobId, u32>,
}

impl ProgressPrinter {
    fn new(names: HashMap<JobId, String>) -> Self {
        Self {
            names,
            last_decile: HashMap::new(),
        }
    }

    fn name(&self, id: &JobId) -> &str {
        self.names.get(id).map(String::as_str).unwrap_or("?")
    }

    fn print(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::JobStarted { job_id } => {
                println!("[  0%] {}", self.name(job_id));
            }
            EventPayload::JobProgress { job_id, progress } => {
                let decile = (progress * 10.0).floor() as u32;
                let last = self.last_decile.entry(*job_id).or_insert(0);
                if decile <= *last || decile >= 10 {
                    return;
                }
                *last = decile;
                println!("[{:>3}%] {}", decile * 10, self.name(job_id));
            }
            EventPayload::JobCompleted {
                job_id,
                output_path,
            } => {
                let out = output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("[done] {} -> {}", self.name(job_id), out);
            }
            EventPayload::JobFailed { job_id, error } => {
                println!("[fail] {}: {}", self.name(job_id), error);
            }
            EventPayload::JobCancelled { job_id } => {
                println!("[stop] {}", self.name(job_id));
            }
            EventPayload::JobQueued { .. } | EventPayload::JobRemoved { .. } => {}
        }
    }
}

/// Resolve when Ctrl+C or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}

fn check_tools(config_path: Option<&Path>, json: bool) -> Result<ExitCode> {
    let config = config::load_config_or_default(config_path)?;
    let info = ToolRegistry::discover(&config.tools).check();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(if info.available {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    println!("Checking external tools...\n");

    let status = if info.available { "✓" } else { "✗" };
    print!("{} {}", status, info.name);
    if let Some(ref version) = info.version {
        print!(" ({})", version);
    }
    if let Some(ref path) = info.path {
        print!(" - {}", path.display());
    }
    println!();

    println!();
    if info.available {
        println!("ffmpeg is available!");
        Ok(ExitCode::SUCCESS)
    } else if info.path.is_some() {
        println!("ffmpeg was found but is not executable.");
        Ok(ExitCode::FAILURE)
    } else {
        println!("ffmpeg is missing. Install it, place it next to audioforge, or set tools.ffmpeg_path.");
        Ok(ExitCode::FAILURE)
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Format: {}", config.conversion.default_output_format);
    println!("  Quality: {}", config.conversion.audio_quality);
    println!(
        "  Max concurrent tasks: {}",
        config.conversion.max_concurrent_tasks
    );
    match config.conversion.output_directory {
        Some(ref dir) => println!("  Output directory: {}", dir.display()),
        None => println!(
            "  Output directory: {} (default)",
            default_output_directory().display()
        ),
    }
    match config.tools.ffmpeg_path {
        Some(ref p) => println!("  ffmpeg: {}", p.display()),
        None => println!("  ffmpeg: auto-detect"),
    }

    Ok(())
}

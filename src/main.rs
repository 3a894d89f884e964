use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use allegro_enricher::block::BlockDetector;
use allegro_enricher::browser::ChromeSessionFactory;
use allegro_enricher::cli::Cli;
use allegro_enricher::config::{AppConfig, ConfigError};
use allegro_enricher::logger;
use allegro_enricher::output::OutputSink;
use allegro_enricher::pacing::Pacing;
use allegro_enricher::report::{self, RunReporter};
use allegro_enricher::supervisor::{PoolSupervisor, ShutdownFlag};
use allegro_enricher::task_source::{self, TaskSource};
use allegro_enricher::worker::{WorkerContext, WorkerSettings};

/// Queued logins listed by a dry run before truncating
const DRY_RUN_LISTED: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle --init flag first (before any other processing)
    if cli.init {
        match AppConfig::create_default_config(&cli.config) {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run allegro-enricher again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = cli.validate() {
        eprintln!("❌ Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let mut config = match AppConfig::load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(ConfigError::FileNotFound(path)) => {
            match AppConfig::prompt_create_config(&path) {
                Ok(Some(created_path)) => {
                    println!("✅ Created default configuration file at: {}", created_path.display());
                    println!("   Edit this file to customize settings, then run allegro-enricher again.");
                    std::process::exit(0);
                }
                Ok(None) => {
                    eprintln!("❌ Configuration file not found at: {}", path.display());
                    eprintln!("   Run with --init to create a default configuration file.");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Failed to create configuration file: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = logger::init_tracing(cli.verbosity(), cli.log_file.as_deref()) {
        eprintln!("⚠️  Warning: {:#}. Continuing without structured logs.", e);
    }

    let tasks = match task_source::load(&config.files.input, &config.files.output) {
        Ok(tasks) => tasks,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        print_dry_run(&tasks);
        std::process::exit(0);
    }

    if tasks.queue.is_empty() {
        println!("✅ Nothing to do: every seller in {} is already enriched.", config.files.input.display());
        std::process::exit(0);
    }

    let sink = match OutputSink::initialize(&config.files.output, tasks.schema.clone()) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    // First Ctrl-C: stop pulling new sellers. Second: exit immediately.
    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    let pressed = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if pressed.swap(true, Ordering::SeqCst) {
            eprintln!("\n⚠️  Force exiting.");
            std::process::exit(130); // 130 = 128 + SIGINT(2)
        }
        handler_flag.interrupt();
        eprintln!("\n⚠️  Interrupt received. Finishing current sellers; press Ctrl-C again to exit now.");
    })
    .unwrap_or_else(|e| {
        eprintln!("⚠️  Warning: Failed to set Ctrl-C handler: {}. Interrupt signals may not be handled gracefully.", e);
    });

    let queued = tasks.queue.len();
    let progress = logger::start_progress(queued as u64);
    let reporter = Arc::new(RunReporter::new(
        queued,
        config.files.output.display().to_string(),
        progress,
    ));

    let ctx = WorkerContext {
        queue: Arc::new(tasks.queue),
        sink: Arc::new(sink),
        detector: Arc::new(BlockDetector::from_config(&config.detection)),
        factory: Arc::new(ChromeSessionFactory::new(
            config.browser.clone(),
            config.pacing.navigation_timeout(),
        )),
        reporter: Arc::clone(&reporter),
        shutdown: shutdown.clone(),
        settings: Arc::new(WorkerSettings {
            target: config.target.clone(),
            pacing: Pacing::new(config.pacing.settle(), config.pacing.cooldown()),
            restart_after: config.pool.restart_after,
            max_retries: config.pool.max_retries,
        }),
    };

    info!(
        "Enriching {} sellers from {} into {}",
        queued,
        config.files.input.display(),
        config.files.output.display()
    );

    let outcome = PoolSupervisor::new(ctx)
        .run(config.pool.size, config.pool.start_delay())
        .await;
    logger::finish_progress();

    let status = outcome.status(&reporter.totals());
    if outcome.startup_failures() > 0 {
        warn!("{} worker(s) failed to start a browser session", outcome.startup_failures());
    }
    let summary = reporter.finish(status);

    if let Some(path) = &cli.summary_file {
        report::export_summary(&summary, path)
            .with_context(|| format!("Failed to export run summary to {}", path.display()))?;
        info!("Run summary written to {}", path.display());
    }

    report::print_final_summary(&summary);
    std::process::exit(status.exit_code());
}

fn print_dry_run(tasks: &TaskSource) {
    let stats = &tasks.stats;
    println!("Input rows: {}", stats.input_rows);
    println!("Already complete: {}", stats.already_complete);
    println!("Duplicates skipped: {}", stats.duplicates);
    println!("Rows without login: {}", stats.missing_login);
    println!("Sellers to process: {}", tasks.queue.len());
    println!("Output columns: {}", tasks.schema.join(","));

    let logins = tasks.queue.logins();
    for login in logins.iter().take(DRY_RUN_LISTED) {
        println!("  {}", login);
    }
    if logins.len() > DRY_RUN_LISTED {
        println!("  ... and {} more", logins.len() - DRY_RUN_LISTED);
    }
}

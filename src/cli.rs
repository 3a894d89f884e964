use clap::Parser;
use std::path::PathBuf;

use crate::config::{AppConfig, CONFIG_PATH};
use crate::logger::VerbosityLevel;

#[derive(Parser, Debug)]
#[command(name = "allegro-enricher")]
#[command(about = "Enriches marketplace sellers with business registry data, reputation and a quality segment")]
#[command(version)]
pub struct Cli {
    /// Create default configuration file at ./config/allegro-enricher.toml
    #[arg(long)]
    pub init: bool,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = CONFIG_PATH)]
    pub config: PathBuf,

    /// Input dataset with a 'login' column (overrides config)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output dataset, created or appended to (overrides config)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Number of parallel browser sessions (overrides config)
    #[arg(short = 'j', long, value_name = "N")]
    pub pool_size: Option<usize>,

    /// Seconds between worker startups (overrides config)
    #[arg(long, value_name = "SECS")]
    pub start_delay: Option<u64>,

    /// Restart a session after this many written sellers (overrides config)
    #[arg(long, value_name = "N")]
    pub restart_after: Option<u32>,

    /// Session replacements allowed per blocked seller (overrides config)
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Run Chrome without a window (overrides config)
    #[arg(long)]
    pub headless: bool,

    /// Load and filter the input, print the work queue, and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Write the run summary as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub summary_file: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Verbose logging (-v for navigation steps, -vv for everything)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only warnings, errors and the final summary
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Silent
        } else {
            VerbosityLevel::from_verbose_count(self.verbose)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size == Some(0) {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.max_retries == Some(0) {
            return Err("Max retries must be greater than 0".to_string());
        }
        if self.restart_after == Some(0) {
            return Err("Restart threshold must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Apply command-line overrides onto the loaded configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(input) = &self.input {
            config.files.input = input.clone();
        }
        if let Some(output) = &self.output {
            config.files.output = output.clone();
        }
        if let Some(size) = self.pool_size {
            config.pool.size = size;
        }
        if let Some(delay) = self.start_delay {
            config.pool.start_delay_secs = delay;
        }
        if let Some(n) = self.restart_after {
            config.pool.restart_after = n;
        }
        if let Some(n) = self.max_retries {
            config.pool.max_retries = n;
        }
        if self.headless {
            config.browser.headless = true;
        }
    }
}

// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow, Context};
use log::{warn, info, LevelFilter, Log, Metadata, Record, Level, SetLoggerError};
use std::path::{Path, PathBuf};
use std::io::Write;
use clap::{Parser, ValueEnum, CommandFactory, Subcommand};
use clap_complete::{generate, Shell};

use scenesage::app_config::{self, BackendProvider, Config};
use scenesage::app_controller::Controller;

/// CLI Wrapper for BackendProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliBackendProvider {
    Ollama,
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
    Gemini,
    #[value(name = "lmstudio")]
    LMStudio,
}

impl From<CliBackendProvider> for BackendProvider {
    fn from(cli_provider: CliBackendProvider) -> Self {
        match cli_provider {
            CliBackendProvider::Ollama => BackendProvider::Ollama,
            CliBackendProvider::OpenAI => BackendProvider::OpenAI,
            CliBackendProvider::Anthropic => BackendProvider::Anthropic,
            CliBackendProvider::Gemini => BackendProvider::Gemini,
            CliBackendProvider::LMStudio => BackendProvider::LMStudio,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze the scenes of a subtitle file
    Analyze(AnalyzeArgs),

    /// Generate shell completions for scenesage
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Input SRT subtitle file
    #[arg(value_name = "INPUT_SRT")]
    input_path: PathBuf,

    /// Output JSON file for the annotated scenes
    #[arg(short, long, default_value = "scenes.json")]
    output: PathBuf,

    /// Backend provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliBackendProvider>,

    /// Model name to use for the analysis
    #[arg(short, long)]
    model: Option<String>,

    /// Minimum pause between subtitles that starts a new scene (seconds)
    #[arg(long)]
    min_pause: Option<f64>,

    /// Scenes per backend request
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Scenes shared by consecutive requests
    #[arg(long)]
    overlap: Option<usize>,

    /// Maximum number of requests in flight
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Retries per chunk after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,

    /// Print every annotated scene to stdout
    #[arg(long)]
    print: bool,

    /// Exit with an error when some scenes could not be annotated
    #[arg(long)]
    fail_on_partial: bool,
}

/// SceneSage - scene-level analysis of subtitle tracks
///
/// Splits subtitles into scenes and annotates each one with a summary,
/// characters, mood and cultural references using AI providers.
#[derive(Parser, Debug)]
#[command(name = "scenesage")]
#[command(version)]
#[command(about = "AI-powered scene analysis of subtitle files")]
#[command(long_about = "SceneSage splits a subtitle file into scenes and annotates them using AI providers.

EXAMPLES:
    scenesage analyze movie.srt                        # Analyze using default config
    scenesage analyze movie.srt -o movie.scenes.json   # Choose the output file
    scenesage analyze -p ollama -m llama3 movie.srt    # Use specific provider and model
    scenesage analyze --min-pause 6 movie.srt          # Longer pause between scenes
    scenesage analyze --chunk-size 8 --overlap 2 movie.srt
    scenesage completions bash > scenesage.bash        # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.

SUPPORTED PROVIDERS:
    openai    - OpenAI API (requires API key or OPENAI_API_KEY)
    anthropic - Anthropic Claude API (requires API key or ANTHROPIC_API_KEY)
    gemini    - Google Gemini API (requires API key or GOOGLE_API_KEY)
    ollama    - Local Ollama server
    lmstudio  - LM Studio local server (OpenAI-compatible on http://localhost:1234/v1)")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Emoji for log level
    fn get_emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌",
            Level::Warn => "🚧",
            Level::Info => " ",
            Level::Debug => "🔍",
            Level::Trace => "📋",
        }
    }

    // @returns: ANSI colour for log level
    fn get_color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");

            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {} {}\x1B[0m",
                Self::get_color_for_level(record.level()),
                now,
                Self::get_emoji_for_level(record.level()),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install the logger at trace level; the effective level is set via set_max_level
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "scenesage", &mut std::io::stdout());
            Ok(())
        }
        Commands::Analyze(args) => run_analyze(args).await,
    }
}

/// Load the config file, creating a default one when it does not exist
fn load_or_create_config(config_path: &str) -> Result<Config> {
    if Path::new(config_path).exists() {
        Config::from_file(config_path)
    } else {
        warn!("Config file not found at '{}', creating default config.", config_path);
        let config = Config::default();
        config.save_to_file(config_path)
            .context(format!("Failed to write default config to file: {}", config_path))?;
        Ok(config)
    }
}

/// Apply command line overrides on top of the loaded config
fn apply_overrides(config: &mut Config, options: &AnalyzeArgs) -> Result<()> {
    if let Some(provider) = &options.provider {
        config.backend.provider = provider.clone().into();
    }

    if let Some(model) = &options.model {
        config.backend.active_provider_config_mut().model = model.clone();
    }

    if let Some(seconds) = options.min_pause {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(anyhow!("--min-pause must be a non-negative number of seconds, got {}", seconds));
        }
        config.analysis.min_pause_ms = (seconds * 1000.0).round() as u64;
    }

    if let Some(chunk_size) = options.chunk_size {
        config.analysis.chunk_size = chunk_size;
    }

    if let Some(overlap) = options.overlap {
        config.analysis.overlap = overlap;
    }

    if let Some(max_concurrency) = options.max_concurrency {
        config.analysis.max_concurrency = Some(max_concurrency);
    }

    if let Some(max_retries) = options.max_retries {
        config.analysis.max_retries = max_retries;
    }

    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }

    Ok(())
}

async fn run_analyze(options: AnalyzeArgs) -> Result<()> {
    // If log level is set via command line, apply it immediately
    if let Some(cmd_log_level) = &options.log_level {
        let config_log_level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(config_log_level.to_level_filter());
    }

    let mut config = load_or_create_config(&options.config_path)?;
    apply_overrides(&mut config, &options)?;
    log::set_max_level(config.log_level.to_level_filter());

    if !options.input_path.is_file() {
        return Err(anyhow!("Input file does not exist: {:?}", options.input_path));
    }

    let controller = Controller::with_config(config)?;
    controller.check_provider().await?;

    let report = controller.run(&options.input_path).await?;
    Controller::write_report(&report, &options.output)?;

    if options.print {
        let mut stdout = std::io::stdout();
        for (number, scene) in report.scenes.iter().enumerate() {
            writeln!(stdout, "{}", Controller::render_scene(number + 1, scene))?;
        }
    }

    if report.cancelled {
        warn!("Analysis was interrupted; the output contains the scenes finished before the interrupt");
    }

    if report.is_total_failure() {
        return Err(anyhow!("No scene could be annotated; see the errors above"));
    }

    if report.is_partial() && options.fail_on_partial {
        return Err(anyhow!(
            "{} of {} scenes could not be annotated",
            report.unresolved.len(),
            report.total_scenes
        ));
    }

    info!("Done");
    Ok(())
}

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::{AnalysisReport, AnnotatedScene, LlmAnnotator, ScenePipeline};
use crate::app_config::Config;
use crate::errors::{AppError, ProviderError};
use crate::providers::{self, Provider};
use crate::subtitle_processor::{SubtitleCollection, SubtitleEntry};

/// Resolve once `signal` reports an interrupt.
///
/// If the handler cannot be installed the run continues without one and this
/// never resolves.
async fn wait_for_interrupt<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => warn!("Interrupt received, finishing with the scenes annotated so far"),
        Err(e) => {
            warn!("Interrupt handler unavailable, Ctrl-C will not stop the run: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Main application controller for scene analysis
pub struct Controller {
    // @field: App config
    config: Config,

    // @field: Backend client
    provider: Arc<dyn Provider>,
}

impl Controller {
    /// Create a controller for the configured backend
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;
        let provider = providers::create_provider(&config.backend)?;
        Ok(Self { config, provider })
    }

    /// Create a controller around an existing provider client
    pub fn with_provider(config: Config, provider: Arc<dyn Provider>) -> Result<Self> {
        config.pipeline_settings().validate().map_err(AppError::from)?;
        Ok(Self { config, provider })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fail early on rejected credentials; other connection problems only warn
    pub async fn check_provider(&self) -> Result<()> {
        match self.provider.test_connection().await {
            Ok(()) => Ok(()),
            Err(e @ ProviderError::AuthenticationError(_)) => Err(AppError::Provider(e).into()),
            Err(e) => {
                warn!("Connection test to {} failed: {}", self.provider.name(), e);
                Ok(())
            }
        }
    }

    /// Analyze a subtitle file until done or until Ctrl-C
    pub async fn run(&self, input_file: &Path) -> Result<AnalysisReport> {
        self.run_until(input_file, wait_for_interrupt(tokio::signal::ctrl_c())).await
    }

    /// Analyze a subtitle file, stopping dispatch when `shutdown` resolves
    pub async fn run_until<F>(&self, input_file: &Path, shutdown: F) -> Result<AnalysisReport>
    where
        F: Future<Output = ()>,
    {
        let subtitles = SubtitleCollection::from_srt_file(input_file)?;
        let backend = &self.config.backend;

        info!("🎬 SceneSage: {} - {}", backend.provider.display_name(), backend.get_model());
        info!("Analyzing {} subtitle entries from {}", subtitles.entries.len(), input_file.display());

        let annotator = LlmAnnotator::new(self.provider.clone(), backend.get_model(), backend.common.clone());

        let progress_bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));
        progress_bar.set_message("Annotating");

        let pb = progress_bar.clone();
        let pipeline = ScenePipeline::new(self.config.pipeline_settings(), Arc::new(annotator))
            .with_provider_info(backend.provider.display_name(), backend.get_model())
            .with_progress(move |completed, total| {
                pb.set_length(total as u64);
                pb.set_position(completed as u64);
            });

        let report = pipeline
            .run_until(&subtitles.entries, shutdown)
            .await
            .map_err(AppError::from)?;

        progress_bar.finish_and_clear();

        info!(
            "Annotated {} of {} scenes in {} chunks",
            report.scenes.len(),
            report.total_scenes,
            report.chunk_count
        );
        for failure in &report.failures {
            warn!("{}", failure);
        }
        info!("{}", report.token_usage.summary());

        Ok(report)
    }

    /// Path of the unresolved-scenes file next to `output_file`
    pub fn unresolved_path(output_file: &Path) -> PathBuf {
        let stem = output_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenes".to_string());
        output_file.with_file_name(format!("{}.unresolved.json", stem))
    }

    /// Write annotated scenes, and unresolved scenes when there are any
    pub fn write_report(report: &AnalysisReport, output_file: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&report.scenes)
            .context("Failed to serialize scenes to JSON")?;
        std::fs::write(output_file, json)
            .with_context(|| format!("Failed to write output file: {}", output_file.display()))?;
        info!("Wrote {} scenes to {}", report.scenes.len(), output_file.display());

        if !report.unresolved.is_empty() {
            let unresolved_file = Self::unresolved_path(output_file);
            let json = serde_json::to_string_pretty(&report.unresolved)
                .context("Failed to serialize unresolved scenes to JSON")?;
            std::fs::write(&unresolved_file, json)
                .with_context(|| format!("Failed to write unresolved scenes: {}", unresolved_file.display()))?;
            warn!(
                "{} scenes could not be annotated, see {}",
                report.unresolved.len(),
                unresolved_file.display()
            );
        }

        Ok(())
    }

    /// Human-readable rendering of one scene
    pub fn render_scene(number: usize, scene: &AnnotatedScene) -> String {
        let annotation = &scene.annotation;
        let characters = if annotation.characters.is_empty() {
            "-".to_string()
        } else {
            annotation.characters.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let references = if annotation.cultural_refs.is_empty() {
            "-".to_string()
        } else {
            annotation.cultural_refs.join("; ")
        };

        format!(
            "Scene {} [{} - {}]\n  Summary: {}\n  Characters: {}\n  Mood: {}\n  Cultural references: {}\n",
            number,
            SubtitleEntry::format_timestamp(scene.start_ms),
            SubtitleEntry::format_timestamp(scene.end_ms),
            annotation.summary,
            characters,
            annotation.mood,
            references
        )
    }
}

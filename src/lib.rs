/*!
 * # SceneSage - scene-level analysis of subtitle tracks
 *
 * A Rust library that turns a subtitle track into annotated scenes using AI.
 *
 * ## Features
 *
 * - Parse SRT subtitles into timed entries
 * - Split dialogue into scenes on pauses between lines
 * - Annotate scenes in overlapping chunks with various AI providers:
 *   - Ollama (local LLM)
 *   - OpenAI API and LM Studio
 *   - Anthropic API
 *   - Google Gemini API
 * - Bounded concurrency, rate pacing and retry with backoff
 * - Partial results when some chunks fail
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `subtitle_processor`: SRT parsing
 * - `analysis`: The scene pipeline:
 *   - `analysis::segmenter`: Pause-based scene detection
 *   - `analysis::chunking`: Overlapping chunk planning
 *   - `analysis::dispatcher`: Concurrent annotation with retries
 *   - `analysis::merger`: Overlap reconciliation
 * - `app_controller`: Main application controller
 * - `providers`: Client implementations for various LLM providers
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod subtitle_processor;
pub mod analysis;
pub mod app_controller;
pub mod providers;
pub mod errors;

// Re-export main types for easier usage
pub use app_config::Config;
pub use subtitle_processor::{SubtitleCollection, SubtitleEntry};
pub use analysis::{AnalysisReport, ScenePipeline};
pub use errors::{AnnotationError, AppError, ConfigError, ProviderError};

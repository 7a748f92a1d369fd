/*!
 * Scene analysis pipeline.
 *
 * - `segmenter`: pause-based scene detection
 * - `chunking`: overlapping windows over the scene list
 * - `concurrency`: provider profiles and the per-run request limiter
 * - `annotator`: prompt building and strict decoding of backend replies
 * - `dispatcher`: concurrent, retrying annotation of every chunk
 * - `merger`: overlap reconciliation and chronological ordering
 * - `pipeline`: the end-to-end run and its report
 */

pub mod annotator;
pub mod chunking;
pub mod concurrency;
pub mod dispatcher;
pub mod merger;
pub mod pipeline;
pub mod segmenter;

pub use annotator::{AnnotatedBatch, AnnotationRequest, LlmAnnotator, SceneAnnotation, SceneAnnotator};
pub use chunking::{plan, Chunk};
pub use concurrency::{ProviderProfile, RequestLimiter};
pub use dispatcher::{AnnotationDispatcher, BackoffPolicy, ChunkFailure, ChunkOutcome, RetryPolicy};
pub use merger::{merge, AnnotatedScene, MergeOutcome, UnresolvedScene};
pub use pipeline::{AnalysisReport, PipelineSettings, ScenePipeline, TokenUsageStats};
pub use segmenter::{segment, Scene, SceneSegmenter};

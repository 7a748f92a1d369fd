/*!
 * End-to-end scenarios for the scene analysis pipeline
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use scenesage::analysis::{BackoffPolicy, LlmAnnotator, PipelineSettings, ScenePipeline};
use scenesage::app_config::GenerationConfig;
use scenesage::errors::{AnnotationError, ConfigError, ProviderError};
use scenesage::providers::mock::MockProvider;
use crate::common::{self, entry, spaced_entries, ScriptedAnnotator};

fn settings(chunk_size: usize, overlap: usize) -> PipelineSettings {
    PipelineSettings {
        min_pause: Duration::from_secs(4),
        chunk_size,
        overlap,
        max_concurrency: 3,
        max_retries: 2,
        backoff: BackoffPolicy {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
        rate_limit_rpm: None,
    }
}

fn auth_error() -> AnnotationError {
    AnnotationError::Provider(ProviderError::AuthenticationError("invalid key".to_string()))
}

/// Test two nearby lines and a distant one
#[tokio::test]
async fn test_run_withReferenceTiming_shouldProduceTwoAnnotatedScenes() {
    common::init_logging();
    let entries = vec![
        entry(1, 0, 2000, "Hello."),
        entry(2, 2500, 4000, "Hi there."),
        entry(3, 10_000, 12_000, "Later that day."),
    ];
    let pipeline = ScenePipeline::new(settings(5, 1), Arc::new(ScriptedAnnotator::new()));

    let report = pipeline.run(&entries).await.unwrap();

    assert_eq!(report.total_scenes, 2);
    assert_eq!(report.chunk_count, 1);
    assert_eq!(report.scenes.len(), 2);
    assert_eq!(report.scenes[0].transcript, "Hello. Hi there.");
    assert!(!report.is_partial());
    assert!(report.failures.is_empty());
}

/// Test overlap handling with seven scenes
#[tokio::test]
async fn test_run_withSevenScenes_shouldAnnotateEachSceneOnce() {
    let pipeline = ScenePipeline::new(settings(5, 1), Arc::new(ScriptedAnnotator::new()));

    let report = pipeline.run(&spaced_entries(7)).await.unwrap();

    assert_eq!(report.chunk_count, 2);
    let ids: Vec<usize> = report.scenes.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(report.scenes[4].annotation.summary, ScriptedAnnotator::summary_for(1, 4));
    assert_eq!(report.token_usage.prompt_tokens, 200);
    assert_eq!(report.token_usage.completion_tokens, 40);
}

/// Test a permanently failing middle chunk
#[tokio::test(start_paused = true)]
async fn test_run_withFailedMiddleChunk_shouldReturnPartialResult() {
    let annotator = Arc::new(ScriptedAnnotator::new().always_failing(1, auth_error()));
    let pipeline = ScenePipeline::new(settings(5, 1), annotator);

    let report = pipeline.run(&spaced_entries(13)).await.unwrap();

    assert_eq!(report.chunk_count, 3);
    let unresolved: Vec<usize> = report.unresolved.iter().map(|s| s.id).collect();
    assert_eq!(unresolved, vec![5, 6, 7]);
    assert_eq!(report.scenes.len(), 10);
    assert_eq!(report.scenes[4].annotation.summary, ScriptedAnnotator::summary_for(0, 4));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].chunk_index, 1);
    assert!(report.is_partial());
    assert!(!report.is_total_failure());
    assert!(!report.cancelled);
}

/// Test that a transient failure is retried within the run
#[tokio::test(start_paused = true)]
async fn test_run_withTransientFailure_shouldRecover() {
    let timeout = AnnotationError::Provider(ProviderError::Timeout("slow".to_string()));
    let annotator = Arc::new(ScriptedAnnotator::new().failing_then_ok(0, vec![timeout]));
    let pipeline = ScenePipeline::new(settings(5, 1), annotator.clone());

    let report = pipeline.run(&spaced_entries(7)).await.unwrap();

    assert!(!report.is_partial());
    assert_eq!(annotator.calls_for(0).len(), 2);
}

/// Test that total failure is still a report, not an error
#[tokio::test(start_paused = true)]
async fn test_run_withEveryChunkFailing_shouldReportTotalFailure() {
    let annotator = Arc::new(
        ScriptedAnnotator::new()
            .always_failing(0, auth_error())
            .always_failing(1, auth_error()),
    );
    let pipeline = ScenePipeline::new(settings(5, 1), annotator);

    let report = pipeline.run(&spaced_entries(7)).await.unwrap();

    assert!(report.scenes.is_empty());
    assert_eq!(report.unresolved.len(), 7);
    assert!(report.is_total_failure());
}

/// Test that invalid settings fail before any request
#[tokio::test]
async fn test_run_withOverlapTooLarge_shouldFailBeforeDispatch() {
    let annotator = Arc::new(ScriptedAnnotator::new());
    let pipeline = ScenePipeline::new(settings(3, 3), annotator.clone());

    let result = pipeline.run(&spaced_entries(7)).await;

    assert_eq!(
        result.unwrap_err(),
        ConfigError::OverlapTooLarge { chunk_size: 3, overlap: 3 }
    );
    assert!(annotator.calls().is_empty());
}

/// Test that zero concurrency is rejected
#[tokio::test]
async fn test_run_withZeroConcurrency_shouldFail() {
    let mut settings = settings(5, 1);
    settings.max_concurrency = 0;
    let pipeline = ScenePipeline::new(settings, Arc::new(ScriptedAnnotator::new()));

    assert_eq!(pipeline.run(&spaced_entries(3)).await.unwrap_err(), ConfigError::ZeroConcurrency);
}

/// Test that an unbounded concurrency is rejected before any request
#[tokio::test]
async fn test_run_withUnboundedConcurrency_shouldFailWithoutRequests() {
    let mut settings = settings(5, 1);
    settings.max_concurrency = usize::MAX;
    let annotator = Arc::new(ScriptedAnnotator::new());
    let pipeline = ScenePipeline::new(settings, annotator.clone());

    let error = pipeline.run(&spaced_entries(3)).await.unwrap_err();

    assert!(matches!(error, ConfigError::ConcurrencyTooLarge { requested: usize::MAX, .. }));
    assert!(annotator.calls().is_empty());
}

/// Test that no entries mean an empty, successful report
#[tokio::test]
async fn test_run_withNoEntries_shouldReturnEmptyReport() {
    let annotator = Arc::new(ScriptedAnnotator::new());
    let pipeline = ScenePipeline::new(settings(5, 1), annotator.clone());

    let report = pipeline.run(&[]).await.unwrap();

    assert_eq!(report.total_scenes, 0);
    assert_eq!(report.chunk_count, 0);
    assert!(!report.is_total_failure());
    assert!(annotator.calls().is_empty());
}

/// Test cancellation of a run
#[tokio::test(start_paused = true)]
async fn test_runUntil_withImmediateShutdown_shouldMarkReportCancelled() {
    let annotator = Arc::new(ScriptedAnnotator::new().with_delay(Duration::from_secs(30)));
    let pipeline = ScenePipeline::new(settings(5, 1), annotator);

    let report = pipeline
        .run_until(&spaced_entries(13), std::future::ready(()))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.scenes.is_empty());
    assert_eq!(report.unresolved.len(), 13);
    assert_eq!(report.failures.len(), 3);
}

/// Test the progress callback and provider labels
#[tokio::test]
async fn test_run_withProgressAndProviderInfo_shouldReportBoth() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let pipeline = ScenePipeline::new(settings(5, 1), Arc::new(ScriptedAnnotator::new()))
        .with_provider_info("Mock", "mock-model")
        .with_progress(move |done, total| sink.lock().unwrap().push((done, total)));

    let report = pipeline.run(&spaced_entries(13)).await.unwrap();

    assert_eq!(seen.lock().unwrap().last(), Some(&(3, 3)));
    assert_eq!(report.token_usage.provider, "Mock");
    assert_eq!(report.token_usage.model, "mock-model");
    assert!(report.token_usage.summary().contains("Model: mock-model"));
}

/// Test the pipeline against the mock LLM backend with intermittent errors
#[tokio::test(start_paused = true)]
async fn test_run_withIntermittentMockProvider_shouldAnnotateEveryScene() {
    let provider = Arc::new(MockProvider::intermittent(3));
    let annotator = LlmAnnotator::new(provider.clone(), "mock-model", GenerationConfig::default());
    let pipeline = ScenePipeline::new(settings(4, 1), Arc::new(annotator));

    let report = pipeline.run(&spaced_entries(10)).await.unwrap();

    assert_eq!(report.chunk_count, 3);
    assert_eq!(report.scenes.len(), 10);
    assert!(report.failures.is_empty());
    assert!(provider.request_count() > 3);
    assert!(report.scenes.iter().all(|s| s.annotation.summary.starts_with("Summary of scene")));
}

/// Test that a backend that keeps dropping records leaves scenes unresolved
#[tokio::test(start_paused = true)]
async fn test_run_withMalformedMockProvider_shouldExhaustRetries() {
    let provider = Arc::new(MockProvider::malformed());
    let annotator = LlmAnnotator::new(provider.clone(), "mock-model", GenerationConfig::default());
    let pipeline = ScenePipeline::new(settings(5, 1), Arc::new(annotator));

    let report = pipeline.run(&spaced_entries(3)).await.unwrap();

    assert!(report.is_total_failure());
    assert_eq!(report.failures[0].attempts, 3);
    assert!(matches!(report.failures[0].error, AnnotationError::ResponseShape(_)));
    assert_eq!(provider.request_count(), 3);
}

/// Test that a backend replying with nothing is retried, then reported
#[tokio::test(start_paused = true)]
async fn test_run_withEmptyMockProvider_shouldReportShapeFailure() {
    let provider = Arc::new(MockProvider::empty());
    let annotator = LlmAnnotator::new(provider.clone(), "mock-model", GenerationConfig::default());
    let pipeline = ScenePipeline::new(settings(5, 1), Arc::new(annotator));

    let report = pipeline.run(&spaced_entries(3)).await.unwrap();

    assert!(report.is_total_failure());
    assert_eq!(report.unresolved.len(), 3);
    assert!(matches!(report.failures[0].error, AnnotationError::ResponseShape(_)));
    assert_eq!(provider.request_count(), 3);
}

/// Test that a slow backend cut off by shutdown leaves its chunk cancelled
#[tokio::test(start_paused = true)]
async fn test_runUntil_withSlowMockProvider_shouldCancelInFlightChunk() {
    let provider = Arc::new(MockProvider::slow(60_000));
    let annotator = LlmAnnotator::new(provider.clone(), "mock-model", GenerationConfig::default());
    let pipeline = ScenePipeline::new(settings(5, 1), Arc::new(annotator));

    let report = pipeline
        .run_until(&spaced_entries(3), tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.scenes.is_empty());
    assert_eq!(report.failures[0].attempts, 1);
    assert_eq!(provider.request_count(), 1);
}

/// Test that a slow backend still finishes when nothing interrupts it
#[tokio::test(start_paused = true)]
async fn test_run_withSlowMockProvider_shouldAnnotateEveryScene() {
    let provider = Arc::new(MockProvider::slow(5_000));
    let annotator = LlmAnnotator::new(provider.clone(), "mock-model", GenerationConfig::default());
    let pipeline = ScenePipeline::new(settings(4, 1), Arc::new(annotator));

    let report = pipeline.run(&spaced_entries(7)).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.scenes.len(), 7);
    assert!(report.failures.is_empty());
}

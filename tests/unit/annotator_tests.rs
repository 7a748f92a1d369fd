/*!
 * Tests for prompt building and strict decoding of annotation replies
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use scenesage::analysis::annotator::{decode_annotations, strip_code_fences, MAX_CULTURAL_REFS};
use scenesage::analysis::{plan, segment, AnnotationRequest, Chunk, LlmAnnotator, SceneAnnotator};
use scenesage::app_config::GenerationConfig;
use scenesage::errors::{AnnotationError, ProviderError};
use scenesage::providers::mock::MockProvider;
use scenesage::providers::{CompletionRequest, CompletionResponse, Provider};
use crate::common::spaced_entries;

fn chunk(scene_count: usize) -> Chunk {
    let scenes = segment(&spaced_entries(scene_count), Duration::from_secs(4));
    plan(&scenes, scene_count.max(1), 0).unwrap().remove(0)
}

fn annotator(provider: impl Provider + 'static) -> LlmAnnotator {
    LlmAnnotator::new(Arc::new(provider), "test-model", GenerationConfig::default())
}

fn record(position: usize) -> String {
    format!(
        r#"{{"scene": {}, "summary": "Summary {}", "characters": ["Rick"], "mood": "tense", "cultural_refs": []}}"#,
        position, position
    )
}

fn reply(positions: &[usize]) -> String {
    let records: Vec<String> = positions.iter().map(|&p| record(p)).collect();
    format!(r#"{{"scenes": [{}]}}"#, records.join(", "))
}

/// Provider that records requests and answers with a fixed text
#[derive(Debug)]
struct RecordingProvider {
    reply: String,
    requests: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        Ok(CompletionResponse {
            text: self.reply.clone(),
            prompt_tokens: Some(42),
            completion_tokens: Some(7),
        })
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Test a full annotation round against the mock backend
#[tokio::test]
async fn test_annotate_withWorkingProvider_shouldReturnOneAnnotationPerScene() {
    let chunk = chunk(4);
    let annotator = annotator(MockProvider::working());

    let batch = annotator.annotate(&AnnotationRequest::first(&chunk)).await.unwrap();

    let ids: Vec<usize> = batch.annotations.iter().map(|a| a.scene_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(batch.annotations[2].summary, "Summary of scene 2");
    assert!(batch.prompt_tokens.is_some());
}

/// Test that a reply with a missing record is a shape error
#[tokio::test]
async fn test_annotate_withMalformedReply_shouldReturnShapeError() {
    let chunk = chunk(3);
    let annotator = annotator(MockProvider::malformed());

    let error = annotator.annotate(&AnnotationRequest::first(&chunk)).await.unwrap_err();

    assert!(matches!(error, AnnotationError::ResponseShape(ref reason) if reason.contains("expected 3")));
    assert!(error.is_retryable());
}

/// Test that provider errors pass through unchanged
#[tokio::test]
async fn test_annotate_withUnauthorizedProvider_shouldReturnProviderError() {
    let chunk = chunk(2);
    let annotator = annotator(MockProvider::unauthorized());

    let error = annotator.annotate(&AnnotationRequest::first(&chunk)).await.unwrap_err();

    assert!(matches!(error, AnnotationError::Provider(ProviderError::AuthenticationError(_))));
    assert!(!error.is_retryable());
}

/// Test that an empty reply is rejected
#[tokio::test]
async fn test_annotate_withEmptyReply_shouldReturnShapeError() {
    let chunk = chunk(2);
    let annotator = annotator(MockProvider::empty());

    let error = annotator.annotate(&AnnotationRequest::first(&chunk)).await.unwrap_err();

    assert!(matches!(error, AnnotationError::ResponseShape(_)));
}

/// Test the request handed to the provider
#[tokio::test]
async fn test_annotate_shouldRequestJsonWithPerSceneTokenBudget() {
    let chunk = chunk(3);
    let provider = Arc::new(RecordingProvider {
        reply: reply(&[0, 1, 2]),
        requests: Mutex::new(Vec::new()),
    });
    let annotator = LlmAnnotator::new(provider.clone(), "test-model", GenerationConfig::default());

    let batch = annotator.annotate(&AnnotationRequest::first(&chunk)).await.unwrap();

    assert_eq!(batch.prompt_tokens, Some(42));
    assert_eq!(batch.completion_tokens, Some(7));
    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].json_output);
    assert_eq!(requests[0].model, "test-model");
    assert_eq!(requests[0].max_tokens, 3 * 400);
}

/// Test that the user prompt marks every scene
#[test]
fn test_buildUserPrompt_shouldMarkEverySceneInOrder() {
    let chunk = chunk(3);
    let annotator = annotator(MockProvider::working());

    let prompt = annotator.build_user_prompt(&AnnotationRequest::first(&chunk));

    assert_eq!(MockProvider::scene_markers(&prompt), vec![0, 1, 2]);
    assert!(prompt.contains("[00:00:10,000 - 00:00:12,000]\nLine 2"));
    assert!(!prompt.contains("rejected"));
}

/// Test that a retry after a rejected reply explains the rejection
#[test]
fn test_buildUserPrompt_withPreviousRejection_shouldIncludeReason() {
    let chunk = chunk(2);
    let annotator = annotator(MockProvider::working());
    let request = AnnotationRequest {
        chunk: &chunk,
        attempt: 2,
        previous_rejection: Some("expected 2 scene records, got 1"),
    };

    let prompt = annotator.build_user_prompt(&request);

    assert!(prompt.contains("Your previous answer was rejected: expected 2 scene records, got 1"));
}

/// Test that the system prompt carries the reply schema
#[test]
fn test_buildSystemPrompt_shouldDescribeSchema() {
    let annotator = annotator(MockProvider::working());

    let prompt = annotator.build_system_prompt();

    assert!(prompt.starts_with("You are a film analysis expert."));
    assert!(prompt.contains("<<SCENE_n>>"));
    assert!(prompt.contains("\"cultural_refs\""));
}

/// Test decoding of a fenced reply in shuffled order
#[test]
fn test_decodeAnnotations_withFencedShuffledReply_shouldOrderByScene() {
    let chunk = chunk(3);
    let text = format!("```json\n{}\n```", reply(&[2, 0, 1]));

    let annotations = decode_annotations(&text, &chunk).unwrap();

    let summaries: Vec<&str> = annotations.iter().map(|a| a.summary.as_str()).collect();
    assert_eq!(summaries, vec!["Summary 0", "Summary 1", "Summary 2"]);
}

/// Test fence stripping
#[test]
fn test_stripCodeFences_shouldOnlyRemoveWholeReplyFence() {
    assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
}

/// Test the rejection rules of the strict decoder
#[test]
fn test_decodeAnnotations_withInvalidReplies_shouldRejectEach() {
    let chunk = chunk(2);

    let cases = vec![
        ("not json", "this is not json".to_string()),
        ("count", reply(&[0])),
        ("range", reply(&[0, 2])),
        ("duplicate", reply(&[1, 1])),
        (
            "unknown field",
            r#"{"scenes": [], "notes": "extra"}"#.to_string(),
        ),
        (
            "empty summary",
            r#"{"scenes": [{"scene": 0, "summary": " ", "characters": [], "mood": "calm", "cultural_refs": []},
                           {"scene": 1, "summary": "ok", "characters": [], "mood": "calm", "cultural_refs": []}]}"#
                .to_string(),
        ),
        (
            "missing mood",
            r#"{"scenes": [{"scene": 0, "summary": "a", "characters": [], "cultural_refs": []},
                           {"scene": 1, "summary": "b", "characters": [], "mood": "calm", "cultural_refs": []}]}"#
                .to_string(),
        ),
    ];

    for (name, text) in cases {
        let result = decode_annotations(&text, &chunk);
        assert!(
            matches!(result, Err(AnnotationError::ResponseShape(_))),
            "case '{}' should be rejected",
            name
        );
    }
}

/// Test normalisation of characters and cultural references
#[test]
fn test_decodeAnnotations_withNoisyLists_shouldNormalise() {
    let chunk = chunk(1);
    let text = r#"{"scenes": [{"scene": 0, "summary": "Reunion", "characters": ["Sam", " Rick ", "Sam", ""],
        "mood": "warm", "cultural_refs": ["As Time Goes By", "Paris", "La Marseillaise", "WWII"]}]}"#;

    let annotations = decode_annotations(text, &chunk).unwrap();

    let characters: Vec<&str> = annotations[0].characters.iter().map(String::as_str).collect();
    assert_eq!(characters, vec!["Rick", "Sam"]);
    assert_eq!(annotations[0].cultural_refs.len(), MAX_CULTURAL_REFS);
    assert_eq!(annotations[0].cultural_refs[0], "As Time Goes By");
}

/*!
 * Scene annotation through an LLM backend.
 *
 * `SceneAnnotator` is the capability the dispatcher drives: annotate every
 * scene of one chunk or fail. `LlmAnnotator` implements it on top of any
 * `Provider` by building a marked prompt and strictly decoding the reply.
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app_config::GenerationConfig;
use crate::errors::{AnnotationError, ProviderError};
use crate::providers::{CompletionRequest, Provider};
use crate::subtitle_processor::SubtitleEntry;
use super::chunking::Chunk;

/// Most cultural references kept per scene
pub const MAX_CULTURAL_REFS: usize = 3;

// @const: Markdown code fence wrapping a whole reply
static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n(.*?)\n?```$").expect("code fence pattern is valid")
});

/// Annotation of a single scene as decoded from a backend reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneAnnotation {
    /// Identity of the annotated scene
    #[serde(skip)]
    pub scene_id: usize,

    /// One-sentence summary
    pub summary: String,

    /// Characters mentioned, de-duplicated and sorted
    pub characters: BTreeSet<String>,

    /// Mood or emotion
    pub mood: String,

    /// Cultural references in reply order
    pub cultural_refs: Vec<String>,
}

/// Annotations for one chunk plus the token usage the backend reported.
#[derive(Debug, Clone, Default)]
pub struct AnnotatedBatch {
    pub annotations: Vec<SceneAnnotation>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// One annotation attempt for a chunk.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationRequest<'a> {
    /// Chunk to annotate
    pub chunk: &'a Chunk,

    /// Attempt number, starting at 1
    pub attempt: u32,

    /// Why the previous reply for this chunk was rejected, if it was
    pub previous_rejection: Option<&'a str>,
}

impl<'a> AnnotationRequest<'a> {
    pub fn first(chunk: &'a Chunk) -> Self {
        Self {
            chunk,
            attempt: 1,
            previous_rejection: None,
        }
    }
}

/// Backend capability: annotate all scenes of a chunk.
#[async_trait]
pub trait SceneAnnotator: Send + Sync {
    /// Return exactly one annotation per scene of `request.chunk`, or an error.
    async fn annotate(&self, request: &AnnotationRequest<'_>) -> Result<AnnotatedBatch, AnnotationError>;
}

#[async_trait]
impl<T: SceneAnnotator + ?Sized> SceneAnnotator for Arc<T> {
    async fn annotate(&self, request: &AnnotationRequest<'_>) -> Result<AnnotatedBatch, AnnotationError> {
        (**self).annotate(request).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SceneReply {
    scenes: Vec<SceneRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SceneRecord {
    scene: usize,
    summary: String,
    characters: Vec<String>,
    mood: String,
    cultural_refs: Vec<String>,
}

/// Annotator backed by an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmAnnotator {
    provider: Arc<dyn Provider>,
    model: String,
    generation: GenerationConfig,
}

impl LlmAnnotator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, generation: GenerationConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            generation,
        }
    }

    /// System prompt: task description plus the exact reply schema.
    pub fn build_system_prompt(&self) -> String {
        format!(
            "{}\n\n\
             Each scene in the input starts with a marker of the form <<SCENE_n>>. \
             Respond with a single JSON object and nothing else, exactly in this form:\n\
             {{\"scenes\": [{{\"scene\": n, \"summary\": \"...\", \"characters\": [\"...\"], \
             \"mood\": \"...\", \"cultural_refs\": [\"...\"]}}]}}\n\
             Include one object per marker, using the marker's number n as \"scene\". \
             Use empty lists when there are no characters or references, and give at most {} cultural references.",
            self.generation.system_prompt.trim(),
            MAX_CULTURAL_REFS
        )
    }

    /// User prompt: one marked block per scene, plus the rejection note on retries.
    pub fn build_user_prompt(&self, request: &AnnotationRequest<'_>) -> String {
        let scene_count = request.chunk.scenes.len();
        let mut prompt = format!("Analyze the following {} movie scene(s).\n\n", scene_count);

        for (position, scene) in request.chunk.scenes.iter().enumerate() {
            prompt.push_str(&format!(
                "<<SCENE_{}>>\n[{} - {}]\n{}\n\n",
                position,
                SubtitleEntry::format_timestamp(scene.start_ms),
                SubtitleEntry::format_timestamp(scene.end_ms),
                scene.transcript
            ));
        }

        if let Some(reason) = request.previous_rejection {
            prompt.push_str(&format!(
                "Your previous answer was rejected: {}. \
                 Answer again with valid JSON containing exactly {} scene objects numbered 0 to {}.\n",
                reason,
                scene_count,
                scene_count.saturating_sub(1)
            ));
        }

        prompt
    }

    fn completion_request(&self, request: &AnnotationRequest<'_>) -> CompletionRequest {
        let scene_count = request.chunk.scenes.len().max(1) as u32;
        CompletionRequest {
            model: self.model.clone(),
            system: self.build_system_prompt(),
            prompt: self.build_user_prompt(request),
            temperature: self.generation.temperature,
            top_p: self.generation.top_p,
            max_tokens: self.generation.max_tokens_per_scene.saturating_mul(scene_count),
            frequency_penalty: self.generation.frequency_penalty,
            presence_penalty: self.generation.presence_penalty,
            json_output: true,
        }
    }
}

#[async_trait]
impl SceneAnnotator for LlmAnnotator {
    async fn annotate(&self, request: &AnnotationRequest<'_>) -> Result<AnnotatedBatch, AnnotationError> {
        let completion = self.completion_request(request);
        debug!(
            "Chunk {} attempt {}: sending {} scenes to {}",
            request.chunk.index,
            request.attempt,
            request.chunk.scenes.len(),
            self.provider.name()
        );

        let response = self.provider.complete(completion).await.map_err(|e| match e {
            ProviderError::ParseError(message) => AnnotationError::ResponseShape(message),
            other => AnnotationError::Provider(other),
        })?;

        let annotations = decode_annotations(&response.text, request.chunk)?;

        Ok(AnnotatedBatch {
            annotations,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

/// Remove a markdown code fence around the whole reply, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match CODE_FENCE_REGEX.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Strictly decode a reply into one annotation per scene of `chunk`.
///
/// Every marker must appear exactly once. Summary and mood must be non-empty.
pub fn decode_annotations(text: &str, chunk: &Chunk) -> Result<Vec<SceneAnnotation>, AnnotationError> {
    let body = strip_code_fences(text);
    let reply: SceneReply = serde_json::from_str(body)
        .map_err(|e| AnnotationError::ResponseShape(format!("reply is not valid annotation JSON: {}", e)))?;

    let expected = chunk.scenes.len();
    if reply.scenes.len() != expected {
        return Err(AnnotationError::ResponseShape(format!(
            "expected {} scene records, got {}",
            expected,
            reply.scenes.len()
        )));
    }

    let mut slots: Vec<Option<SceneAnnotation>> = vec![None; expected];

    for record in reply.scenes {
        let position = record.scene;
        let scene = chunk.scenes.get(position).ok_or_else(|| {
            AnnotationError::ResponseShape(format!("scene marker {} is out of range 0..{}", position, expected))
        })?;

        if slots[position].is_some() {
            return Err(AnnotationError::ResponseShape(format!("scene marker {} appears more than once", position)));
        }

        let summary = record.summary.trim().to_string();
        if summary.is_empty() {
            return Err(AnnotationError::ResponseShape(format!("scene {} has an empty summary", position)));
        }

        let mood = record.mood.trim().to_string();
        if mood.is_empty() {
            return Err(AnnotationError::ResponseShape(format!("scene {} has an empty mood", position)));
        }

        let characters: BTreeSet<String> = record
            .characters
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        let mut cultural_refs: Vec<String> = record
            .cultural_refs
            .iter()
            .map(|reference| reference.trim())
            .filter(|reference| !reference.is_empty())
            .map(str::to_string)
            .collect();
        if cultural_refs.len() > MAX_CULTURAL_REFS {
            warn!(
                "Scene {} returned {} cultural references, keeping the first {}",
                scene.id,
                cultural_refs.len(),
                MAX_CULTURAL_REFS
            );
            cultural_refs.truncate(MAX_CULTURAL_REFS);
        }

        slots[position] = Some(SceneAnnotation {
            scene_id: scene.id,
            summary,
            characters,
            mood,
            cultural_refs,
        });
    }

    // Count matched and no duplicates, so every slot is filled
    Ok(slots.into_iter().flatten().collect())
}

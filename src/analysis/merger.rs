/*!
 * Merging of per-chunk annotations into one scene list.
 *
 * Scenes in an overlap region receive a proposal from each successful chunk
 * covering them. The proposal with the most surrounding context wins: the
 * scene's distance to the nearest window edge that actually cut the scene
 * list. Ties go to the later chunk. Scenes without any proposal are reported
 * as unresolved. The output is ordered by start time, then segmentation order.
 */

use std::collections::BTreeMap;

use log::debug;
use serde::{Serialize, Serializer};

use crate::subtitle_processor::SubtitleEntry;
use super::annotator::SceneAnnotation;
use super::chunking::Chunk;
use super::dispatcher::ChunkOutcome;
use super::segmenter::Scene;

fn serialize_timestamp<S: Serializer>(ms: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&SubtitleEntry::format_timestamp(*ms))
}

/// A scene together with its winning annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedScene {
    #[serde(skip)]
    pub id: usize,

    #[serde(rename = "start", serialize_with = "serialize_timestamp")]
    pub start_ms: u64,

    #[serde(rename = "end", serialize_with = "serialize_timestamp")]
    pub end_ms: u64,

    pub transcript: String,

    #[serde(flatten)]
    pub annotation: SceneAnnotation,
}

impl AnnotatedScene {
    pub fn new(scene: &Scene, annotation: SceneAnnotation) -> Self {
        Self {
            id: scene.id,
            start_ms: scene.start_ms,
            end_ms: scene.end_ms,
            transcript: scene.transcript.clone(),
            annotation,
        }
    }
}

/// A scene no successful chunk annotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedScene {
    #[serde(skip)]
    pub id: usize,

    #[serde(rename = "start", serialize_with = "serialize_timestamp")]
    pub start_ms: u64,

    #[serde(rename = "end", serialize_with = "serialize_timestamp")]
    pub end_ms: u64,
}

/// Merged scenes plus the scenes left without an annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub scenes: Vec<AnnotatedScene>,
    pub unresolved: Vec<UnresolvedScene>,
}

/// Distance from `position` to the nearest edge of `chunk` that cut the scene list.
///
/// An edge lying at the very start or end of the full list cut nothing and
/// does not count; a chunk spanning the whole list gives `usize::MAX`.
pub fn context_margin(chunk: &Chunk, position: usize, total_scenes: usize) -> usize {
    let leading = (chunk.offset > 0).then(|| position - chunk.offset);
    let trailing = (chunk.end() < total_scenes).then(|| chunk.end() - 1 - position);

    match (leading, trailing) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => usize::MAX,
    }
}

/// Combine chunk outcomes into one annotation per scene.
///
/// `scenes` is the full segmented list; scene ids are positions in it.
/// Failed chunks contribute nothing. The result depends only on the inputs.
pub fn merge(scenes: &[Scene], chunks: &[Chunk], results: &BTreeMap<usize, ChunkOutcome>) -> MergeOutcome {
    let total = scenes.len();
    // scene id -> (margin, chunk index, annotation)
    let mut winners: BTreeMap<usize, (usize, usize, &SceneAnnotation)> = BTreeMap::new();

    for chunk in chunks {
        let Some(Ok(batch)) = results.get(&chunk.index) else {
            continue;
        };

        for annotation in &batch.annotations {
            if !chunk.covers(annotation.scene_id) {
                debug!(
                    "Ignoring annotation for scene {} outside chunk {}",
                    annotation.scene_id, chunk.index
                );
                continue;
            }

            let margin = context_margin(chunk, annotation.scene_id, total);
            let candidate = (margin, chunk.index, annotation);

            match winners.get(&annotation.scene_id) {
                Some(&(best_margin, best_index, _))
                    if (best_margin, best_index) >= (margin, chunk.index) => {}
                _ => {
                    winners.insert(annotation.scene_id, candidate);
                }
            }
        }
    }

    let mut outcome = MergeOutcome::default();
    for scene in scenes {
        match winners.get(&scene.id) {
            Some((_, _, annotation)) => outcome.scenes.push(AnnotatedScene::new(scene, (*annotation).clone())),
            None => outcome.unresolved.push(UnresolvedScene {
                id: scene.id,
                start_ms: scene.start_ms,
                end_ms: scene.end_ms,
            }),
        }
    }

    // Stable, so equal start times keep segmentation order
    outcome.scenes.sort_by_key(|scene| scene.start_ms);
    outcome.unresolved.sort_by_key(|scene| scene.start_ms);

    debug!(
        "Merged {} scenes, {} unresolved",
        outcome.scenes.len(),
        outcome.unresolved.len()
    );

    outcome
}

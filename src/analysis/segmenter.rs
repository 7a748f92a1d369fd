/*!
 * Scene segmentation for subtitle entries.
 *
 * Scenes are detected from timing gaps between consecutive subtitles: a
 * pause at least as long as the configured threshold closes the current
 * scene and opens a new one. Segmentation is purely synchronous.
 */

use std::time::Duration;

use serde::Serialize;

use crate::subtitle_processor::SubtitleEntry;

/// Contiguous run of subtitle entries treated as one unit of analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scene {
    /// Position in segmentation order, the scene's identity downstream
    pub id: usize,

    /// Earliest start of the member entries (ms)
    pub start_ms: u64,

    /// Latest end of the member entries (ms)
    pub end_ms: u64,

    /// Member texts joined with a single space
    pub transcript: String,

    /// Number of member entries, always at least one
    pub entry_count: usize,
}

impl Scene {
    /// Duration covered by the scene
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.end_ms.saturating_sub(self.start_ms))
    }
}

/// Accumulates entries until a boundary closes the scene.
struct SceneBuilder {
    start_ms: u64,
    end_ms: u64,
    last_end_ms: u64,
    texts: Vec<String>,
}

impl SceneBuilder {
    fn open(entry: &SubtitleEntry) -> Self {
        Self {
            start_ms: entry.start_time_ms,
            end_ms: entry.end_time_ms,
            last_end_ms: entry.end_time_ms,
            texts: vec![entry.text.clone()],
        }
    }

    fn push(&mut self, entry: &SubtitleEntry) {
        self.start_ms = self.start_ms.min(entry.start_time_ms);
        self.end_ms = self.end_ms.max(entry.end_time_ms);
        self.last_end_ms = entry.end_time_ms;
        self.texts.push(entry.text.clone());
    }

    fn close(self, id: usize) -> Scene {
        Scene {
            id,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            transcript: self.texts.join(" "),
            entry_count: self.texts.len(),
        }
    }
}

/// Whether the pause between the previous entry's end and `next_start_ms` opens a new scene.
///
/// Negative gaps (overlapping entries) never split. `Duration::MAX` never splits.
pub fn is_scene_boundary(previous_end_ms: u64, next_start_ms: u64, min_pause: Duration) -> bool {
    if next_start_ms < previous_end_ms {
        return false;
    }
    let gap_ms = u128::from(next_start_ms - previous_end_ms);
    gap_ms >= min_pause.as_millis()
}

/// Group ordered entries into scenes separated by pauses of at least `min_pause`.
///
/// The gap is measured from the last entry added to the open scene, not from
/// the scene's maximum end.
pub fn segment(entries: &[SubtitleEntry], min_pause: Duration) -> Vec<Scene> {
    let mut scenes = Vec::new();
    let mut current: Option<SceneBuilder> = None;

    for entry in entries {
        current = Some(match current.take() {
            None => SceneBuilder::open(entry),
            Some(builder) if is_scene_boundary(builder.last_end_ms, entry.start_time_ms, min_pause) => {
                scenes.push(builder.close(scenes.len()));
                SceneBuilder::open(entry)
            }
            Some(mut builder) => {
                builder.push(entry);
                builder
            }
        });
    }

    if let Some(builder) = current {
        scenes.push(builder.close(scenes.len()));
    }

    scenes
}

/// Scene segmenter holding its pause threshold.
#[derive(Debug, Clone)]
pub struct SceneSegmenter {
    min_pause: Duration,
}

impl SceneSegmenter {
    /// Create a segmenter with the given pause threshold.
    pub fn new(min_pause: Duration) -> Self {
        Self { min_pause }
    }

    pub fn min_pause(&self) -> Duration {
        self.min_pause
    }

    /// Segment entries into scenes.
    pub fn segment(&self, entries: &[SubtitleEntry]) -> Vec<Scene> {
        segment(entries, self.min_pause)
    }
}

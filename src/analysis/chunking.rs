/*!
 * Chunk planning over the scene list.
 *
 * Chunks are overlapping windows sized for one backend request. Adjacent
 * chunks share `overlap` scenes so that every boundary scene is seen with
 * context on both sides by at least one request.
 */

use log::debug;

use crate::errors::ConfigError;
use super::segmenter::Scene;

/// Contiguous window of scenes sent in a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the plan
    pub index: usize,

    /// Position of the first scene in the full scene list
    pub offset: usize,

    /// Copied scenes `offset..offset + len`
    pub scenes: Vec<Scene>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// One past the position of the last scene in the full list
    pub fn end(&self) -> usize {
        self.offset + self.scenes.len()
    }

    /// Whether the scene with this id lies inside the window
    pub fn covers(&self, scene_id: usize) -> bool {
        self.scenes.iter().any(|scene| scene.id == scene_id)
    }
}

/// Reject chunk settings that cannot produce a forward-moving window.
pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<(), ConfigError> {
    if chunk_size == 0 {
        return Err(ConfigError::ZeroChunkSize);
    }
    if overlap >= chunk_size {
        return Err(ConfigError::OverlapTooLarge { chunk_size, overlap });
    }
    Ok(())
}

/// Split scenes into windows of `chunk_size` advancing by `chunk_size - overlap`.
///
/// The last window may be shorter. Planning stops at the first window that
/// reaches the end of the list.
pub fn plan(scenes: &[Scene], chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, ConfigError> {
    validate_chunking(chunk_size, overlap)?;

    let stride = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut offset = 0;

    while offset < scenes.len() {
        let end = (offset + chunk_size).min(scenes.len());
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            scenes: scenes[offset..end].to_vec(),
        });

        if end == scenes.len() {
            break;
        }
        offset += stride;
    }

    debug!(
        "Planned {} chunks for {} scenes (size {}, overlap {})",
        chunks.len(),
        scenes.len(),
        chunk_size,
        overlap
    );

    Ok(chunks)
}

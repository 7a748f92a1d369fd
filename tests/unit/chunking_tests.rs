/*!
 * Tests for overlapping chunk planning
 */

use std::collections::BTreeMap;
use std::time::Duration;

use scenesage::analysis::{plan, segment, Chunk};
use scenesage::errors::ConfigError;
use crate::common::spaced_entries;

fn ids(chunk: &Chunk) -> Vec<usize> {
    chunk.scenes.iter().map(|s| s.id).collect()
}

fn scenes(count: usize) -> Vec<scenesage::analysis::Scene> {
    segment(&spaced_entries(count), Duration::from_secs(4))
}

/// Test seven scenes with size five and overlap one
#[test]
fn test_plan_withSevenScenes_shouldProduceTwoChunks() {
    let chunks = plan(&scenes(7), 5, 1).unwrap();

    assert_eq!(chunks.len(), 2);
    assert_eq!(ids(&chunks[0]), vec![0, 1, 2, 3, 4]);
    assert_eq!(ids(&chunks[1]), vec![4, 5, 6]);
    assert_eq!(chunks[1].offset, 4);
    assert_eq!(chunks[1].index, 1);
}

/// Test a list that fits into a single chunk
#[test]
fn test_plan_withFewerScenesThanChunkSize_shouldProduceOneChunk() {
    let chunks = plan(&scenes(3), 5, 1).unwrap();

    assert_eq!(chunks.len(), 1);
    assert_eq!(ids(&chunks[0]), vec![0, 1, 2]);
}

/// Test that every scene is covered and chunk lengths are bounded
#[test]
fn test_plan_withVariousSizes_shouldCoverEveryScene() {
    for (count, size, overlap) in [(1, 1, 0), (10, 3, 1), (11, 4, 2), (20, 6, 3), (9, 9, 8)] {
        let list = scenes(count);
        let chunks = plan(&list, size, overlap).unwrap();

        let mut coverage: BTreeMap<usize, usize> = BTreeMap::new();
        for chunk in &chunks {
            assert!(!chunk.is_empty() && chunk.len() <= size);
            for id in ids(chunk) {
                *coverage.entry(id).or_default() += 1;
            }
        }
        assert_eq!(coverage.len(), count, "count={} size={} overlap={}", count, size, overlap);
        assert_eq!(chunks.last().map(|c| c.end()), Some(count));
    }
}

/// Test that adjacent chunks share exactly `overlap` scenes
#[test]
fn test_plan_withOverlap_shouldShareScenesBetweenNeighbours() {
    let chunks = plan(&scenes(12), 5, 2).unwrap();

    for pair in chunks.windows(2) {
        let shared = ids(&pair[0]).into_iter().filter(|id| pair[1].covers(*id)).count();
        assert_eq!(shared, 2);
    }
}

/// Test that empty input needs no chunks
#[test]
fn test_plan_withNoScenes_shouldReturnNoChunks() {
    assert!(plan(&[], 5, 1).unwrap().is_empty());
}

/// Test invalid chunk settings
#[test]
fn test_plan_withInvalidSettings_shouldReturnConfigError() {
    let list = scenes(4);

    assert_eq!(plan(&list, 0, 0), Err(ConfigError::ZeroChunkSize));
    assert_eq!(
        plan(&list, 3, 3),
        Err(ConfigError::OverlapTooLarge { chunk_size: 3, overlap: 3 })
    );
    assert_eq!(
        plan(&[], 2, 5),
        Err(ConfigError::OverlapTooLarge { chunk_size: 2, overlap: 5 })
    );
}

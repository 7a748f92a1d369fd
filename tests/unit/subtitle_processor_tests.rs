/*!
 * Tests for subtitle processing functionality
 */

use std::fmt::Write;
use anyhow::Result;
use scenesage::subtitle_processor::{SubtitleCollection, SubtitleEntry};
use crate::common;

/// Test timestamp parsing and formatting
#[test]
fn test_timestamp_parsing_withValidTimestamp_shouldParseAndFormat() {
    let ts = "01:23:45,678";
    let ms = SubtitleEntry::parse_timestamp(ts).unwrap();
    assert_eq!(ms, 5025678);

    let formatted = SubtitleEntry::format_timestamp(ms);
    assert_eq!(formatted, ts);
}

/// Test rejection of malformed timestamps
#[test]
fn test_timestamp_parsing_withInvalidTimestamp_shouldFail() {
    assert!(SubtitleEntry::parse_timestamp("1:2:3").is_err());
    assert!(SubtitleEntry::parse_timestamp("00:00:01.500x").is_err());
}

/// Test subtitle entry display formatting
#[test]
fn test_subtitle_entry_display_withValidEntry_shouldFormatCorrectly() {
    let entry = SubtitleEntry::new(1, 5000, 10000, "Test subtitle".to_string());
    let mut output = String::new();
    write!(output, "{}", entry).unwrap();

    assert!(output.contains("00:00:05,000 --> 00:00:10,000"));
    assert!(output.contains("Test subtitle"));
}

/// Test validated construction
#[test]
fn test_newValidated_withBadInput_shouldFail() {
    assert!(SubtitleEntry::new_validated(1, 2000, 1000, "Backwards".to_string()).is_err());
    assert!(SubtitleEntry::new_validated(1, 1000, 2000, "   ".to_string()).is_err());

    let entry = SubtitleEntry::new_validated(1, 1000, 1000, "  Instant  ".to_string()).unwrap();
    assert_eq!(entry.text, "Instant");
}

/// Test parsing of SRT content
#[test]
fn test_parseSrtString_withMultilineEntries_shouldKeepLines() -> Result<()> {
    let content = "\u{feff}1\n00:00:01,000 --> 00:00:02,000\nFirst line\nSecond line\n\n2\n00:00:03,000 --> 00:00:04,000\nThird\n";

    let entries = SubtitleCollection::parse_srt_string(content)?;

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].text, "First line\nSecond line");
    assert_eq!(entries[1].start_time_ms, 3000);
    Ok(())
}

/// Test that invalid blocks are skipped and order is by start time
#[test]
fn test_parseSrtString_withInvalidAndUnorderedBlocks_shouldSkipAndSort() -> Result<()> {
    let content = "1\n00:00:10,000 --> 00:00:11,000\nLater\n\n2\n00:00:05,000 --> 00:00:04,000\nBroken\n\n3\n00:00:01,000 --> 00:00:02,000\nEarlier\n";

    let entries = SubtitleCollection::parse_srt_string(content)?;

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].text, "Earlier");
    assert_eq!(entries[1].text, "Later");
    Ok(())
}

/// Test that content without entries is an error
#[test]
fn test_parseSrtString_withNoEntries_shouldFail() {
    assert!(SubtitleCollection::parse_srt_string("").is_err());
    assert!(SubtitleCollection::parse_srt_string("just some text\n").is_err());
}

/// Test loading a subtitle file from disk
#[test]
fn test_fromSrtFile_withSampleFile_shouldLoadEntries() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = common::create_test_subtitle(dir.path(), "casablanca.srt")?;

    let collection = SubtitleCollection::from_srt_file(&path)?;

    assert_eq!(collection.source_file, path);
    assert_eq!(collection.entries.len(), 4);
    assert_eq!(collection.entries[3].text, "We'll always have Paris.");
    Ok(())
}

/// Test that a missing file is reported
#[test]
fn test_fromSrtFile_withMissingFile_shouldFail() {
    assert!(SubtitleCollection::from_srt_file("/nonexistent/movie.srt").is_err());
}

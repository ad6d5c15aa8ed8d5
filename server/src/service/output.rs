//! Process output classification
//!
//! Works one chunk at a time. A line split across two chunks is classified
//! as two separate lines; no cross-chunk buffering is done.

use crate::domain::lifecycle::ConsoleLevel;

/// Classify one line by lexical signal
pub fn classify_line(line: &str) -> ConsoleLevel {
    let lower = line.to_lowercase();
    if lower.contains("error") || lower.contains("err!") {
        ConsoleLevel::Error
    } else if lower.contains("warn") {
        ConsoleLevel::Warn
    } else {
        ConsoleLevel::Info
    }
}

/// Split a chunk into trimmed, non-empty lines with their level
pub fn classify_chunk(chunk: &str) -> Vec<(ConsoleLevel, String)> {
    chunk
        .split(|c: char| c == '\n' || c == '\r')
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(|line| (classify_line(line), line.to_string()))
        .collect()
}

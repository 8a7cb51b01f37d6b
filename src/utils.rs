//! Utility functions for the ladder service

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::types::Rating;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// First instant of the UTC month containing `now`
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: Rating, rating2: Rating) -> Rating {
    (rating1 - rating2).abs()
}

/// Collate lines into messages of at most `max_len` bytes.
///
/// A single line longer than `max_len` is emitted on its own.
pub fn chunk_lines<S: AsRef<str>>(lines: &[S], max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        let line = line.as_ref();
        if !current.is_empty() && current.len() + line.len() > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

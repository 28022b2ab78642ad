//! Chat export chunker
//!
//! Splits a chronologically ordered chat export into calendar-day chunks,
//! the unit of work for extraction. Day granularity bounds the LLM context
//! size predictably and gives the run one independent unit per day.
//!
//! ## Line grammar
//!
//! ```text
//! [DD.MM.YY, HH:MM:SS] Sender: Text
//! ```
//!
//! An optional Left-to-Right Mark (U+200E) may precede the opening bracket;
//! real exports contain it on attachment lines. A line without a leading
//! bracketed timestamp is a continuation of the previous message's text.
//!
//! ## Malformed-line policy
//!
//! Non-timestamp lines seen before the first timestamped message are dropped
//! with a warning. After that, every non-timestamp line is preserved as
//! continuation text under the previous sender. The policy is deterministic:
//! chunk content (and therefore cache fingerprints) depends only on the
//! input bytes.

use crate::error::{Error, Result};
use crate::types::{ChatMessage, DayChunk};
use std::collections::HashMap;

/// Result of chunking one export.
///
/// Warnings are collected, not fatal: a handful of unattributable preamble
/// lines should not sink the run.
#[derive(Debug, Default)]
pub struct ChunkReport {
    /// Day chunks in first-seen date order
    pub chunks: Vec<DayChunk>,
    /// Non-fatal irregularities encountered while parsing
    pub warnings: Vec<String>,
    /// Total lines read from the export
    pub lines_total: usize,
    /// Lines that parsed as new messages (continuations not counted)
    pub messages_parsed: usize,
}

/// Split a chat export into day chunks.
///
/// Messages are grouped by their calendar date, preserving original order
/// within each day; groups appear in first-seen date order. An export in
/// which no line matches the grammar at all is a parse error, not an empty
/// result.
pub fn chunk_by_day(source_id: &str, text: &str) -> Result<ChunkReport> {
    let mut report = ChunkReport::default();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut last_chunk: Option<usize> = None;

    for (line_no, raw_line) in text.lines().enumerate() {
        report.lines_total += 1;
        let line = raw_line.strip_prefix('\u{200e}').unwrap_or(raw_line);

        if let Some((date, time, rest)) = split_header(line) {
            let (sender, body) = match rest.split_once(": ") {
                Some((sender, body)) => (sender.to_string(), body.to_string()),
                // System lines carry no `Sender:` part
                None => (String::new(), rest.to_string()),
            };

            let chunk_idx = match index.get(date) {
                Some(&i) => i,
                None => {
                    report.chunks.push(DayChunk {
                        source_id: source_id.to_string(),
                        date: date.to_string(),
                        messages: Vec::new(),
                    });
                    let i = report.chunks.len() - 1;
                    index.insert(date.to_string(), i);
                    i
                }
            };

            report.chunks[chunk_idx].messages.push(ChatMessage {
                date: date.to_string(),
                time: time.to_string(),
                sender,
                text: body,
            });
            report.messages_parsed += 1;
            last_chunk = Some(chunk_idx);
        } else if let Some(chunk_idx) = last_chunk {
            if let Some(msg) = report.chunks[chunk_idx].messages.last_mut() {
                msg.text.push('\n');
                msg.text.push_str(line);
            }
        } else {
            let warning = format!(
                "{}: line {} has no timestamp and no preceding message, dropped",
                source_id,
                line_no + 1
            );
            tracing::warn!("{}", warning);
            report.warnings.push(warning);
        }
    }

    if report.messages_parsed == 0 {
        return Err(Error::Parse {
            source_id: source_id.to_string(),
            message: "no line matched the [DD.MM.YY, HH:MM:SS] grammar".to_string(),
        });
    }

    Ok(report)
}

/// Split a line into `(date, time, rest)` if it starts with a valid
/// `[DD.MM.YY, HH:MM:SS] ` header.
fn split_header(line: &str) -> Option<(&str, &str, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 20
        || bytes[0] != b'['
        || bytes[9] != b','
        || bytes[10] != b' '
        || bytes[19] != b']'
    {
        return None;
    }

    // The header region is all ASCII once validated, so slicing is safe
    let date = &line[1..9];
    let time = &line[11..19];
    if !is_date(date) || !is_time(time) {
        return None;
    }

    let rest = if bytes.len() == 20 {
        ""
    } else if bytes[20] == b' ' {
        &line[21..]
    } else {
        return None;
    };

    Some((date, time, rest))
}

/// `DD.MM.YY` — two-digit fields separated by dots.
fn is_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 8
        && b[2] == b'.'
        && b[5] == b'.'
        && [0, 1, 3, 4, 6, 7].iter().all(|&i| b[i].is_ascii_digit())
}

/// `HH:MM:SS` — two-digit fields separated by colons.
fn is_time(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 8
        && b[2] == b':'
        && b[5] == b':'
        && [0, 1, 3, 4, 6, 7].iter().all(|&i| b[i].is_ascii_digit())
}

//! Core domain types for keepsake
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Chunk** | One calendar day of ordered messages from one source log, the unit of LLM extraction |
//! | **Fingerprint** | SHA-256 content hash of a chunk's canonical text, part of the cache key |
//! | **Calling context** | Label distinguishing otherwise-identical cache keys produced by different callers |
//! | **Exchange** | A curated, mutable conversational unit composed of ordered messages |
//! | **Source file** | The provenance tag restricting which exchanges may be merged together |

use serde::{Deserialize, Serialize};

// ============================================
// Chat export (chunker input/output)
// ============================================

/// One parsed message from a chat export.
///
/// `date` and `time` keep the export's own textual formats (`DD.MM.YY`,
/// `HH:MM:SS`) so that a chunk serializes back to the exact bytes it was
/// read from. Multi-line messages carry embedded newlines in `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message date as written in the export (`DD.MM.YY`)
    pub date: String,
    /// Message time as written in the export (`HH:MM:SS`)
    pub time: String,
    /// Sender name; empty for system lines that carry no `Sender:` part
    pub sender: String,
    /// Message text, continuation lines joined with `\n`
    pub text: String,
}

impl ChatMessage {
    /// Render the message back into export line form.
    pub fn to_line(&self) -> String {
        if self.sender.is_empty() {
            format!("[{}, {}] {}", self.date, self.time, self.text)
        } else {
            format!("[{}, {}] {}: {}", self.date, self.time, self.sender, self.text)
        }
    }
}

/// One calendar day of messages from one source log.
///
/// Chunks are ephemeral: they exist to produce a cache fingerprint and the
/// LLM request payload, and are never persisted themselves.
#[derive(Debug, Clone)]
pub struct DayChunk {
    /// Identifier of the originating log (file name or caller-supplied tag)
    pub source_id: String,
    /// Calendar date shared by every message in the chunk (`DD.MM.YY`)
    pub date: String,
    /// Messages of that day, in original export order
    pub messages: Vec<ChatMessage>,
}

impl DayChunk {
    /// Serialize the chunk to canonical text.
    ///
    /// This is both the text embedded in the LLM prompt and the exact byte
    /// sequence that is fingerprinted, so it must be deterministic.
    pub fn canonical_text(&self) -> String {
        let lines: Vec<String> = self.messages.iter().map(ChatMessage::to_line).collect();
        lines.join("\n")
    }

    /// Short display label for logs and run reports.
    pub fn label(&self) -> String {
        format!("{}:{}", self.source_id, self.date)
    }
}

// ============================================
// Extraction results (LLM output schema)
// ============================================

/// One message record as returned by the LLM.
///
/// All fields are nullable: the service occasionally omits a timestamp or
/// attributes a quote to nobody, and the schema must represent that rather
/// than coerce it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub date: Option<String>,
    pub time: Option<String>,
    pub person: Option<String>,
    pub quote: Option<String>,
}

/// The fixed response schema for one chunk.
///
/// A list of exchanges, each an ordered list of message records. A day with
/// nothing memorable is an empty list, not an error. Anything that does not
/// deserialize into this shape is a schema violation for the whole chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionResult {
    #[serde(default)]
    pub exchanges: Vec<Vec<ExtractedMessage>>,
}

impl ExtractionResult {
    /// Total message records across all exchanges.
    pub fn message_count(&self) -> usize {
        self.exchanges.iter().map(Vec::len).sum()
    }
}

// ============================================
// Normalized graph (exchanges + messages)
// ============================================

/// A curated unit of conversation.
///
/// The `(fingerprint, calling_context)` pair is a weak provenance reference
/// to the cache entry the exchange was derived from; deleting that cache
/// entry leaves the exchange untouched. `source_file` never changes and
/// gates which exchanges may be merged together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i64,
    pub fingerprint: String,
    pub calling_context: String,
    /// Ordinal position within the originating extraction result
    pub exchange_index: i64,
    pub source_file: String,
}

/// One line of dialogue within an exchange.
///
/// Positions within an exchange are contiguous from zero and re-derived
/// whenever the exchange's message set changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub exchange_id: i64,
    pub position: i64,
    pub date: Option<String>,
    pub time: Option<String>,
    pub person: Option<String>,
    pub quote: Option<String>,
}

/// List-view projection of an exchange: the row plus its first message.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeSummary {
    pub id: i64,
    pub exchange_index: i64,
    pub source_file: String,
    pub first_message: Option<MessageRow>,
}

/// Detail-view projection: the row plus all messages ordered by position.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeDetail {
    pub id: i64,
    pub fingerprint: String,
    pub calling_context: String,
    pub exchange_index: i64,
    pub source_file: String,
    pub messages: Vec<MessageRow>,
}

/// One page of a listing, with enough information to drive pagination.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: i64,
    pub has_more: bool,
}

/// Sort direction for the exchange listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(format!("unknown sort order: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_to_line() {
        let msg = ChatMessage {
            date: "15.01.25".to_string(),
            time: "20:15:23".to_string(),
            sender: "Emma".to_string(),
            text: "I just realized something".to_string(),
        };
        assert_eq!(msg.to_line(), "[15.01.25, 20:15:23] Emma: I just realized something");
    }

    #[test]
    fn test_senderless_line_round_trip() {
        let msg = ChatMessage {
            date: "15.01.25".to_string(),
            time: "20:15:23".to_string(),
            sender: String::new(),
            text: "Messages and calls are end-to-end encrypted.".to_string(),
        };
        assert_eq!(
            msg.to_line(),
            "[15.01.25, 20:15:23] Messages and calls are end-to-end encrypted."
        );
    }

    #[test]
    fn test_canonical_text_is_deterministic() {
        let chunk = DayChunk {
            source_id: "chat.txt".to_string(),
            date: "15.01.25".to_string(),
            messages: vec![
                ChatMessage {
                    date: "15.01.25".to_string(),
                    time: "09:00:00".to_string(),
                    sender: "A".to_string(),
                    text: "hi\nsecond line".to_string(),
                },
                ChatMessage {
                    date: "15.01.25".to_string(),
                    time: "09:01:00".to_string(),
                    sender: "B".to_string(),
                    text: "hey".to_string(),
                },
            ],
        };
        let text = chunk.canonical_text();
        assert_eq!(text, chunk.canonical_text());
        assert_eq!(
            text,
            "[15.01.25, 09:00:00] A: hi\nsecond line\n[15.01.25, 09:01:00] B: hey"
        );
    }

    #[test]
    fn test_extraction_result_schema() {
        let raw = r#"{"exchanges": [[{"date": "15.01.25", "time": "09:00:00", "person": "A", "quote": "hi"}]]}"#;
        let result: ExtractionResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.exchanges.len(), 1);
        assert_eq!(result.message_count(), 1);
        assert_eq!(result.exchanges[0][0].person.as_deref(), Some("A"));
    }

    #[test]
    fn test_extraction_result_missing_key_is_empty() {
        let result: ExtractionResult = serde_json::from_str("{}").unwrap();
        assert!(result.exchanges.is_empty());
    }

    #[test]
    fn test_extraction_result_nullable_fields() {
        let raw = r#"{"exchanges": [[{"date": null, "time": null, "person": "A", "quote": "hi"}]]}"#;
        let result: ExtractionResult = serde_json::from_str(raw).unwrap();
        assert!(result.exchanges[0][0].date.is_none());
    }

    #[test]
    fn test_sort_order_from_str() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}

//! Normalization of extraction results into the exchange/message graph
//!
//! A pure, deterministic transform: no external calls, no retries. Each
//! extraction result becomes one exchange row per extracted exchange
//! (tagged with its `(fingerprint, calling_context)` provenance and the
//! originating chunk's source file) and one message row per record, with
//! positions equal to the record's index within its exchange.
//!
//! Results whose `(fingerprint, calling_context)` pair already has exchange
//! rows are skipped. That makes normalization idempotent, and it means that
//! re-running extraction after a cache-clear cannot duplicate surviving
//! exchanges or resurrect ones the curator deleted.

use crate::db::Database;
use crate::error::Result;
use crate::extract::ChunkExtraction;
use rusqlite::params;

/// Outcome of normalizing a set of extraction results.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Results materialized into rows on this run
    pub results_normalized: usize,
    /// Results skipped because their rows already exist
    pub results_skipped: usize,
    /// Exchange rows inserted
    pub exchanges_inserted: usize,
    /// Message rows inserted
    pub messages_inserted: usize,
}

/// Materialize extraction results into exchange and message rows.
///
/// Results are processed in the order given (chunk order); each result is
/// one transaction, so a failure leaves no partially normalized result
/// behind.
pub fn normalize(db: &Database, extractions: &[ChunkExtraction]) -> Result<NormalizeReport> {
    let mut report = NormalizeReport::default();

    for extraction in extractions {
        if db.has_exchanges_for(&extraction.fingerprint, &extraction.calling_context)? {
            tracing::debug!(
                fingerprint = %extraction.fingerprint,
                "Exchanges already normalized, skipping"
            );
            report.results_skipped += 1;
            continue;
        }

        let mut exchanges_inserted = 0;
        let mut messages_inserted = 0;

        let mut conn = db.connection();
        let tx = conn.transaction()?;

        for (exchange_index, exchange) in extraction.result.exchanges.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO exchanges (fingerprint, calling_context, exchange_index, source_file)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    extraction.fingerprint,
                    extraction.calling_context,
                    exchange_index as i64,
                    extraction.source_file,
                ],
            )?;
            let exchange_id = tx.last_insert_rowid();

            for (position, message) in exchange.iter().enumerate() {
                tx.execute(
                    r#"
                    INSERT INTO messages (exchange_id, position, date, time, person, quote)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        exchange_id,
                        position as i64,
                        message.date,
                        message.time,
                        message.person,
                        message.quote,
                    ],
                )?;
            }

            exchanges_inserted += 1;
            messages_inserted += exchange.len();
        }

        tx.commit()?;
        drop(conn);

        report.results_normalized += 1;
        report.exchanges_inserted += exchanges_inserted;
        report.messages_inserted += messages_inserted;

        tracing::info!(
            fingerprint = %extraction.fingerprint,
            exchanges = exchanges_inserted,
            messages = messages_inserted,
            "Normalized extraction result"
        );
    }

    Ok(report)
}

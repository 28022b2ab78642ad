//! Curation engine: the mutation surface over the exchange/message graph
//!
//! Three operations: delete messages, delete an exchange (cascading), and
//! merge exchanges. Each validates its preconditions before touching
//! anything and runs as one transaction, so a rejected or failed operation
//! leaves the graph exactly as it was. Positions within an exchange are
//! re-derived after every mutation: contiguous from zero, original relative
//! order preserved.

use crate::db::Database;
use crate::error::{CurationError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, params_from_iter, Transaction};
use std::collections::{BTreeSet, HashSet};

/// Mutation surface over the normalized graph.
///
/// Holds a borrow of the shared database handle; the single-writer
/// assumption lives with the caller.
pub struct CurationEngine<'a> {
    db: &'a Database,
}

impl<'a> CurationEngine<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Delete messages by id.
    ///
    /// Every id must name an existing message, otherwise the whole request
    /// is rejected with [`CurationError::UnknownMessage`] and nothing
    /// changes. Affected exchanges are re-indexed; an exchange reduced to
    /// zero messages remains as an empty row (removing the exchange itself
    /// is a separate, explicit operation).
    ///
    /// Returns the number of messages deleted.
    pub fn delete_messages(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut ids: Vec<i64> = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut conn = self.db.connection();
        let tx = conn.transaction()?;

        let placeholders = placeholders(ids.len());
        let sql =
            format!("SELECT id, exchange_id FROM messages WHERE id IN ({placeholders})");
        let rows: Vec<(i64, i64)> = tx
            .prepare(&sql)?
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let found: HashSet<i64> = rows.iter().map(|(id, _)| *id).collect();
        for id in &ids {
            if !found.contains(id) {
                return Err(CurationError::UnknownMessage(*id).into());
            }
        }

        // Deterministic iteration order for the re-index pass
        let affected: BTreeSet<i64> = rows.iter().map(|(_, exchange_id)| *exchange_id).collect();

        let sql = format!("DELETE FROM messages WHERE id IN ({placeholders})");
        let deleted = tx.execute(&sql, params_from_iter(ids.iter()))?;

        for exchange_id in &affected {
            reindex_exchange(&tx, *exchange_id)?;
        }

        tx.commit()?;

        tracing::info!(
            deleted,
            exchanges_reindexed = affected.len(),
            "Deleted messages"
        );
        Ok(deleted)
    }

    /// Delete an exchange and, via cascade, all of its messages.
    pub fn delete_exchange(&self, id: i64) -> Result<()> {
        let mut conn = self.db.connection();
        let tx = conn.transaction()?;

        let deleted = tx.execute("DELETE FROM exchanges WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(CurationError::UnknownExchange(id).into());
        }

        tx.commit()?;

        tracing::info!(exchange_id = id, "Deleted exchange and its messages");
        Ok(())
    }

    /// Merge exchanges into the one with the smallest id.
    ///
    /// Preconditions, checked before any mutation: at least two distinct
    /// ids, all present, all sharing one source file. The combined messages
    /// are sorted chronologically by their date+time (`DD.MM.YY`,
    /// `HH:MM[:SS]`, 21st century assumed), with original position as the
    /// tie-break and unparseable timestamps sorting last; positions are then
    /// reassigned `0..N-1` and the non-target rows deleted. One atomic unit.
    ///
    /// Returns the surviving (target) exchange id.
    pub fn merge_exchanges(&self, ids: &[i64]) -> Result<i64> {
        let mut ids: Vec<i64> = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() < 2 {
            return Err(CurationError::NotEnoughExchanges.into());
        }

        let mut conn = self.db.connection();
        let tx = conn.transaction()?;

        let id_placeholders = placeholders(ids.len());
        let sql =
            format!("SELECT id, source_file FROM exchanges WHERE id IN ({id_placeholders})");
        let rows: Vec<(i64, String)> = tx
            .prepare(&sql)?
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let found: HashSet<i64> = rows.iter().map(|(id, _)| *id).collect();
        for id in &ids {
            if !found.contains(id) {
                return Err(CurationError::UnknownExchange(*id).into());
            }
        }

        let first_source = &rows[0].1;
        for (_, source_file) in &rows {
            if source_file != first_source {
                return Err(CurationError::CrossSourceMerge(
                    first_source.clone(),
                    source_file.clone(),
                )
                .into());
            }
        }

        let target = ids[0];

        let sql = format!(
            "SELECT id, position, date, time FROM messages WHERE exchange_id IN ({id_placeholders})"
        );
        let mut messages: Vec<MergeMessage> = tx
            .prepare(&sql)?
            .query_map(params_from_iter(ids.iter()), |row| {
                let date: Option<String> = row.get(2)?;
                let time: Option<String> = row.get(3)?;
                Ok(MergeMessage {
                    id: row.get(0)?,
                    position: row.get(1)?,
                    instant: parse_instant(date.as_deref(), time.as_deref()),
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        messages.sort_by(|a, b| match (&a.instant, &b.instant) {
            (Some(x), Some(y)) => x.cmp(y).then(a.position.cmp(&b.position)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.position.cmp(&b.position),
        });

        for (position, message) in messages.iter().enumerate() {
            tx.execute(
                "UPDATE messages SET exchange_id = ?1, position = ?2 WHERE id = ?3",
                params![target, position as i64, message.id],
            )?;
        }

        let absorbed = &ids[1..];
        let sql = format!(
            "DELETE FROM exchanges WHERE id IN ({})",
            placeholders(absorbed.len())
        );
        tx.execute(&sql, params_from_iter(absorbed.iter()))?;

        tx.commit()?;

        tracing::info!(
            target,
            absorbed = absorbed.len(),
            messages = messages.len(),
            "Merged exchanges"
        );
        Ok(target)
    }
}

struct MergeMessage {
    id: i64,
    position: i64,
    instant: Option<NaiveDateTime>,
}

/// Reassign positions `0..k-1` for an exchange, preserving relative order.
fn reindex_exchange(tx: &Transaction, exchange_id: i64) -> Result<()> {
    let ids: Vec<i64> = tx
        .prepare(
            "SELECT id FROM messages WHERE exchange_id = ?1 ORDER BY position ASC, id ASC",
        )?
        .query_map(params![exchange_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for (position, id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE messages SET position = ?1 WHERE id = ?2",
            params![position as i64, id],
        )?;
    }

    Ok(())
}

/// Parse the stored `DD.MM.YY` date and `HH:MM[:SS]` time into an instant.
///
/// Two-digit years resolve to the 21st century. `None` means the pair is
/// missing or unparseable and sorts after every parseable instant.
fn parse_instant(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = date?;
    let time = time?;

    let mut parts = date.split('.');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;

    let mut parts = time.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: u32 = match parts.next() {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;

    Some(NaiveDateTime::new(date, time))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

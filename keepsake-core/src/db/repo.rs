//! Database repository layer
//!
//! Provides the cache store and read queries over the exchange/message
//! graph. Mutating curation operations live in [`crate::curate`]; they run
//! as transactions on the connection exposed here.

use crate::error::{Error, Result};
use crate::types::{Exchange, ExchangeDetail, ExchangeSummary, MessageRow, Page, SortOrder};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle (single connection, single writer)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Foreign keys stay on for the lifetime of the connection; the
        // cascade from exchanges to messages depends on it.
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for transactional callers)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Cache store
    // ============================================

    /// Insert a cache entry for a `(fingerprint, calling_context)` pair.
    ///
    /// Entries are immutable: if the pair already exists the insert is a
    /// no-op and the stored payload wins. Returns whether a row was written.
    pub fn insert_cache_entry(
        &self,
        fingerprint: &str,
        calling_context: &str,
        payload: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO cache_entries (fingerprint, calling_context, payload, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                fingerprint,
                calling_context,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Look up a cached payload. `None` is a cache miss.
    pub fn get_cache_entry(
        &self,
        fingerprint: &str,
        calling_context: &str,
    ) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT payload FROM cache_entries WHERE fingerprint = ?1 AND calling_context = ?2",
            params![fingerprint, calling_context],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// Drop all cache entries. The exchange/message graph is untouched.
    ///
    /// Returns the number of entries removed.
    pub fn clear_cache(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM cache_entries", [])?;
        tracing::info!(removed, "Cleared extraction cache");
        Ok(removed)
    }

    /// Number of cache entries currently stored.
    pub fn cache_entry_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))
            .map_err(Error::from)
    }

    // ============================================
    // Exchange queries
    // ============================================

    /// Whether any exchange rows were already normalized from this
    /// `(fingerprint, calling_context)` pair.
    pub fn has_exchanges_for(&self, fingerprint: &str, calling_context: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM exchanges WHERE fingerprint = ?1 AND calling_context = ?2",
            params![fingerprint, calling_context],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get one exchange with its ordered messages.
    ///
    /// Returns `None` for an unknown id. An exchange whose messages were all
    /// deleted is still found, with an empty message list.
    pub fn get_exchange(&self, id: i64) -> Result<Option<ExchangeDetail>> {
        let conn = self.conn.lock().unwrap();

        let exchange = conn
            .query_row(
                "SELECT id, fingerprint, calling_context, exchange_index, source_file
                 FROM exchanges WHERE id = ?1",
                params![id],
                Self::row_to_exchange,
            )
            .optional()?;

        let Some(exchange) = exchange else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, exchange_id, position, date, time, person, quote
             FROM messages WHERE exchange_id = ?1
             ORDER BY position ASC",
        )?;
        let messages = stmt
            .query_map(params![id], Self::row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(ExchangeDetail {
            id: exchange.id,
            fingerprint: exchange.fingerprint,
            calling_context: exchange.calling_context,
            exchange_index: exchange.exchange_index,
            source_file: exchange.source_file,
            messages,
        }))
    }

    /// List exchanges one page at a time, each carrying its first message.
    ///
    /// Ordering is by the first message's date+time. The stored `DD.MM.YY`
    /// and `HH:MM:SS` strings are rearranged into a sortable instant in SQL;
    /// exchanges without a first message (or without timestamps) sort last
    /// ascending and first descending.
    pub fn list_exchanges(
        &self,
        page: u32,
        page_size: u32,
        order: SortOrder,
    ) -> Result<Page<ExchangeSummary>> {
        let page = page.max(1);
        let offset = (page as i64 - 1) * page_size as i64;

        let conn = self.conn.lock().unwrap();

        let total_items: i64 = conn.query_row("SELECT COUNT(*) FROM exchanges", [], |r| r.get(0))?;

        let order_clause = match order {
            SortOrder::Ascending => "ORDER BY first_instant ASC NULLS LAST, e.id ASC",
            SortOrder::Descending => "ORDER BY first_instant DESC NULLS FIRST, e.id DESC",
        };

        let sql = format!(
            r#"
            SELECT
                e.id, e.exchange_index, e.source_file,
                m.id, m.exchange_id, m.position, m.date, m.time, m.person, m.quote,
                CASE
                    WHEN m.date IS NOT NULL AND m.time IS NOT NULL THEN
                        ('20' || substr(m.date, 7, 2) || '-' || substr(m.date, 4, 2)
                              || '-' || substr(m.date, 1, 2) || 'T' || m.time)
                END AS first_instant
            FROM exchanges e
            LEFT JOIN messages m ON m.exchange_id = e.id AND m.position = 0
            {order_clause}
            LIMIT ?1 OFFSET ?2
            "#
        );

        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![page_size as i64, offset], |row| {
                let first_message_id: Option<i64> = row.get(3)?;
                let first_message = match first_message_id {
                    Some(message_id) => Some(MessageRow {
                        id: message_id,
                        exchange_id: row.get(4)?,
                        position: row.get(5)?,
                        date: row.get(6)?,
                        time: row.get(7)?,
                        person: row.get(8)?,
                        quote: row.get(9)?,
                    }),
                    None => None,
                };
                Ok(ExchangeSummary {
                    id: row.get(0)?,
                    exchange_index: row.get(1)?,
                    source_file: row.get(2)?,
                    first_message,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let has_more = (page as i64) * (page_size as i64) < total_items;

        Ok(Page {
            items,
            page,
            page_size,
            total_items,
            has_more,
        })
    }

    /// Total number of exchange rows.
    pub fn exchange_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM exchanges", [], |r| r.get(0))
            .map_err(Error::from)
    }

    /// Total number of message rows.
    pub fn message_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .map_err(Error::from)
    }

    fn row_to_exchange(row: &Row) -> rusqlite::Result<Exchange> {
        Ok(Exchange {
            id: row.get(0)?,
            fingerprint: row.get(1)?,
            calling_context: row.get(2)?,
            exchange_index: row.get(3)?,
            source_file: row.get(4)?,
        })
    }

    pub(crate) fn row_to_message(row: &Row) -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            exchange_id: row.get(1)?,
            position: row.get(2)?,
            date: row.get(3)?,
            time: row.get(4)?,
            person: row.get(5)?,
            quote: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    /// Insert an exchange with messages at hourly intervals; returns its id.
    fn seed_exchange(db: &Database, source: &str, index: i64, first_hour: u32, count: usize) -> i64 {
        let conn = db.connection();
        conn.execute(
            "INSERT INTO exchanges (fingerprint, calling_context, exchange_index, source_file)
             VALUES (?1, 'extract.memorable', ?2, ?3)",
            params![format!("fp-{source}-{index}"), index, source],
        )
        .unwrap();
        let exchange_id = conn.last_insert_rowid();
        for i in 0..count {
            conn.execute(
                "INSERT INTO messages (exchange_id, position, date, time, person, quote)
                 VALUES (?1, ?2, '15.01.25', ?3, 'Alice', ?4)",
                params![
                    exchange_id,
                    i as i64,
                    format!("{:02}:00:00", first_hour + i as u32),
                    format!("msg {}", i)
                ],
            )
            .unwrap();
        }
        exchange_id
    }

    #[test]
    fn test_cache_round_trip() {
        let db = test_db();

        assert!(db.get_cache_entry("abc", "ctx").unwrap().is_none());
        assert!(db.insert_cache_entry("abc", "ctx", r#"{"exchanges":[]}"#).unwrap());
        assert_eq!(
            db.get_cache_entry("abc", "ctx").unwrap().as_deref(),
            Some(r#"{"exchanges":[]}"#)
        );
    }

    #[test]
    fn test_cache_entries_are_immutable() {
        let db = test_db();

        assert!(db.insert_cache_entry("abc", "ctx", "first").unwrap());
        // Second insert for the same pair is ignored; the first payload wins.
        assert!(!db.insert_cache_entry("abc", "ctx", "second").unwrap());
        assert_eq!(db.get_cache_entry("abc", "ctx").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_cache_context_disambiguates() {
        let db = test_db();

        db.insert_cache_entry("abc", "pass-one", "one").unwrap();
        db.insert_cache_entry("abc", "pass-two", "two").unwrap();

        assert_eq!(db.get_cache_entry("abc", "pass-one").unwrap().as_deref(), Some("one"));
        assert_eq!(db.get_cache_entry("abc", "pass-two").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_clear_cache_leaves_graph() {
        let db = test_db();

        db.insert_cache_entry("abc", "ctx", "payload").unwrap();
        let exchange_id = seed_exchange(&db, "chat.txt", 0, 10, 2);

        assert_eq!(db.clear_cache().unwrap(), 1);
        assert_eq!(db.cache_entry_count().unwrap(), 0);

        let detail = db.get_exchange(exchange_id).unwrap().unwrap();
        assert_eq!(detail.messages.len(), 2);
    }

    #[test]
    fn test_get_exchange_unknown() {
        let db = test_db();
        assert!(db.get_exchange(999).unwrap().is_none());
    }

    #[test]
    fn test_get_exchange_orders_messages() {
        let db = test_db();
        let exchange_id = seed_exchange(&db, "chat.txt", 0, 9, 3);

        let detail = db.get_exchange(exchange_id).unwrap().unwrap();
        assert_eq!(detail.source_file, "chat.txt");
        let positions: Vec<i64> = detail.messages.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_list_exchanges_pagination_and_order() {
        let db = test_db();
        // Seed three exchanges with first messages at 12:00, 10:00, 11:00.
        let e_noon = seed_exchange(&db, "chat.txt", 0, 12, 1);
        let e_early = seed_exchange(&db, "chat.txt", 1, 10, 1);
        let e_mid = seed_exchange(&db, "chat.txt", 2, 11, 1);

        let page1 = db.list_exchanges(1, 2, SortOrder::Ascending).unwrap();
        assert_eq!(page1.total_items, 3);
        assert!(page1.has_more);
        let ids: Vec<i64> = page1.items.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![e_early, e_mid]);
        assert_eq!(
            page1.items[0].first_message.as_ref().unwrap().time.as_deref(),
            Some("10:00:00")
        );

        let page2 = db.list_exchanges(2, 2, SortOrder::Ascending).unwrap();
        assert!(!page2.has_more);
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].id, e_noon);

        let desc = db.list_exchanges(1, 3, SortOrder::Descending).unwrap();
        let ids: Vec<i64> = desc.items.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![e_noon, e_mid, e_early]);
    }

    #[test]
    fn test_list_exchanges_date_dominates_time() {
        let db = test_db();
        let conn = db.connection();
        conn.execute(
            "INSERT INTO exchanges (fingerprint, calling_context, exchange_index, source_file)
             VALUES ('fp-a', 'ctx', 0, 'chat.txt')",
            [],
        )
        .unwrap();
        let day_one = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO messages (exchange_id, position, date, time, person, quote)
             VALUES (?1, 0, '15.01.25', '23:00:00', 'Alice', 'late')",
            params![day_one],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO exchanges (fingerprint, calling_context, exchange_index, source_file)
             VALUES ('fp-b', 'ctx', 0, 'chat.txt')",
            [],
        )
        .unwrap();
        let day_two = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO messages (exchange_id, position, date, time, person, quote)
             VALUES (?1, 0, '16.01.25', '09:00:00', 'Bob', 'early next day')",
            params![day_two],
        )
        .unwrap();
        drop(conn);

        let page = db.list_exchanges(1, 10, SortOrder::Ascending).unwrap();
        let ids: Vec<i64> = page.items.iter().map(|s| s.id).collect();
        // 09:00 on the 16th sorts after 23:00 on the 15th.
        assert_eq!(ids, vec![day_one, day_two]);
    }

    #[test]
    fn test_list_exchanges_empty_exchange_sorts_last() {
        let db = test_db();
        let with_msg = seed_exchange(&db, "chat.txt", 0, 10, 1);
        let empty = {
            let conn = db.connection();
            conn.execute(
                "INSERT INTO exchanges (fingerprint, calling_context, exchange_index, source_file)
                 VALUES ('fp-empty', 'ctx', 0, 'chat.txt')",
                [],
            )
            .unwrap();
            conn.last_insert_rowid()
        };

        let page = db.list_exchanges(1, 10, SortOrder::Ascending).unwrap();
        let ids: Vec<i64> = page.items.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![with_msg, empty]);
        assert!(page.items[1].first_message.is_none());
    }
}

//! Two-tier record view over the active and historical stores.
//!
//! Reads consult both stores; the active store's row for a key always
//! shadows the historical row for the same key. Writes only ever reach the
//! active store. A historical store that is absent or fails to answer is
//! treated as empty.
//!
//! Deleting a row in the active store leaves a tombstone (written by a
//! trigger in the same statement). A tombstoned key hides its historical
//! row, so a deleted record never falls back to its frozen copy.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Encode, FromRow, Sqlite, Type};
use tracing::{debug, warn};

use super::Database;
use crate::{Result, TempboxError};

/// A record stored under the same table in both physical stores.
pub trait Record: for<'r> FromRow<'r, SqliteRow> + Clone + Send + Unpin {
    /// Primary key type.
    type Key: Clone
        + Display
        + Eq
        + Hash
        + Send
        + Sync
        + for<'q> Encode<'q, Sqlite>
        + Type<Sqlite>
        + 'static;

    /// Table name.
    const TABLE: &'static str;
    /// Primary key column.
    const KEY_COLUMN: &'static str;
    /// All columns, key first, in the order [`Record::bind_values`] binds them.
    const COLUMNS: &'static [&'static str];

    /// Primary key of this record.
    fn key(&self) -> Self::Key;

    /// Bind every column of [`Record::COLUMNS`] in order.
    fn bind_values<'q>(
        &'q self,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>>;

    /// Ordering used for merged listings.
    fn listing_order(&self, other: &Self) -> Ordering;
}

fn select_sql<R: Record>(filter_column: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?",
        R::COLUMNS.join(", "),
        R::TABLE,
        filter_column
    )
}

fn select_all_sql<R: Record>() -> String {
    format!("SELECT {} FROM {}", R::COLUMNS.join(", "), R::TABLE)
}

/// Bound on host parameters per `IN (...)` list.
const KEY_BATCH: usize = 500;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn insert_sql<R: Record>(on_conflict: &str) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({}) {}",
        R::TABLE,
        R::COLUMNS.join(", "),
        placeholders(R::COLUMNS.len()),
        on_conflict
    )
}

fn upsert_clause<R: Record>() -> String {
    let updates = R::COLUMNS
        .iter()
        .filter(|column| **column != R::KEY_COLUMN)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("ON CONFLICT({}) DO UPDATE SET {}", R::KEY_COLUMN, updates)
}

/// Merged view over an active store and an optional historical store.
#[derive(Debug, Clone, Copy)]
pub struct DualStoreMerger<'a> {
    active: &'a Database,
    historical: Option<&'a Database>,
}

impl<'a> DualStoreMerger<'a> {
    /// Create a merger over the given stores.
    pub fn new(active: &'a Database, historical: Option<&'a Database>) -> Self {
        Self { active, historical }
    }

    /// The active store.
    pub fn active(&self) -> &'a Database {
        self.active
    }

    /// The historical store, if one is attached.
    pub fn historical(&self) -> Option<&'a Database> {
        self.historical
    }

    /// Get a record by key. Active shadows historical unconditionally.
    pub async fn get<R: Record>(&self, key: &R::Key) -> Result<Option<R>> {
        if let Some(record) = self.get_active::<R>(key).await? {
            return Ok(Some(record));
        }
        self.get_historical::<R>(key).await
    }

    /// Get a record by key from the active store only.
    pub async fn get_active<R: Record>(&self, key: &R::Key) -> Result<Option<R>> {
        let sql = select_sql::<R>(R::KEY_COLUMN);
        let sql = sql.as_str();
        let pool = self.active.pool();
        self.active
            .with_retry("get", move || async move {
                sqlx::query_as::<_, R>(sql)
                    .bind(key.clone())
                    .fetch_optional(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await
    }

    /// Get a record by key from the historical store only.
    ///
    /// Unavailable historical data reads as absent, and so does a row whose
    /// key has been deleted in the active store.
    pub async fn get_historical<R: Record>(&self, key: &R::Key) -> Result<Option<R>> {
        let Some(historical) = self.historical else {
            return Ok(None);
        };
        let sql = select_sql::<R>(R::KEY_COLUMN);
        let record = match sqlx::query_as::<_, R>(&sql)
            .bind(key.clone())
            .fetch_optional(historical.pool())
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!("Historical store read on {} failed, treating as empty: {}", R::TABLE, e);
                None
            }
        };
        let Some(record) = record else {
            return Ok(None);
        };
        if self.is_tombstoned::<R>(key).await? {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Check whether a key was deleted from the active store.
    pub async fn is_tombstoned<R: Record>(&self, key: &R::Key) -> Result<bool> {
        let key = key.to_string();
        let key = key.as_str();
        let pool = self.active.pool();
        let found: Option<i64> = self
            .active
            .with_retry("is_tombstoned", move || async move {
                sqlx::query_scalar(
                    "SELECT 1 FROM tombstones WHERE table_name = ? AND record_key = ?",
                )
                .bind(R::TABLE)
                .bind(key)
                .fetch_optional(pool)
                .await
                .map_err(TempboxError::from)
            })
            .await?;
        Ok(found.is_some())
    }

    async fn tombstoned_keys<R: Record>(&self) -> Result<HashSet<String>> {
        let pool = self.active.pool();
        let keys: Vec<String> = self
            .active
            .with_retry("tombstoned_keys", move || async move {
                sqlx::query_scalar("SELECT record_key FROM tombstones WHERE table_name = ?")
                    .bind(R::TABLE)
                    .fetch_all(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(keys.into_iter().collect())
    }

    /// Drop historical rows whose key is tombstoned.
    async fn visible_historical<R: Record>(&self, historical: Vec<R>) -> Result<Vec<R>> {
        if historical.is_empty() {
            return Ok(historical);
        }
        let tombstoned = self.tombstoned_keys::<R>().await?;
        if tombstoned.is_empty() {
            return Ok(historical);
        }
        Ok(historical
            .into_iter()
            .filter(|record| !tombstoned.contains(&record.key().to_string()))
            .collect())
    }

    /// Remove tombstones that hide nothing, i.e. whose key the historical
    /// store does not hold.
    ///
    /// Without a historical store, or when it cannot be read, every
    /// tombstone is kept. Returns the number removed.
    pub async fn prune_tombstones<R: Record>(&self) -> Result<u64> {
        let Some(historical) = self.historical else {
            return Ok(0);
        };
        let keys: Vec<String> = self.tombstoned_keys::<R>().await?.into_iter().collect();
        let mut pruned = 0;

        for batch in keys.chunks(KEY_BATCH) {
            let lookup = format!(
                "SELECT CAST({key} AS TEXT) FROM {table} WHERE {key} IN ({})",
                placeholders(batch.len()),
                key = R::KEY_COLUMN,
                table = R::TABLE,
            );
            let mut query = sqlx::query_scalar::<_, String>(&lookup);
            for key in batch {
                query = query.bind(key.as_str());
            }
            let present: HashSet<String> = match query.fetch_all(historical.pool()).await {
                Ok(present) => present.into_iter().collect(),
                Err(e) => {
                    warn!("Historical store read on {} failed, keeping tombstones: {}", R::TABLE, e);
                    return Ok(pruned);
                }
            };

            let stale: Vec<&str> = batch
                .iter()
                .filter(|key| !present.contains(*key))
                .map(String::as_str)
                .collect();
            if stale.is_empty() {
                continue;
            }
            let delete = format!(
                "DELETE FROM tombstones WHERE table_name = ? AND record_key IN ({})",
                placeholders(stale.len())
            );
            let delete = delete.as_str();
            let stale = stale.as_slice();
            let pool = self.active.pool();
            let result = self
                .active
                .with_retry("prune_tombstones", move || async move {
                    let mut query = sqlx::query(delete).bind(R::TABLE);
                    for key in stale {
                        query = query.bind(*key);
                    }
                    query.execute(pool).await.map_err(TempboxError::from)
                })
                .await?;
            pruned += result.rows_affected();
        }

        if pruned > 0 {
            debug!("Pruned {} {} tombstone(s)", pruned, R::TABLE);
        }
        Ok(pruned)
    }

    /// All records of a table: the union of both stores, active overriding
    /// historical on key collision.
    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>> {
        let sql = select_all_sql::<R>();
        let sql = sql.as_str();
        let pool = self.active.pool();
        let active: Vec<R> = self
            .active
            .with_retry("get_all", move || async move {
                sqlx::query_as::<_, R>(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;

        let historical = match self.historical {
            Some(db) => {
                historical_or_empty::<R>(sqlx::query_as::<_, R>(sql).fetch_all(db.pool()).await)
            }
            None => Vec::new(),
        };
        let historical = self.visible_historical(historical).await?;

        Ok(merge(historical, active))
    }

    /// Records whose `column` equals `value`, merged the same way as
    /// [`DualStoreMerger::get_all`].
    ///
    /// `column` must be one of the record's columns.
    pub async fn get_all_where<R, V>(&self, column: &str, value: V) -> Result<Vec<R>>
    where
        R: Record,
        V: for<'q> Encode<'q, Sqlite> + Type<Sqlite> + Clone + Send + 'static,
    {
        if !R::COLUMNS.contains(&column) {
            return Err(TempboxError::Validation(format!(
                "unknown column {column} for {}",
                R::TABLE
            )));
        }

        let sql = select_sql::<R>(column);
        let sql = sql.as_str();
        let pool = self.active.pool();
        let value_ref = &value;
        let active: Vec<R> = self
            .active
            .with_retry("get_all_where", move || async move {
                sqlx::query_as::<_, R>(sql)
                    .bind(value_ref.clone())
                    .fetch_all(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;

        let historical = match self.historical {
            Some(db) => historical_or_empty::<R>(
                sqlx::query_as::<_, R>(sql)
                    .bind(value.clone())
                    .fetch_all(db.pool())
                    .await,
            ),
            None => Vec::new(),
        };
        let historical = self.visible_historical(historical).await?;

        Ok(merge(historical, active))
    }

    /// Write a record to the active store, replacing any active row with the
    /// same key. The historical store is never written.
    pub async fn write<R: Record>(&self, record: &R) -> Result<()> {
        let sql = insert_sql::<R>(&upsert_clause::<R>());
        let sql = sql.as_str();
        let pool = self.active.pool();
        self.active
            .with_retry("write", move || async move {
                record
                    .bind_values(sqlx::query(sql))
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        debug!("Wrote {} record to active store", R::TABLE);
        Ok(())
    }

    /// Insert a record into the active store unless its key is already there.
    ///
    /// Returns true if the row was inserted.
    pub async fn write_if_absent<R: Record>(&self, record: &R) -> Result<bool> {
        let sql = insert_sql::<R>(&format!("ON CONFLICT({}) DO NOTHING", R::KEY_COLUMN));
        let sql = sql.as_str();
        let pool = self.active.pool();
        let result = self
            .active
            .with_retry("write_if_absent", move || async move {
                record
                    .bind_values(sqlx::query(sql))
                    .execute(pool)
                    .await
                    .map_err(TempboxError::from)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Copy a historical-only record into the active store so it can be
    /// mutated there. No-op when the active store already holds the key.
    /// A tombstoned key is not brought back.
    ///
    /// Returns the record now visible through [`DualStoreMerger::get`].
    pub async fn promote<R: Record>(&self, key: &R::Key) -> Result<Option<R>> {
        if let Some(record) = self.get_active::<R>(key).await? {
            return Ok(Some(record));
        }
        let Some(record) = self.get_historical::<R>(key).await? else {
            return Ok(None);
        };
        if self.write_if_absent(&record).await? {
            debug!("Promoted historical {} record into active store", R::TABLE);
        }
        self.get_active::<R>(key).await
    }
}

fn historical_or_empty<R: Record>(result: std::result::Result<Vec<R>, sqlx::Error>) -> Vec<R> {
    match result {
        Ok(records) => records,
        Err(e) => {
            warn!("Historical store read on {} failed, treating as empty: {}", R::TABLE, e);
            Vec::new()
        }
    }
}

fn merge<R: Record>(historical: Vec<R>, active: Vec<R>) -> Vec<R> {
    let mut by_key: HashMap<R::Key, R> = historical
        .into_iter()
        .map(|record| (record.key(), record))
        .collect();
    for record in active {
        by_key.insert(record.key(), record);
    }

    let mut records: Vec<R> = by_key.into_values().collect();
    records.sort_by(|a, b| a.listing_order(b));
    records
}

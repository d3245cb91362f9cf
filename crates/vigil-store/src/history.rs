use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, instrument};

use vigil_core::ids::TaskId;
use vigil_core::{HistoryEntry, HistoryEvent, HistoryKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Append-only event history.
///
/// Appends are self-keyed inserts; there is no update or delete. Readers see
/// entries in append order unless `newest_first` is requested.
pub trait HistoryStore: Send + Sync {
    fn append(&self, event: HistoryEvent) -> Result<HistoryEntry, StoreError>;

    /// Append several events. Implementations may make this atomic.
    fn append_batch(&self, events: Vec<HistoryEvent>) -> Result<Vec<HistoryEntry>, StoreError> {
        events.into_iter().map(|e| self.append(e)).collect()
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Filter over the history. Time bounds are inclusive and apply to the
/// event's logical time.
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub kinds: Vec<HistoryKind>,
    pub task_id: Option<TaskId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub newest_first: bool,
}

impl HistoryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: HistoryKind) -> Self {
        Self {
            kinds: vec![kind],
            ..Self::default()
        }
    }

    pub fn kinds(kinds: &[HistoryKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            ..Self::default()
        }
    }

    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task_id = Some(task_id.clone());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn between(self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since(since).until(until)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// In-process evaluation of the filter, excluding limit and order.
    pub fn matches(&self, event: &HistoryEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }
        if let Some(task_id) = &self.task_id {
            if event.task_id() != Some(task_id) {
                return false;
            }
        }
        let at = event.occurred_at();
        if self.since.is_some_and(|s| at < s) {
            return false;
        }
        if self.until.is_some_and(|u| at > u) {
            return false;
        }
        true
    }
}

/// Fixed-width UTC timestamps so that string comparison in SQL is
/// chronological.
pub(crate) fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed history.
#[derive(Clone)]
pub struct SqliteHistory {
    db: Database,
}

impl SqliteHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn insert(
        conn: &rusqlite::Connection,
        event: HistoryEvent,
        recorded_at: DateTime<Utc>,
    ) -> Result<HistoryEntry, StoreError> {
        let payload = serde_json::to_string(&event)?;
        conn.execute(
            "INSERT INTO history (kind, task_id, occurred_at, recorded_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                event.kind().as_str(),
                event.task_id().map(|t| t.as_str().to_string()),
                fmt_time(event.occurred_at()),
                fmt_time(recorded_at),
                payload,
            ],
        )?;
        Ok(HistoryEntry {
            sequence: conn.last_insert_rowid(),
            recorded_at,
            event,
        })
    }
}

impl HistoryStore for SqliteHistory {
    #[instrument(skip(self, event), fields(kind = %event.kind()))]
    fn append(&self, event: HistoryEvent) -> Result<HistoryEntry, StoreError> {
        let recorded_at = Utc::now();
        self.db.with_conn(|conn| Self::insert(conn, event, recorded_at))
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    fn append_batch(&self, events: Vec<HistoryEvent>) -> Result<Vec<HistoryEntry>, StoreError> {
        let recorded_at = Utc::now();
        self.db.with_tx(|tx| {
            events
                .into_iter()
                .map(|event| Self::insert(tx, event, recorded_at))
                .collect()
        })
    }

    #[instrument(skip(self, query), fields(kinds = query.kinds.len()))]
    fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut sql = String::from(
            "SELECT sequence, recorded_at, payload FROM history WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if !query.kinds.is_empty() {
            let mut placeholders = Vec::with_capacity(query.kinds.len());
            for kind in &query.kinds {
                params.push(Box::new(kind.as_str()));
                placeholders.push(format!("?{}", params.len()));
            }
            sql.push_str(&format!(" AND kind IN ({})", placeholders.join(", ")));
        }
        if let Some(task_id) = &query.task_id {
            params.push(Box::new(task_id.as_str().to_string()));
            sql.push_str(&format!(" AND task_id = ?{}", params.len()));
        }
        if let Some(since) = query.since {
            params.push(Box::new(fmt_time(since)));
            sql.push_str(&format!(" AND occurred_at >= ?{}", params.len()));
        }
        if let Some(until) = query.until {
            params.push(Box::new(fmt_time(until)));
            sql.push_str(&format!(" AND occurred_at <= ?{}", params.len()));
        }

        sql.push_str(if query.newest_first {
            " ORDER BY sequence DESC"
        } else {
            " ORDER BY sequence ASC"
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.db.with_conn(|conn| {
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_entry(row)?);
            }
            debug!(rows = results.len(), "history query");
            Ok(results)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<HistoryEntry, StoreError> {
    let sequence: i64 = row_helpers::get(row, 0, "history", "sequence")?;
    let recorded_raw: String = row_helpers::get(row, 1, "history", "recorded_at")?;
    let payload_raw: String = row_helpers::get(row, 2, "history", "payload")?;
    Ok(HistoryEntry {
        sequence,
        recorded_at: row_helpers::parse_time(&recorded_raw, "history", "recorded_at")?,
        event: row_helpers::parse_json(&payload_raw, "history", "payload")?,
    })
}

/// SQL DDL for the history database.
/// WAL mode enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS history (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    task_id TEXT,
    occurred_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reminder_markers (
    dedup_key TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    marked_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_kind ON history(kind, occurred_at);
CREATE INDEX IF NOT EXISTS idx_history_task ON history(task_id, occurred_at);
CREATE INDEX IF NOT EXISTS idx_history_occurred ON history(occurred_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

pub const SCHEMA_VERSION: &str = "1";

// Run inside a transaction together with the version row, see `SqliteStore::ensure_schema`
pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Input directories registered with the project
CREATE TABLE IF NOT EXISTS input_directories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    date_added INTEGER NOT NULL         -- Timestamp when registered (UTC)
);

-- One row per tracked file. Rows are never deleted by sync; 'missing' is a soft delete
CREATE TABLE IF NOT EXISTS input_files (
    id TEXT PRIMARY KEY,                -- sha256(absolute_path)
    input_dir_id INTEGER NOT NULL,
    absolute_path TEXT NOT NULL UNIQUE,
    relative_path TEXT NOT NULL,
    content_hash TEXT,                  -- sha256(content), NULL while missing
    last_known_hash TEXT,               -- Last non-NULL content_hash, kept while missing
    date_added INTEGER NOT NULL,
    date_modified INTEGER,
    status TEXT NOT NULL DEFAULT 'new', -- new, updated, found, missing
    processed BOOLEAN NOT NULL DEFAULT 0,
    completed_manually BOOLEAN NOT NULL DEFAULT 0,
    FOREIGN KEY (input_dir_id) REFERENCES input_directories(id) ON DELETE CASCADE,
    CHECK (status IN ('new', 'updated', 'found', 'missing')),
    CHECK (content_hash IS NOT NULL OR status = 'missing')
);

CREATE INDEX IF NOT EXISTS idx_input_files_dir ON input_files (input_dir_id);
"#;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, Level};
use logging_timer::timer;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{check_update_result, FileStore};
use crate::error::SyncError;
use crate::files::{FileUpdate, InputDirectory, InputFile};
use crate::schema::{CREATE_SCHEMA_SQL, SCHEMA_VERSION};

const FILE_COLUMNS: &str = "id, input_dir_id, absolute_path, relative_path, content_hash, \
     last_known_hash, date_added, date_modified, status, processed, completed_manually";

const POOL_SIZE: u32 = 4;

/// SQLite-backed store. Connections come from an r2d2 pool so the store can be
/// shared across per-directory sync workers.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, SyncError> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
            c.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            c.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        let store = SqliteStore {
            pool,
            db_path: Some(db_path.to_owned()),
        };
        store.ensure_schema()?;
        info!("Database opened at: {}", db_path.display());

        Ok(store)
    }

    /// A private, non-persistent database. Limited to a single pooled connection
    /// since every SQLite memory connection is its own database.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let store = SqliteStore {
            pool,
            db_path: None,
        };
        store.ensure_schema()?;

        Ok(store)
    }

    pub fn close(self) {
        match &self.db_path {
            Some(path) => info!("Database closed: {}", path.display()),
            None => debug!("In-memory database closed"),
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, SyncError> {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), SyncError> {
        let mut conn = self.conn()?;

        let table_exists: bool = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='input_files'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)?;

        if !table_exists {
            let tx = conn.transaction()?;
            tx.execute_batch(CREATE_SCHEMA_SQL)?;
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                [SCHEMA_VERSION],
            )?;
            tx.commit()?;
            return Ok(());
        }

        let stored_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version.as_deref() {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(SyncError::Error(format!(
                "Schema version mismatch: found {other}, expected {SCHEMA_VERSION}"
            ))),
            None => Err(SyncError::Error("Schema version missing".to_string())),
        }
    }

    fn file_from_row(row: &Row) -> rusqlite::Result<InputFile> {
        Ok(InputFile {
            id: row.get(0)?,
            input_dir_id: row.get(1)?,
            absolute_path: row.get(2)?,
            relative_path: row.get(3)?,
            content_hash: row.get(4)?,
            last_known_hash: row.get(5)?,
            date_added: row.get(6)?,
            date_modified: row.get(7)?,
            status: row.get(8)?,
            processed: row.get(9)?,
            completed_manually: row.get(10)?,
        })
    }

    fn query_files(
        conn: &Connection,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<InputFile>, SyncError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM input_files {where_clause} ORDER BY absolute_path ASC"
        ))?;

        let rows = stmt.query_map(params, SqliteStore::file_from_row)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    /// Builds the SET list and parameters for a partial update. The key value is
    /// appended last for the WHERE clause.
    fn update_clauses(changes: &FileUpdate) -> (Vec<&'static str>, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(status) = changes.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.to_string()));
        }
        if let Some(ref content_hash) = changes.content_hash {
            clauses.push("content_hash = ?");
            values.push(content_hash.clone().map_or(Value::Null, Value::Text));
        }
        if let Some(ref last_known_hash) = changes.last_known_hash {
            clauses.push("last_known_hash = ?");
            values.push(Value::Text(last_known_hash.clone()));
        }
        if let Some(date_modified) = changes.date_modified {
            clauses.push("date_modified = ?");
            values.push(Value::Integer(date_modified));
        }
        if let Some(processed) = changes.processed {
            clauses.push("processed = ?");
            values.push(Value::Integer(processed as i64));
        }
        if let Some(completed_manually) = changes.completed_manually {
            clauses.push("completed_manually = ?");
            values.push(Value::Integer(completed_manually as i64));
        }

        (clauses, values)
    }

    fn update_where(
        &self,
        key_column: &str,
        key: &str,
        changes: &FileUpdate,
    ) -> Result<(), SyncError> {
        let _tmr = timer!(Level::Trace; "SqliteStore.update_where", "{}", key);

        let (clauses, mut values) = SqliteStore::update_clauses(changes);
        if clauses.is_empty() {
            return Ok(());
        }
        values.push(Value::Text(key.to_owned()));

        let sql = format!(
            "UPDATE input_files SET {} WHERE {key_column} = ?",
            clauses.join(", ")
        );

        let conn = self.conn()?;
        let rows_updated = conn.execute(&sql, params_from_iter(values.iter()))?;
        check_update_result(rows_updated, key)
    }
}

impl FileStore for SqliteStore {
    fn get_files_by_directory(&self, input_dir_id: i64) -> Result<Vec<InputFile>, SyncError> {
        let conn = self.conn()?;
        SqliteStore::query_files(&conn, "WHERE input_dir_id = ?", [input_dir_id])
    }

    fn get_file_by_absolute_path(
        &self,
        absolute_path: &str,
    ) -> Result<Option<InputFile>, SyncError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM input_files WHERE absolute_path = ?"),
            [absolute_path],
            SqliteStore::file_from_row,
        )
        .optional()
        .map_err(SyncError::DatabaseError)
    }

    fn insert_file(&self, file: &InputFile) -> Result<(), SyncError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO input_files (
                id, input_dir_id, absolute_path, relative_path, content_hash, last_known_hash,
                date_added, date_modified, status, processed, completed_manually
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(absolute_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_known_hash = excluded.last_known_hash,
                date_modified = excluded.date_modified,
                status = excluded.status,
                processed = excluded.processed,
                completed_manually = excluded.completed_manually",
            params![
                file.id,
                file.input_dir_id,
                file.absolute_path,
                file.relative_path,
                file.content_hash,
                file.last_known_hash,
                file.date_added,
                file.date_modified,
                file.status,
                file.processed,
                file.completed_manually,
            ],
        )?;
        Ok(())
    }

    fn update_file(&self, id: &str, changes: &FileUpdate) -> Result<(), SyncError> {
        self.update_where("id", id, changes)
    }

    fn update_file_by_absolute_path(
        &self,
        absolute_path: &str,
        changes: &FileUpdate,
    ) -> Result<(), SyncError> {
        self.update_where("absolute_path", absolute_path, changes)
    }

    fn get_all_files(&self) -> Result<Vec<InputFile>, SyncError> {
        let conn = self.conn()?;
        SqliteStore::query_files(&conn, "", [])
    }

    fn get_directories(&self) -> Result<Vec<InputDirectory>, SyncError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, path, date_added FROM input_directories ORDER BY id ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(InputDirectory {
                id: row.get(0)?,
                path: row.get(1)?,
                date_added: row.get(2)?,
            })
        })?;

        let mut directories = Vec::new();
        for row in rows {
            directories.push(row?);
        }
        Ok(directories)
    }

    fn add_directory(&self, path: &str) -> Result<InputDirectory, SyncError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO input_directories (path, date_added) VALUES (?, ?)
            ON CONFLICT(path) DO NOTHING",
            params![path, Utc::now().timestamp()],
        )?;

        conn.query_row(
            "SELECT id, path, date_added FROM input_directories WHERE path = ?",
            [path],
            |row| {
                Ok(InputDirectory {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    date_added: row.get(2)?,
                })
            },
        )
        .map_err(SyncError::DatabaseError)
    }

    fn get_meta(&self) -> Result<BTreeMap<String, String>, SyncError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM meta")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut meta = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            meta.insert(key, value);
        }
        Ok(meta)
    }

    fn set_meta(&self, entries: &[(String, String)]) -> Result<(), SyncError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

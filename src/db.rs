use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

/// Baseline schema. Every other table is created at runtime by the
/// persistence engine.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    content_hash TEXT
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    date TEXT,
    amount REAL,
    description TEXT,
    category TEXT,
    subcategory TEXT,
    source_file TEXT,
    created_at TEXT,
    FOREIGN KEY (document_id) REFERENCES documents(id)
);

CREATE TABLE IF NOT EXISTS mem_labels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL,
    category TEXT NOT NULL,
    subcategory TEXT
);

CREATE TABLE IF NOT EXISTS uncertain_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    source_file TEXT NOT NULL DEFAULT ''
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_uncertain_desc_src
    ON uncertain_transactions(description, source_file);
";

// Columns added after the first release; applied best-effort on open.
const BASELINE_COLUMNS: &[(&str, &str, &str)] = &[
    ("documents", "content_hash", "TEXT"),
    ("transactions", "subcategory", "TEXT"),
    ("transactions", "source_file", "TEXT"),
    ("transactions", "created_at", "TEXT"),
    ("mem_labels", "subcategory", "TEXT"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    for (table, column, col_type) in BASELINE_COLUMNS {
        if !column_names(conn, table)?.iter().any(|c| c == column) {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {col_type}"))?;
        }
    }
    conn.execute_batch("CREATE INDEX IF NOT EXISTS ix_documents_hash ON documents(content_hash);")?;
    Ok(())
}

/// Live column names of `table`, in declaration order. Empty if the table
/// does not exist. `table` must already be a sanitized identifier.
pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn document_exists_for_hash(conn: &Connection, hash: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM documents WHERE content_hash = ?1")?;
    Ok(stmt.exists([hash])?)
}

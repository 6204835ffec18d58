use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, Transaction};

use crate::db::column_names;
use crate::error::Result;
use crate::models::{FieldValue, OrganizedRecordSet, Record, UncertainItem};
use crate::organize::TRANSACTIONS;
use crate::reviewer;

/// Columns the engine fills itself. A record key that sanitizes to one of
/// these is stored as `field_<name>`.
const ENGINE_COLUMNS: &[&str] = &["id", "source_file", "created_at", "document_id"];

/// Lower-cases and maps anything outside `[a-z0-9_]` to `_`, collapsing
/// runs. Returns an empty string when nothing usable remains.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().to_lowercase().chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let out = out.trim_matches('_').to_string();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("field_{out}");
    }
    out
}

/// Column name for a record key, or `None` if nothing usable remains.
pub fn column_for_key(key: &str) -> Option<String> {
    let name = sanitize_identifier(key);
    if name.is_empty() {
        return None;
    }
    if ENGINE_COLUMNS.contains(&name.as_str()) {
        return Some(format!("field_{name}"));
    }
    Some(name)
}

/// Known live columns of one table.
#[derive(Debug, Clone, Default)]
pub struct TableHandle {
    pub columns: HashSet<String>,
}

/// Writes organized record sets into per-shape tables, creating tables and
/// adding columns as new fields show up. Columns are never dropped,
/// renamed or retyped.
#[derive(Debug, Default)]
pub struct AdaptivePersistenceEngine {
    registry: HashMap<String, TableHandle>,
}

impl AdaptivePersistenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists every non-empty set in one transaction, together with a
    /// `documents` row for the file and its review-queue entries. Returns the
    /// number of rows written.
    pub fn persist(
        &mut self,
        conn: &mut Connection,
        sets: &[OrganizedRecordSet],
        source_file: &str,
        content_hash: Option<&str>,
        uncertain: &[UncertainItem],
    ) -> Result<usize> {
        let result = self.persist_batch(conn, sets, source_file, content_hash, uncertain);
        if result.is_err() {
            // Schema changes were rolled back with the batch.
            self.registry.clear();
        }
        result
    }

    fn persist_batch(
        &mut self,
        conn: &mut Connection,
        sets: &[OrganizedRecordSet],
        source_file: &str,
        content_hash: Option<&str>,
        uncertain: &[UncertainItem],
    ) -> Result<usize> {
        let now = chrono::Local::now().to_rfc3339();
        let mut tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO documents (filename, uploaded_at, content_hash) VALUES (?1, ?2, ?3)",
            rusqlite::params![source_file, now, content_hash],
        )?;
        let document_id = tx.last_insert_rowid();

        let mut written = 0usize;
        for set in sets.iter().filter(|s| !s.records.is_empty()) {
            let table = sanitize_identifier(&set.shape);
            if table.is_empty() {
                tracing::warn!(shape = %set.shape, "Shape name has no usable characters, skipping");
                continue;
            }
            let link = (table == TRANSACTIONS).then_some(document_id);
            let mut shape_written = 0usize;
            for record in &set.records {
                let fields = Self::columns_of(record);
                if !self.ensure_table(&tx, &table, &fields)? {
                    break;
                }
                self.ensure_columns(&tx, &table, &fields)?;
                let Some(handle) = self.registry.get(&table) else {
                    break;
                };
                if Self::insert_record(&mut tx, &table, handle, &fields, source_file, &now, link) {
                    shape_written += 1;
                }
            }
            tracing::info!(shape = %table, written = shape_written, total = set.records.len(), "Shape persisted");
            written += shape_written;
        }

        let queued = reviewer::queue_uncertain(&tx, uncertain)?;
        if queued > 0 {
            tracing::info!(file = source_file, queued, "Queued for review");
        }
        tx.commit()?;
        Ok(written)
    }

    /// Sanitized (column, value) pairs in record order; later keys that
    /// collide with an earlier column are dropped.
    fn columns_of(record: &Record) -> Vec<(String, &FieldValue)> {
        let mut fields: Vec<(String, &FieldValue)> = Vec::with_capacity(record.len());
        for (key, value) in record.iter() {
            let Some(column) = column_for_key(key) else {
                tracing::debug!(key, "Field name has no usable characters, dropped");
                continue;
            };
            if fields.iter().any(|(c, _)| *c == column) {
                tracing::debug!(key, column = %column, "Field collides with an earlier column, dropped");
                continue;
            }
            fields.push((column, value));
        }
        fields
    }

    /// Makes sure `table` is registered, creating it from `fields` if it does
    /// not exist. Returns false when the shape cannot be stored.
    fn ensure_table(&mut self, tx: &Transaction<'_>, table: &str, fields: &[(String, &FieldValue)]) -> Result<bool> {
        if self.registry.contains_key(table) {
            return Ok(true);
        }
        let existing = column_names(tx, table)?;
        if !existing.is_empty() {
            self.registry.insert(
                table.to_string(),
                TableHandle {
                    columns: existing.into_iter().collect(),
                },
            );
            return Ok(true);
        }
        if table == TRANSACTIONS {
            tracing::warn!(shape = table, "Transactions table missing; run init first");
            return Ok(false);
        }

        let mut defs = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        defs.extend(fields.iter().map(|(c, v)| format!("\"{c}\" {}", v.column_type())));
        defs.push("source_file TEXT".to_string());
        defs.push("created_at TEXT".to_string());
        let sql = format!("CREATE TABLE \"{table}\" ({})", defs.join(", "));
        if let Err(e) = tx.execute_batch(&sql) {
            tracing::warn!(shape = table, error = %e, "Could not create table");
            return Ok(false);
        }
        tracing::info!(shape = table, columns = fields.len(), "Created table");
        self.registry.insert(
            table.to_string(),
            TableHandle {
                columns: column_names(tx, table)?.into_iter().collect(),
            },
        );
        Ok(true)
    }

    /// Adds columns for fields the table has not seen. A failed add is
    /// logged and records carrying that field are skipped.
    fn ensure_columns(&mut self, tx: &Transaction<'_>, table: &str, fields: &[(String, &FieldValue)]) -> Result<()> {
        let Some(handle) = self.registry.get_mut(table) else {
            return Ok(());
        };
        for (column, value) in fields {
            if handle.columns.contains(column) {
                continue;
            }
            let sql = format!("ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {}", value.column_type());
            match tx.execute_batch(&sql) {
                Ok(()) => {
                    tracing::info!(shape = table, column = %column, "Added column");
                    handle.columns.insert(column.clone());
                }
                Err(e) => {
                    tracing::warn!(shape = table, column = %column, error = %e, "Could not add column");
                }
            }
        }
        Ok(())
    }

    /// Inserts one record under its own savepoint. Returns whether the row
    /// was written; a record with a field the table lacks is not.
    fn insert_record(
        tx: &mut Transaction<'_>,
        table: &str,
        handle: &TableHandle,
        fields: &[(String, &FieldValue)],
        source_file: &str,
        created_at: &str,
        document_id: Option<i64>,
    ) -> bool {
        let source = FieldValue::from(source_file);
        let created = FieldValue::from(created_at);
        let doc = document_id.map(FieldValue::Integer);

        if let Some((missing, _)) = fields.iter().find(|(c, _)| !handle.columns.contains(c)) {
            tracing::warn!(shape = table, column = %missing, "Column unavailable, record skipped");
            return false;
        }

        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::new();
        for (column, value) in fields {
            columns.push(column);
            values.push(*value);
        }
        columns.push("source_file");
        values.push(&source);
        columns.push("created_at");
        values.push(&created);
        if let Some(doc) = &doc {
            columns.push("document_id");
            values.push(doc);
        }

        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO \"{table}\" ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );

        let outcome = tx.savepoint().and_then(|sp| {
            sp.execute(&sql, values.as_slice())?;
            sp.commit()
        });
        match outcome {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(shape = table, error = %e, "Insert failed, record skipped");
                false
            }
        }
    }
}

use rusqlite::{Connection, OptionalExtension};

use crate::error::{PennyError, Result};
use crate::models::UncertainItem;

// Tokens too generic to make a useful learned keyword.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "of", "to", "at", "in", "on", "pos", "purchase", "payment", "card",
    "debit", "credit", "www", "com",
];

pub struct QueuedItem {
    pub id: i64,
    pub description: String,
    pub source_file: String,
}

pub struct Resolution<'a> {
    pub category: &'a str,
    pub subcategory: Option<&'a str>,
    pub keyword: Option<&'a str>,
    pub learn: bool,
}

pub struct ResolveResult {
    pub updated_transactions: usize,
    pub learned_keyword: Option<String>,
}

/// Queues items for review. Already-queued (description, source) pairs are
/// ignored. Returns the number newly queued.
pub fn queue_uncertain(conn: &Connection, items: &[UncertainItem]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO uncertain_transactions (description, source_file) VALUES (?1, ?2)",
    )?;
    let mut added = 0usize;
    for item in items {
        let description = item.description.trim();
        if description.is_empty() {
            continue;
        }
        added += stmt.execute(rusqlite::params![description, item.source_file.trim()])?;
    }
    Ok(added)
}

pub fn fetch_uncertain(conn: &Connection) -> Result<Vec<QueuedItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, description, source_file FROM uncertain_transactions ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(QueuedItem {
                id: row.get(0)?,
                description: row.get(1)?,
                source_file: row.get(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Stores a keyword label. Keywords are trimmed and lower-cased; an empty
/// keyword is skipped and yields `None`.
pub fn add_mem_label(
    conn: &Connection,
    keyword: &str,
    category: &str,
    subcategory: Option<&str>,
) -> Result<Option<i64>> {
    let keyword = keyword.trim().to_lowercase();
    if keyword.is_empty() {
        return Ok(None);
    }
    conn.execute(
        "INSERT INTO mem_labels (keyword, category, subcategory) VALUES (?1, ?2, ?3)",
        rusqlite::params![keyword, category.trim(), subcategory.map(str::trim)],
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

/// First two significant tokens of a description: "SQ *BLUE BOTTLE COFFEE
/// #123" becomes "blue bottle".
pub fn learning_keyword(description: &str) -> Option<String> {
    let tokens: Vec<String> = description
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '\''))
        .map(|t| t.trim_matches('.').to_string())
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| t.chars().any(|c| c.is_alphabetic()))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .take(2)
        .collect();
    (!tokens.is_empty()).then(|| tokens.join(" "))
}

/// Resolves a queued item: rewrites matching transactions, removes the item
/// and optionally learns a keyword for next time.
pub fn resolve(conn: &mut Connection, item_id: i64, resolution: &Resolution<'_>) -> Result<ResolveResult> {
    let category = resolution.category.trim();
    if category.is_empty() {
        return Err(PennyError::Other("category must not be empty".to_string()));
    }
    let tx = conn.transaction()?;
    let item: Option<(String, String)> = tx
        .query_row(
            "SELECT description, source_file FROM uncertain_transactions WHERE id = ?1",
            [item_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((description, source_file)) = item else {
        return Err(PennyError::NotFound(format!("uncertain item {item_id}")));
    };

    let updated_transactions = tx.execute(
        "UPDATE transactions SET category = ?1, subcategory = ?2 \
         WHERE TRIM(description) = ?3 AND COALESCE(source_file, '') = ?4",
        rusqlite::params![category, resolution.subcategory, description, source_file],
    )?;
    tx.execute("DELETE FROM uncertain_transactions WHERE id = ?1", [item_id])?;

    let mut learned_keyword = None;
    if resolution.learn {
        let keyword = resolution
            .keyword
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .or_else(|| learning_keyword(&description));
        if let Some(keyword) = keyword {
            add_mem_label(&tx, &keyword, category, resolution.subcategory)?;
            learned_keyword = Some(keyword);
        }
    }
    tx.commit()?;

    Ok(ResolveResult {
        updated_transactions,
        learned_keyword,
    })
}

use comfy_table::{Cell, Table};

use crate::categorizer::UNCATEGORIZED;
use crate::db::{get_connection, user_tables};
use crate::dedup::DedupTracker;
use crate::error::Result;
use crate::fmt::{format_bytes, money};
use crate::settings::load_settings;

const BASELINE_TABLES: &[&str] = &["documents", "transactions", "mem_labels", "uncertain_transactions"];

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_path().display());
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `penny init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));
    let stats = DedupTracker::open(&settings.inbox_dir(), &settings.state_path())?.stats();
    println!("Inbox:      {}", stats.watch_dir.display());
    println!("State file: {}", stats.state_path.display());

    let conn = get_connection(&db_path)?;
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let documents = count("SELECT count(*) FROM documents")?;
    let transactions = count("SELECT count(*) FROM transactions")?;
    let uncategorized: i64 = conn.query_row(
        "SELECT count(*) FROM transactions WHERE category = ?1",
        [UNCATEGORIZED],
        |r| r.get(0),
    )?;
    let review = count("SELECT count(*) FROM uncertain_transactions")?;
    let labels = count("SELECT count(*) FROM mem_labels")?;
    let net: f64 = conn.query_row("SELECT COALESCE(SUM(amount), 0) FROM transactions", [], |r| r.get(0))?;

    println!();
    println!("Processed files: {}", stats.total_processed);
    println!("Documents:       {documents}");
    println!("Transactions:    {transactions}");
    println!("Uncategorized:   {uncategorized}");
    println!("Needs review:    {review}");
    println!("Labels:          {labels}");
    println!("Net amount:      {}", money(net));

    let extra: Vec<String> = user_tables(&conn)?
        .into_iter()
        .filter(|t| !BASELINE_TABLES.contains(&t.as_str()))
        .collect();
    if !extra.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Shape", "Rows"]);
        for name in extra {
            let rows = count(&format!("SELECT count(*) FROM \"{name}\""))?;
            table.add_row(vec![Cell::new(name), Cell::new(rows)]);
        }
        println!();
        println!("Other shapes\n{table}");
    }
    Ok(())
}

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::reviewer::{fetch_uncertain, resolve as resolve_item, Resolution};
use crate::settings::load_settings;

use super::open_store;

pub fn list() -> Result<()> {
    let conn = open_store(&load_settings())?;
    let items = fetch_uncertain(&conn)?;
    if items.is_empty() {
        println!("Nothing to review.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Description", "Source"]);
    for item in &items {
        table.add_row(vec![
            Cell::new(item.id),
            Cell::new(&item.description),
            Cell::new(&item.source_file),
        ]);
    }
    println!("Needs review ({})\n{table}", items.len());
    Ok(())
}

pub fn resolve(
    id: i64,
    category: &str,
    subcategory: Option<&str>,
    keyword: Option<&str>,
    learn: bool,
) -> Result<()> {
    let mut conn = open_store(&load_settings())?;
    let result = resolve_item(
        &mut conn,
        id,
        &Resolution {
            category,
            subcategory,
            keyword,
            learn,
        },
    )?;
    println!(
        "Resolved {id} \u{2192} {} ({} transactions updated)",
        category.green(),
        result.updated_transactions
    );
    if let Some(keyword) = result.learned_keyword {
        println!("Learned: '{keyword}' \u{2192} {category}");
    }
    Ok(())
}

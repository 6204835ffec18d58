use comfy_table::{Cell, Table};

use crate::categorizer::MemoryLabels;
use crate::error::{PennyError, Result};
use crate::reviewer::add_mem_label;
use crate::settings::load_settings;

use super::open_store;

pub fn add(keyword: &str, category: &str, subcategory: Option<&str>) -> Result<()> {
    let conn = open_store(&load_settings())?;
    if add_mem_label(&conn, keyword, category, subcategory)?.is_none() {
        return Err(PennyError::Other("keyword must not be empty".to_string()));
    }
    println!("Added label: '{}' \u{2192} {category}", keyword.trim().to_lowercase());
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_store(&load_settings())?;
    let labels = MemoryLabels::load(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Keyword", "Category", "Subcategory"]);
    for label in labels.iter() {
        table.add_row(vec![
            Cell::new(label.id),
            Cell::new(&label.keyword),
            Cell::new(&label.category),
            Cell::new(label.subcategory.as_deref().unwrap_or_default()),
        ]);
    }
    println!("Labels\n{table}");
    Ok(())
}

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::config::WorklistSettings;
use crate::error::ConfigError;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub page_id: u64,
    /// Structured-data entity id, `M<page_id>`.
    pub media_id: String,
    pub title: Option<String>,
}

impl Record {
    pub fn new(page_id: u64, title: Option<String>) -> Self {
        Self {
            page_id,
            media_id: format!("M{page_id}"),
            title,
        }
    }

    /// Title when known, otherwise `pageid <n>`.
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => format!("pageid {}", self.page_id),
        }
    }
}

/// Build the strict worklist from the page-id column.
pub fn load_records(table: &Table, settings: &WorklistSettings) -> Result<Vec<Record>, ConfigError> {
    let column = &settings.page_id_column;
    let page_id_index = table
        .column_index(column)
        .ok_or_else(|| ConfigError::MissingColumn {
            column: column.clone(),
            available: table.headers.clone(),
        })?;
    let title_index = table.column_index(&settings.title_column);

    let mut seen = BTreeSet::new();
    let mut records = Vec::with_capacity(table.rows.len());
    let mut duplicates = 0usize;

    for (index, row) in table.rows.iter().enumerate() {
        let raw = row.get(page_id_index).map(String::as_str).unwrap_or_default();
        let page_id = parse_page_id(raw).ok_or_else(|| ConfigError::InvalidIdentifierValue {
            column: column.clone(),
            row: index + 1,
            value: raw.to_string(),
        })?;

        if !seen.insert(page_id) {
            duplicates += 1;
            continue;
        }

        let title = title_index
            .and_then(|title_index| row.get(title_index))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        records.push(Record::new(page_id, title));
    }

    if duplicates > 0 {
        warn!(duplicates, "duplicate page id rows were ignored (first occurrence kept)");
    }
    if records.is_empty() {
        return Err(ConfigError::EmptyWorklist);
    }
    if records.len() > settings.max_records {
        return Err(ConfigError::TooManyRecords {
            count: records.len(),
            max: settings.max_records,
        });
    }

    info!(records = records.len(), "loaded worklist");
    Ok(records)
}

/// Positive integer, allowing an all-zero fraction (`"42.0"`) as written by spreadsheet
/// exports.
pub fn parse_page_id(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let integral = match trimmed.split_once('.') {
        Some((whole, fraction)) if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') => {
            whole
        }
        Some(_) => return None,
        None => trimmed,
    };
    if integral.is_empty() || !integral.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    integral.parse::<u64>().ok().filter(|value| *value > 0)
}

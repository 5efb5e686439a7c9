use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A worklist sheet: one header row and data rows padded to the header width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// Index of `name`, appending an empty column when it does not exist yet.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        let index = self.headers.len();
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            // cells past the old header width move right, they are never overwritten
            if row.len() > index {
                row.insert(index, String::new());
            } else {
                row.resize(index + 1, String::new());
            }
        }
        index
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
    }

    /// Short rows are padded to the header width; wider rows are kept as they are.
    pub fn push_row(&mut self, mut cells: Vec<String>) {
        if cells.len() < self.headers.len() {
            cells.resize(self.headers.len(), String::new());
        }
        self.rows.push(cells);
    }
}

/// Where the worklist lives. Reads return the whole sheet; writes replace it.
pub trait TabularStore {
    fn read_table(&self) -> Result<Table>;
    fn write_table(&self, table: &Table) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TabularStore for CsvStore {
    fn read_table(&self) -> Result<Table> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read worklist {}", self.path.display()))?;
        Ok(parse_csv(&content))
    }

    fn write_table(&self, table: &Table) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("worklist path has no file name: {}", self.path.display()))?;
        let mut temp_name = file_name.to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        fs::write(&temp_path, render_csv(table))
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "failed to replace {} with {}",
                self.path.display(),
                temp_path.display()
            )
        })?;
        Ok(())
    }
}

pub fn parse_csv(content: &str) -> Table {
    let mut rows = parse_csv_rows(strip_bom(content), ',').into_iter();
    let Some(header_row) = rows.next() else {
        return Table::default();
    };

    let mut table = Table::new(
        header_row
            .iter()
            .map(|value| value.trim().to_string())
            .collect(),
    );
    // With a single column a blank line is a blank cell, not a separator.
    let keep_blank_rows = table.headers.len() == 1;
    for row in rows {
        if !keep_blank_rows && is_blank_row(&row) {
            continue;
        }
        table.push_row(row);
    }
    while table.rows.last().is_some_and(|row| is_blank_row(row)) {
        table.rows.pop();
    }
    table
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|value| value.trim().is_empty())
}

pub fn render_csv(table: &Table) -> String {
    let mut output = String::new();
    write_csv_row(&mut output, &table.headers);
    for row in &table.rows {
        write_csv_row(&mut output, row);
    }
    output
}

fn write_csv_row(output: &mut String, cells: &[String]) {
    for (index, cell) in cells.iter().enumerate() {
        if index > 0 {
            output.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            output.push('"');
            output.push_str(&cell.replace('"', "\"\""));
            output.push('"');
        } else {
            output.push_str(cell);
        }
    }
    output.push('\n');
}

fn parse_csv_rows(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            '\n' | '\r' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ if ch == delimiter => row.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }

    row.push(field);
    if row.len() > 1 || row.first().is_some_and(|value| !value.trim().is_empty()) {
        rows.push(row);
    }
    rows
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

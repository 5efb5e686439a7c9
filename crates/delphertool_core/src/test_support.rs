use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use crate::error::RemoteError;
use crate::mediawiki::{PageSnapshot, SaveOutcome, SaveRequest, SearchHit, Session, WikiSite};
use crate::table::{Table, TabularStore, parse_csv};

pub const OLD_BLOCK_PAGE: &str = "=={{int:filedesc}}==\n{{Information\n|description=Krant\n|source =\n:{{Internet Archive link|ddd_010124175_mpeg21}}\n:https://archive.org/download/ddd_010124175_mpeg21/ddd_010124175_mpeg21.pdf\n|author=KB\n}}\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedEdit {
    pub page_id: u64,
    pub content: String,
    pub conflict_token: String,
    pub write_token: String,
    pub summary: String,
}

#[derive(Default)]
pub struct MockSite {
    pub pages: BTreeMap<u64, PageSnapshot>,
    /// Errors handed out by `save_by_page_id` before it starts succeeding.
    pub save_failures: VecDeque<RemoteError>,
    pub unchanged_pages: Vec<u64>,
    pub search_hits: Vec<SearchHit>,
    pub saved: Vec<SavedEdit>,
    pub tokens_issued: usize,
    pub logins: usize,
    pub request_count: usize,
}

impl MockSite {
    pub fn with_page(mut self, page_id: u64, content: &str) -> Self {
        self.pages.insert(
            page_id,
            PageSnapshot {
                content: content.to_string(),
                conflict_token: format!("2025-09-16T10:00:{:02}Z", page_id % 60),
            },
        );
        self
    }
}

impl WikiSite for MockSite {
    fn login(&mut self, username: &str, _password: &str) -> Result<Session, RemoteError> {
        self.request_count += 1;
        self.logins += 1;
        Ok(Session {
            username: Some(username.to_string()),
            write_token: None,
        })
    }

    fn get_write_token(&mut self, _session: &Session) -> Result<String, RemoteError> {
        self.request_count += 1;
        self.tokens_issued += 1;
        Ok(format!("token-{}+\\", self.tokens_issued))
    }

    fn fetch_by_page_id(
        &mut self,
        _session: &Session,
        page_id: u64,
    ) -> Result<PageSnapshot, RemoteError> {
        self.request_count += 1;
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or(RemoteError::PageNotFound(page_id))
    }

    fn save_by_page_id(
        &mut self,
        _session: &Session,
        request: &SaveRequest<'_>,
    ) -> Result<SaveOutcome, RemoteError> {
        self.request_count += 1;
        if let Some(error) = self.save_failures.pop_front() {
            return Err(error);
        }
        self.saved.push(SavedEdit {
            page_id: request.page_id,
            content: request.content.to_string(),
            conflict_token: request.conflict_token.to_string(),
            write_token: request.write_token.to_string(),
            summary: request.summary.to_string(),
        });
        if self.unchanged_pages.contains(&request.page_id) {
            return Ok(SaveOutcome::NoChange);
        }
        Ok(SaveOutcome::Saved)
    }

    fn search_files(&mut self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, RemoteError> {
        self.request_count += 1;
        Ok(self.search_hits.iter().take(limit).cloned().collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// In-memory store that keeps every write for inspection.
#[derive(Default)]
pub struct MemoryStore {
    pub table: RefCell<Table>,
    pub writes: RefCell<usize>,
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn from_csv(content: &str) -> Self {
        Self {
            table: RefCell::new(parse_csv(content)),
            ..Self::default()
        }
    }

    pub fn column(&self, name: &str) -> Vec<String> {
        let table = self.table.borrow();
        let index = table.column_index(name).expect("column present");
        table.rows.iter().map(|row| row[index].clone()).collect()
    }
}

impl TabularStore for MemoryStore {
    fn read_table(&self) -> anyhow::Result<Table> {
        Ok(self.table.borrow().clone())
    }

    fn write_table(&self, table: &Table) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("disk full");
        }
        *self.writes.borrow_mut() += 1;
        *self.table.borrow_mut() = table.clone();
        Ok(())
    }
}

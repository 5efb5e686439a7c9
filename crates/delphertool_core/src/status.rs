use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::WorklistSettings;
use crate::table::TabularStore;
use crate::urn::resolver_url_from_title;
use crate::worklist::parse_page_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Processed,
    SkippedNoPattern,
    Errored,
    /// Dry run only; never persisted.
    WouldProcess,
}

impl RecordStatus {
    /// Label written to the status column.
    pub fn label(self) -> &'static str {
        match self {
            Self::Processed => "Successfully processed",
            Self::SkippedNoPattern => "Skipped - no old pattern found",
            Self::Errored => "Skipped - other error",
            Self::WouldProcess => "Dry run - would process",
        }
    }
}

pub type StatusMap = BTreeMap<u64, RecordStatus>;

pub trait StatusWriter {
    fn write_statuses(&mut self, statuses: &StatusMap) -> anyhow::Result<()>;
}

/// Writes statuses back into the worklist table, matching rows by page id.
///
/// The table is re-read on every write so rows reordered or added between checkpoints
/// still get the right label.
pub struct TableStatusWriter<'a, T: TabularStore> {
    store: &'a T,
    settings: &'a WorklistSettings,
}

impl<'a, T: TabularStore> TableStatusWriter<'a, T> {
    pub fn new(store: &'a T, settings: &'a WorklistSettings) -> Self {
        Self { store, settings }
    }
}

impl<T: TabularStore> StatusWriter for TableStatusWriter<'_, T> {
    fn write_statuses(&mut self, statuses: &StatusMap) -> anyhow::Result<()> {
        let mut table = self.store.read_table()?;
        let page_id_index = table
            .column_index(&self.settings.page_id_column)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "worklist lost its {:?} column; cannot match statuses",
                    self.settings.page_id_column
                )
            })?;
        let title_index = table.column_index(&self.settings.title_column);
        let status_index = table.ensure_column(&self.settings.status_column);
        let resolver_index = self
            .settings
            .resolver_column
            .as_deref()
            .map(|column| table.ensure_column(column));

        let mut matched = 0usize;
        for row in &mut table.rows {
            if let (Some(resolver_index), Some(title_index)) = (resolver_index, title_index) {
                if let Some(url) = resolver_url_from_title(&row[title_index]) {
                    row[resolver_index] = url;
                }
            }

            let Some(page_id) = parse_page_id(&row[page_id_index]) else {
                continue;
            };
            if let Some(status) = statuses.get(&page_id) {
                row[status_index] = status.label().to_string();
                matched += 1;
            }
        }

        if matched < statuses.len() {
            warn!(
                statuses = statuses.len(),
                matched,
                "some statuses have no matching worklist row"
            );
        }
        self.store.write_table(&table)?;
        debug!(matched, "status column written");
        Ok(())
    }
}

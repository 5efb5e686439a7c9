use std::thread::sleep;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{RunConfig, RunSettings};
use crate::editor::PageEditor;
use crate::error::{Error, Result};
use crate::mediawiki::{SaveOutcome, Session, WikiSite};
use crate::observability::{record_span, run_span};
use crate::slice::slice_records;
use crate::status::{RecordStatus, StatusMap, StatusWriter, TableStatusWriter};
use crate::table::TabularStore;
use crate::wikitext::transform;
use crate::worklist::{Record, load_records};

/// Terminal state of one record.
#[derive(Debug)]
pub enum RecordOutcome {
    Saved(SaveOutcome),
    NoOpSkipped,
    /// Dry run: the page would have been saved.
    WouldSave,
    Errored(Error),
}

impl RecordOutcome {
    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Saved(_) => RecordStatus::Processed,
            Self::NoOpSkipped => RecordStatus::SkippedNoPattern,
            Self::WouldSave => RecordStatus::WouldProcess,
            Self::Errored(_) => RecordStatus::Errored,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub page_id: u64,
    pub title: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub total: usize,
    pub processed: usize,
    /// Saved but the wiki reported the text was already identical.
    pub unchanged: usize,
    pub skipped_no_pattern: usize,
    pub would_process: usize,
    pub errored: usize,
    pub checkpoints: usize,
    pub flushes: usize,
    pub request_count: usize,
    pub failures: Vec<RecordFailure>,
}

/// Drives records through fetch, transform and save, one at a time.
pub struct BatchRunner<'a, S: WikiSite, W: StatusWriter> {
    editor: PageEditor<'a, S>,
    writer: &'a mut W,
    settings: &'a RunSettings,
    statuses: StatusMap,
    saves_since_checkpoint: usize,
    unflushed: bool,
    report: RunReport,
    pause: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a, S: WikiSite, W: StatusWriter> BatchRunner<'a, S, W> {
    pub fn new(site: &'a mut S, writer: &'a mut W, settings: &'a RunSettings) -> Self {
        Self {
            editor: PageEditor::new(site, &settings.edit_summary),
            writer,
            settings,
            statuses: StatusMap::new(),
            saves_since_checkpoint: 0,
            unflushed: false,
            report: RunReport {
                dry_run: settings.dry_run,
                ..RunReport::default()
            },
            pause: Box::new(sleep),
        }
    }

    /// Replace the blocking sleep used between records.
    pub fn with_pause(mut self, pause: impl FnMut(Duration) + 'a) -> Self {
        self.pause = Box::new(pause);
        self
    }

    /// Process every record. Per-record failures are recorded and the loop continues;
    /// only a failed final flush is returned as an error.
    pub fn run(mut self, session: &mut Session, records: &[Record]) -> Result<RunReport> {
        let total = records.len();
        self.report.total = total;
        let span = run_span(self.settings.dry_run, total);
        let _guard = span.enter();

        for (index, record) in records.iter().enumerate() {
            info!(
                "[{}/{}] {} ({}, pageid {})",
                index + 1,
                total,
                record.title.as_deref().unwrap_or("<untitled>"),
                record.media_id,
                record.page_id
            );
            let outcome = {
                let span = record_span(index + 1, record.page_id);
                let _guard = span.enter();
                self.process_record(session, record)
            };
            self.record_outcome(record, outcome);

            if index + 1 < total && !self.settings.pause.is_zero() {
                (self.pause)(self.settings.pause);
            }
        }

        if self.unflushed && !self.settings.dry_run {
            self.writer
                .write_statuses(&self.statuses)
                .map_err(Error::Store)?;
            self.report.flushes += 1;
            info!(statuses = self.statuses.len(), "final status flush written");
        }

        self.report.request_count = self.editor.request_count();
        info!(
            processed = self.report.processed,
            skipped = self.report.skipped_no_pattern,
            errored = self.report.errored,
            "run finished"
        );
        Ok(self.report)
    }

    fn process_record(&mut self, session: &mut Session, record: &Record) -> RecordOutcome {
        let snapshot = match self.editor.fetch(session, record.page_id) {
            Ok(snapshot) => snapshot,
            Err(error) => return RecordOutcome::Errored(error.into()),
        };
        let updated = match transform(&snapshot.content) {
            Ok(updated) => updated,
            Err(error) => return RecordOutcome::Errored(error.into()),
        };
        if updated == snapshot.content {
            return RecordOutcome::NoOpSkipped;
        }
        if self.settings.dry_run {
            return RecordOutcome::WouldSave;
        }
        match self.editor.save(
            session,
            record.page_id,
            &updated,
            &snapshot.conflict_token,
        ) {
            Ok(outcome) => RecordOutcome::Saved(outcome),
            Err(error) => RecordOutcome::Errored(error.into()),
        }
    }

    fn record_outcome(&mut self, record: &Record, outcome: RecordOutcome) {
        let status = outcome.status();
        match &outcome {
            RecordOutcome::Saved(SaveOutcome::Saved) => {
                self.report.processed += 1;
                info!(page_id = record.page_id, "saved");
            }
            RecordOutcome::Saved(SaveOutcome::NoChange) => {
                self.report.processed += 1;
                self.report.unchanged += 1;
                info!(page_id = record.page_id, "saved (no change)");
            }
            RecordOutcome::NoOpSkipped => {
                self.report.skipped_no_pattern += 1;
                info!(page_id = record.page_id, "no old pattern found; skipping");
            }
            RecordOutcome::WouldSave => {
                self.report.would_process += 1;
                info!(page_id = record.page_id, "dry run: would save");
            }
            RecordOutcome::Errored(cause) => {
                self.report.errored += 1;
                error!(page_id = record.page_id, error = %cause, "record failed");
                self.report.failures.push(RecordFailure {
                    page_id: record.page_id,
                    title: record.title.clone(),
                    error: cause.to_string(),
                });
            }
        }

        self.statuses.insert(record.page_id, status);
        if self.settings.dry_run {
            return;
        }
        self.unflushed = true;

        if status == RecordStatus::Processed {
            self.saves_since_checkpoint += 1;
            if self.settings.checkpoint_every > 0
                && self.saves_since_checkpoint >= self.settings.checkpoint_every
            {
                self.checkpoint();
            }
        }
    }

    fn checkpoint(&mut self) {
        match self.writer.write_statuses(&self.statuses) {
            Ok(()) => {
                self.unflushed = false;
                self.report.checkpoints += 1;
                self.report.flushes += 1;
                info!(
                    saves = self.saves_since_checkpoint,
                    statuses = self.statuses.len(),
                    "checkpoint written"
                );
            }
            Err(cause) => {
                warn!(error = %cause, "checkpoint write failed; continuing");
            }
        }
        self.saves_since_checkpoint = 0;
    }
}

/// The whole pipeline: load, slice, log in, process, flush.
///
/// Every configuration and worklist problem is reported before the first remote call.
pub fn run_worklist<S, T>(config: &RunConfig, site: &mut S, store: &T) -> Result<RunReport>
where
    S: WikiSite,
    T: TabularStore,
{
    let table = store.read_table().map_err(Error::Store)?;
    let records = load_records(&table, &config.worklist)?;
    let records = slice_records(&records, config.run.slice)?;

    let mut session = if config.run.dry_run {
        info!("dry run: no login, no saves, worklist left untouched");
        Session::anonymous()
    } else {
        let credentials = config.require_credentials()?;
        let mut session = site.login(&credentials.username, &credentials.password)?;
        info!(user = session.username.as_deref().unwrap_or_default(), "logged in");
        session.write_token = Some(site.get_write_token(&session)?);
        session
    };

    let mut writer = TableStatusWriter::new(store, &config.worklist);
    BatchRunner::new(site, &mut writer, &config.run).run(&mut session, &records)
}

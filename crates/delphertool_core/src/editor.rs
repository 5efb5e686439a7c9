use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::mediawiki::{PageSnapshot, SaveOutcome, SaveRequest, Session, WikiSite};

/// Fetch/save by page id on top of a `WikiSite`, owning the write-token refresh.
pub struct PageEditor<'a, S: WikiSite> {
    site: &'a mut S,
    summary: &'a str,
}

impl<'a, S: WikiSite> PageEditor<'a, S> {
    pub fn new(site: &'a mut S, summary: &'a str) -> Self {
        Self { site, summary }
    }

    pub fn fetch(&mut self, session: &Session, page_id: u64) -> Result<PageSnapshot, RemoteError> {
        let snapshot = self.site.fetch_by_page_id(session, page_id)?;
        debug!(
            page_id,
            bytes = snapshot.content.len(),
            base = %snapshot.conflict_token,
            "fetched page"
        );
        Ok(snapshot)
    }

    /// Conditional save against `conflict_token`.
    ///
    /// A rejected write token is refreshed once and the save retried; the login itself
    /// is never repeated. Any other failure, or a second rejection, is returned.
    pub fn save(
        &mut self,
        session: &mut Session,
        page_id: u64,
        content: &str,
        conflict_token: &str,
    ) -> Result<SaveOutcome, RemoteError> {
        if session.write_token.is_none() {
            session.write_token = Some(self.site.get_write_token(session)?);
        }

        match self.try_save(session, page_id, content, conflict_token) {
            Err(error) if error.is_auth_expired() => {
                warn!(page_id, %error, "write token rejected; refreshing and retrying once");
                session.write_token = Some(self.site.get_write_token(session)?);
                self.try_save(session, page_id, content, conflict_token)
            }
            other => other,
        }
    }

    fn try_save(
        &mut self,
        session: &Session,
        page_id: u64,
        content: &str,
        conflict_token: &str,
    ) -> Result<SaveOutcome, RemoteError> {
        let write_token = session
            .write_token
            .as_deref()
            .ok_or(RemoteError::MissingWriteToken)?;
        self.site.save_by_page_id(
            session,
            &SaveRequest {
                page_id,
                content,
                summary: self.summary,
                conflict_token,
                write_token,
            },
        )
    }

    pub fn request_count(&self) -> usize {
        self.site.request_count()
    }
}

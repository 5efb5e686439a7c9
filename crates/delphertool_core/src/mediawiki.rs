use std::collections::BTreeSet;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WikiSettings;
use crate::error::RemoteError;

pub const NS_FILE: i32 = 6;

const AUTH_ERROR_CODES: &[&str] = &[
    "badtoken",
    "notloggedin",
    "assertuserfailed",
    "assertnameduserfailed",
];

/// Handle for one logged-in (or anonymous) session. The cookie jar lives in the
/// client; the write token lives here and is refreshed through `WikiSite::get_write_token`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub username: Option<String>,
    pub write_token: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_logged_in(&self) -> bool {
        self.username.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub content: String,
    /// Revision timestamp at fetch time, sent back as `basetimestamp`.
    pub conflict_token: String,
}

#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
    pub page_id: u64,
    pub content: &'a str,
    pub summary: &'a str,
    pub conflict_token: &'a str,
    pub write_token: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The wiki accepted the edit but the text was already identical.
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub page_id: u64,
}

pub trait WikiSite {
    fn login(&mut self, username: &str, password: &str) -> Result<Session, RemoteError>;
    fn get_write_token(&mut self, session: &Session) -> Result<String, RemoteError>;
    fn fetch_by_page_id(&mut self, session: &Session, page_id: u64)
    -> Result<PageSnapshot, RemoteError>;
    fn save_by_page_id(
        &mut self,
        session: &Session,
        request: &SaveRequest<'_>,
    ) -> Result<SaveOutcome, RemoteError>;
    fn search_files(&mut self, query: &str, limit: usize) -> Result<Vec<SearchHit>, RemoteError>;
    fn request_count(&self) -> usize;
}

/// Error surfaced by a single API call, before it is mapped to an operation-level error.
#[derive(Debug)]
enum CallError {
    Api { code: String, info: String },
    Transport(anyhow::Error),
}

impl From<CallError> for RemoteError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Api { code, info } => classify_api_error(code, info),
            CallError::Transport(error) => RemoteError::Transport(error),
        }
    }
}

fn classify_api_error(code: String, info: String) -> RemoteError {
    if AUTH_ERROR_CODES.contains(&code.as_str()) {
        RemoteError::AuthExpired { code }
    } else {
        RemoteError::EditRejected { code, info }
    }
}

pub struct MediaWikiClient {
    client: Client,
    settings: WikiSettings,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(settings: WikiSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            settings,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value, CallError> {
        let base_url = Url::parse(&self.settings.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.settings.api_url))
            .map_err(CallError::Transport)?;
        let pairs = with_format_params(params);
        let max_retries = self.settings.max_retries;

        for attempt in 0..=max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.settings.user_agent.clone())
                .query(&pairs)
                .send();

            match self.read_response(response, attempt, max_retries, false) {
                Attempt::Done(result) => return result,
                Attempt::Retry => continue,
            }
        }

        Err(CallError::Transport(anyhow::anyhow!(
            "MediaWiki API request exhausted retry budget"
        )))
    }

    fn request_json_post(
        &mut self,
        params: &[(&str, String)],
        is_write: bool,
    ) -> Result<Value, CallError> {
        let max_retries = if is_write {
            self.settings.max_write_retries
        } else {
            self.settings.max_retries
        };
        let pairs = with_format_params(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = self
                .client
                .post(&self.settings.api_url)
                .header("User-Agent", self.settings.user_agent.clone())
                .form(&pairs)
                .send();

            match self.read_response(response, attempt, max_retries, is_write) {
                Attempt::Done(result) => return result,
                Attempt::Retry => continue,
            }
        }

        Err(CallError::Transport(anyhow::anyhow!(
            "MediaWiki API request exhausted retry budget"
        )))
    }

    fn read_response(
        &self,
        response: reqwest::Result<reqwest::blocking::Response>,
        attempt: usize,
        max_retries: usize,
        is_write: bool,
    ) -> Attempt {
        let can_retry = attempt < max_retries;
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                if can_retry && is_retryable_error(&error) {
                    self.wait_before_retry(attempt, is_write);
                    return Attempt::Retry;
                }
                return Attempt::Done(Err(CallError::Transport(
                    anyhow::Error::new(error).context("failed to call MediaWiki API"),
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            if can_retry && is_retryable_status(status) {
                self.wait_before_retry(attempt, is_write);
                return Attempt::Retry;
            }
            return Attempt::Done(Err(CallError::Transport(anyhow::anyhow!(
                "MediaWiki API request failed with HTTP {status}"
            ))));
        }

        let payload: Value = match response
            .json()
            .context("failed to decode MediaWiki API JSON response")
        {
            Ok(payload) => payload,
            Err(error) => return Attempt::Done(Err(CallError::Transport(error))),
        };

        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info")
                .to_string();
            if code == "maxlag" && can_retry {
                warn!(attempt, %info, "server replication lag; backing off");
                self.wait_before_retry(attempt, is_write);
                return Attempt::Retry;
            }
            return Attempt::Done(Err(CallError::Api { code, info }));
        }
        Attempt::Done(Ok(payload))
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.settings.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.settings.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .settings
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

enum Attempt {
    Done(Result<Value, CallError>),
    Retry,
}

impl WikiSite for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<Session, RemoteError> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| RemoteError::LoginFailed("no login token returned".to_string()))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => Ok(Session {
                username: Some(
                    login_payload
                        .login
                        .lgusername
                        .unwrap_or_else(|| username.to_string()),
                ),
                write_token: None,
            }),
            other => Err(RemoteError::LoginFailed(
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }

    fn get_write_token(&mut self, _session: &Session) -> Result<String, RemoteError> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            // "+\\" is the anonymous token and can never save an edit
            .filter(|token| !token.is_empty() && token != "+\\")
            .ok_or(RemoteError::MissingWriteToken)
    }

    fn fetch_by_page_id(
        &mut self,
        _session: &Session,
        page_id: u64,
    ) -> Result<PageSnapshot, RemoteError> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("pageids", page_id.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content API response")?;
        snapshot_from_query(page_id, parsed)
    }

    fn save_by_page_id(
        &mut self,
        session: &Session,
        request: &SaveRequest<'_>,
    ) -> Result<SaveOutcome, RemoteError> {
        let mut params = vec![
            ("action", "edit".to_string()),
            ("pageid", request.page_id.to_string()),
            ("text", request.content.to_string()),
            ("summary", request.summary.to_string()),
            ("token", request.write_token.to_string()),
            ("basetimestamp", request.conflict_token.to_string()),
            ("nocreate", "1".to_string()),
            ("bot", "1".to_string()),
            ("maxlag", self.settings.maxlag.to_string()),
        ];
        if session.is_logged_in() {
            params.push(("assert", "user".to_string()));
        }

        let response = match self.request_json_post(&params, true) {
            Ok(response) => response,
            Err(CallError::Api { code, .. }) if code == "editconflict" => {
                return Err(RemoteError::EditConflict(request.page_id));
            }
            Err(error) => return Err(error.into()),
        };
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        edit_outcome(request.page_id, edit_payload)
    }

    fn search_files(&mut self, query: &str, limit: usize) -> Result<Vec<SearchHit>, RemoteError> {
        let mut hits = Vec::new();
        let mut seen = BTreeSet::new();
        let mut offset: Option<String> = None;

        while hits.len() < limit {
            let batch = (limit - hits.len()).min(500);
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "search".to_string()),
                ("srsearch", query.to_string()),
                ("srnamespace", NS_FILE.to_string()),
                ("srlimit", batch.to_string()),
            ];
            if let Some(offset) = &offset {
                params.push(("sroffset", offset.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse =
                serde_json::from_value(response).context("failed to decode search API response")?;
            for item in parsed.query.search {
                if seen.insert(item.pageid) {
                    hits.push(SearchHit {
                        title: item.title,
                        page_id: item.pageid,
                    });
                }
            }
            debug!(collected = hits.len(), "search batch received");

            offset = parsed
                .continuation
                .and_then(|cont| cont.sroffset)
                .map(|value| value.to_string());
            if offset.is_none() {
                break;
            }
        }

        hits.truncate(limit);
        Ok(hits)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn snapshot_from_query(page_id: u64, parsed: QueryResponse) -> Result<PageSnapshot, RemoteError> {
    let page = parsed
        .query
        .pages
        .into_iter()
        .next()
        .ok_or(RemoteError::PageNotFound(page_id))?;
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Err(RemoteError::PageNotFound(page_id));
    }
    let revision = page
        .revisions
        .into_iter()
        .next()
        .ok_or(RemoteError::NoRevisionContent(page_id))?;
    let content = revision
        .slots
        .and_then(|slots| slots.main)
        .and_then(|slot| slot.content)
        .filter(|content| !content.is_empty())
        .ok_or(RemoteError::NoRevisionContent(page_id))?;
    let conflict_token = revision
        .timestamp
        .filter(|timestamp| !timestamp.is_empty())
        .ok_or(RemoteError::MissingConflictToken(page_id))?;
    Ok(PageSnapshot {
        content,
        conflict_token,
    })
}

fn edit_outcome(page_id: u64, payload: EditResponse) -> Result<SaveOutcome, RemoteError> {
    let edit = payload.edit.ok_or_else(|| RemoteError::EditRejected {
        code: "missing_edit_payload".to_string(),
        info: format!("no edit payload in API response for page id {page_id}"),
    })?;
    match edit.result.as_deref() {
        Some("Success") if edit.nochange.unwrap_or(false) => Ok(SaveOutcome::NoChange),
        Some("Success") => Ok(SaveOutcome::Saved),
        other => Err(RemoteError::EditRejected {
            code: other.unwrap_or("unknown").to_string(),
            info: format!("unexpected edit result for page id {page_id}"),
        }),
    }
}

fn with_format_params(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    search: Vec<SearchQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    sroffset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchQueryItem {
    title: String,
    pageid: u64,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
    lgusername: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    nochange: Option<bool>,
}

use thiserror::Error;

/// Problems with settings or the worklist. Always fatal to the whole run and always
/// raised before the first remote call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required")]
    MissingSetting { key: String },

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    #[error("expected column {column:?} not found; columns present: {available:?}")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("invalid value in column {column:?} at row {row}: {value:?} (must be a positive integer)")]
    InvalidIdentifierValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("{count} records exceed the ceiling of {max}; reduce the input or raise MAX_FILES")]
    TooManyRecords { count: usize, max: usize },

    #[error("worklist contains no records after validation and de-duplication")]
    EmptyWorklist,

    #[error("both head and range are set; set only one")]
    ConflictingSliceMode,

    #[error("range must be in the form N-M (1-based, inclusive), got {0:?}")]
    MalformedRange(String),

    #[error("slice out of range for {total} records: {detail}")]
    SliceOutOfRange { total: usize, detail: String },
}

/// Per-record data problems found while rewriting wikitext.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "invalid Internet Archive identifier {0:?}; expected PREFIX_NUMBER[_suffix], e.g. KBDDD02_000201168_mpeg21"
    )]
    MalformedIdentifier(String),

    #[error(
        "invalid Internet Archive direct download URL {0:?}; expected https://archive.org/download/<path>/<file>.pdf"
    )]
    MalformedUrl(String),

    #[error("{matches} old |source= blocks found; refusing to guess which one to replace")]
    AmbiguousEditTarget { matches: usize },
}

/// Failures reported by, or while talking to, the wiki.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("MediaWiki login failed: {0}")]
    LoginFailed(String),

    #[error("page id {0} is missing")]
    PageNotFound(u64),

    #[error("no revision content for page id {0}")]
    NoRevisionContent(u64),

    #[error("missing base timestamp for page id {0}")]
    MissingConflictToken(u64),

    #[error("edit conflict on page id {0}: page changed since it was fetched")]
    EditConflict(u64),

    #[error("write credential rejected [{code}]")]
    AuthExpired { code: String },

    #[error("edit rejected [{code}]: {info}")]
    EditRejected { code: String, info: String },

    #[error("failed to obtain a write token")]
    MissingWriteToken,

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl RemoteError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Reading or writing the tabular store.
    #[error(transparent)]
    Store(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

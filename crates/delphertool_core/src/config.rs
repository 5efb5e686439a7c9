use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::slice::{SliceMode, parse_range};

pub const DEFAULT_CONFIG_FILENAME: &str = "delphertool.toml";
pub const DEFAULT_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "delphertool/0.1";
pub const DEFAULT_EDIT_SUMMARY: &str =
    "Improved sourcing: added Delpher website and direct PDF links";

/// Optional on-disk layer, `delphertool.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub worklist: WorklistSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub maxlag: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WorklistSection {
    pub path: Option<PathBuf>,
    pub page_id_column: Option<String>,
    pub title_column: Option<String>,
    pub status_column: Option<String>,
    pub resolver_column: Option<String>,
    pub max_records: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RunSection {
    pub edit_summary: Option<String>,
    pub pause_seconds: Option<f64>,
    pub checkpoint_every: Option<usize>,
    pub head: Option<usize>,
    pub range: Option<String>,
}

/// Load and parse the TOML layer. A missing file yields the defaults.
pub fn load_config(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: FileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSettings {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
    pub maxlag: u32,
}

impl Default for WikiSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            rate_limit_read_ms: 300,
            rate_limit_write_ms: 1_000,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
            maxlag: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorklistSettings {
    pub path: PathBuf,
    pub page_id_column: String,
    pub title_column: String,
    pub status_column: String,
    /// When set, the status writer also fills this column from each row's title.
    pub resolver_column: Option<String>,
    pub max_records: usize,
}

impl Default for WorklistSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("worklist.csv"),
            page_id_column: "PageID".to_string(),
            title_column: "Title".to_string(),
            status_column: "ProcessingStatus".to_string(),
            resolver_column: None,
            max_records: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub edit_summary: String,
    pub pause: Duration,
    /// Successful saves between status flushes; 0 leaves only the final flush.
    pub checkpoint_every: usize,
    pub slice: SliceMode,
    pub dry_run: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            edit_summary: DEFAULT_EDIT_SUMMARY.to_string(),
            pause: Duration::from_secs(4),
            checkpoint_every: 50,
            slice: SliceMode::All,
            dry_run: false,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Command-line values; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub worklist: Option<PathBuf>,
    pub head: Option<usize>,
    pub range: Option<String>,
    pub checkpoint_every: Option<usize>,
    pub pause_seconds: Option<f64>,
    pub dry_run: bool,
}

/// Everything a run needs, resolved once at startup and passed down by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub wiki: WikiSettings,
    pub worklist: WorklistSettings,
    pub run: RunSettings,
    pub credentials: Option<Credentials>,
}

impl RunConfig {
    /// Resolve with the process environment: flag > env > file > default.
    pub fn from_process_env(file: &FileConfig, overrides: &CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve(file, overrides, |key| env::var(key).ok())
    }

    pub fn resolve<F>(
        file: &FileConfig,
        overrides: &CliOverrides,
        env_lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            env_lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let defaults = WikiSettings::default();
        let wiki = WikiSettings {
            api_url: lookup("WIKI_API_URL")
                .or_else(|| file.wiki.api_url.clone())
                .unwrap_or(defaults.api_url),
            user_agent: lookup("WIKIMEDIA_USER_AGENT")
                .or_else(|| file.wiki.user_agent.clone())
                .unwrap_or(defaults.user_agent),
            timeout_ms: layered(&lookup, "WIKI_HTTP_TIMEOUT_MS", file.wiki.timeout_ms)?
                .unwrap_or(defaults.timeout_ms),
            max_retries: layered(&lookup, "WIKI_HTTP_RETRIES", file.wiki.max_retries)?
                .unwrap_or(defaults.max_retries),
            maxlag: layered(&lookup, "WIKI_MAXLAG", file.wiki.maxlag)?.unwrap_or(defaults.maxlag),
            ..defaults
        };

        let defaults = WorklistSettings::default();
        let worklist = WorklistSettings {
            path: overrides
                .worklist
                .clone()
                .or_else(|| lookup("WORKLIST_FILE").map(PathBuf::from))
                .or_else(|| file.worklist.path.clone())
                .unwrap_or(defaults.path),
            page_id_column: lookup("WORKLIST_PAGEID_COL")
                .or_else(|| file.worklist.page_id_column.clone())
                .unwrap_or(defaults.page_id_column),
            title_column: lookup("WORKLIST_TITLE_COL")
                .or_else(|| file.worklist.title_column.clone())
                .unwrap_or(defaults.title_column),
            status_column: lookup("WORKLIST_STATUS_COL")
                .or_else(|| file.worklist.status_column.clone())
                .unwrap_or(defaults.status_column),
            resolver_column: lookup("WORKLIST_RESOLVER_COL")
                .or_else(|| file.worklist.resolver_column.clone()),
            max_records: layered(&lookup, "MAX_FILES", file.worklist.max_records)?
                .unwrap_or(defaults.max_records),
        };
        if worklist.page_id_column == worklist.status_column {
            return Err(ConfigError::InvalidSetting {
                key: "WORKLIST_STATUS_COL".to_string(),
                value: worklist.status_column,
                reason: "must differ from the page id column".to_string(),
            });
        }

        let defaults = RunSettings::default();
        let pause_seconds = match overrides.pause_seconds {
            Some(value) => Some(value),
            None => layered(&lookup, "EDIT_SLEEP_SEC", file.run.pause_seconds)?,
        };
        let pause = match pause_seconds {
            Some(seconds) if !seconds.is_finite() || seconds < 0.0 => {
                return Err(ConfigError::InvalidSetting {
                    key: "EDIT_SLEEP_SEC".to_string(),
                    value: seconds.to_string(),
                    reason: "must be a non-negative number of seconds".to_string(),
                });
            }
            Some(seconds) => Duration::try_from_secs_f64(seconds).map_err(|error| {
                ConfigError::InvalidSetting {
                    key: "EDIT_SLEEP_SEC".to_string(),
                    value: seconds.to_string(),
                    reason: error.to_string(),
                }
            })?,
            None => defaults.pause,
        };

        let head = match overrides.head {
            Some(value) => Some(value),
            None => layered(&lookup, "HEAD", file.run.head)?,
        };
        let range = overrides
            .range
            .clone()
            .or_else(|| lookup("RANGE"))
            .or_else(|| file.run.range.clone())
            .map(|value| parse_range(&value))
            .transpose()?;

        let run = RunSettings {
            edit_summary: lookup("EDIT_SUMMARY")
                .or_else(|| file.run.edit_summary.clone())
                .unwrap_or(defaults.edit_summary),
            pause,
            checkpoint_every: match overrides.checkpoint_every {
                Some(value) => value,
                None => layered(&lookup, "CHECKPOINT_EVERY_SUCCESS", file.run.checkpoint_every)?
                    .unwrap_or(defaults.checkpoint_every),
            },
            slice: SliceMode::from_parts(head, range)?,
            dry_run: overrides.dry_run,
        };

        let credentials = match (lookup("WIKIMEDIA_USERNAME"), lookup("WIKIMEDIA_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Ok(Self {
            wiki,
            worklist,
            run,
            credentials,
        })
    }

    /// Credentials for a writing run.
    pub fn require_credentials(&self) -> Result<&Credentials, ConfigError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ConfigError::MissingSetting {
                key: "WIKIMEDIA_USERNAME and WIKIMEDIA_PASSWORD".to_string(),
            })
    }
}

/// Env value parsed strictly, falling back to the file value when the env is unset.
fn layered<T, L>(lookup: &L, key: &str, file_value: Option<T>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|error| ConfigError::InvalidSetting {
                key: key.to_string(),
                value: raw,
                reason: error.to_string(),
            }),
        None => Ok(file_value),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_any_layer() {
        let config =
            RunConfig::resolve(&FileConfig::default(), &CliOverrides::default(), env_from(&[]))
                .expect("config");
        assert_eq!(config.wiki.api_url, DEFAULT_API_URL);
        assert_eq!(config.worklist.page_id_column, "PageID");
        assert_eq!(config.worklist.status_column, "ProcessingStatus");
        assert_eq!(config.worklist.max_records, 60_000);
        assert_eq!(config.run.checkpoint_every, 50);
        assert_eq!(config.run.pause, Duration::from_secs(4));
        assert_eq!(config.run.slice, SliceMode::All);
        assert!(config.credentials.is_none());
        assert!(config.require_credentials().is_err());
    }

    #[test]
    fn env_overrides_file_and_flags_override_env() {
        let file = FileConfig {
            worklist: WorklistSection {
                path: Some(PathBuf::from("from-file.csv")),
                max_records: Some(10),
                ..WorklistSection::default()
            },
            run: RunSection {
                checkpoint_every: Some(5),
                ..RunSection::default()
            },
            ..FileConfig::default()
        };
        let env = env_from(&[
            ("WORKLIST_FILE", "from-env.csv"),
            ("MAX_FILES", "20"),
            ("CHECKPOINT_EVERY_SUCCESS", "7"),
            ("WIKIMEDIA_USERNAME", "Bot@delpher"),
            ("WIKIMEDIA_PASSWORD", "secret"),
        ]);
        let overrides = CliOverrides {
            checkpoint_every: Some(9),
            ..CliOverrides::default()
        };
        let config = RunConfig::resolve(&file, &overrides, env).expect("config");
        assert_eq!(config.worklist.path, PathBuf::from("from-env.csv"));
        assert_eq!(config.worklist.max_records, 20);
        assert_eq!(config.run.checkpoint_every, 9);
        assert_eq!(
            config.require_credentials().expect("credentials").username,
            "Bot@delpher"
        );
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let error = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("MAX_FILES", "lots")]),
        )
        .expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidSetting { ref key, .. } if key == "MAX_FILES"));

        let error = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("EDIT_SLEEP_SEC", "-1")]),
        )
        .expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn oversized_pause_is_a_config_error() {
        let error = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("EDIT_SLEEP_SEC", "1e30")]),
        )
        .expect_err("must fail");
        assert!(
            matches!(error, ConfigError::InvalidSetting { ref key, .. } if key == "EDIT_SLEEP_SEC")
        );

        let overrides = CliOverrides {
            pause_seconds: Some(1e30),
            ..CliOverrides::default()
        };
        assert!(RunConfig::resolve(&FileConfig::default(), &overrides, env_from(&[])).is_err());
    }

    #[test]
    fn blank_env_values_count_as_unset() {
        let config = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("HEAD", "  "), ("RANGE", "")]),
        )
        .expect("config");
        assert_eq!(config.run.slice, SliceMode::All);
    }

    #[test]
    fn slice_settings_are_resolved_up_front() {
        let config = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("RANGE", "51-200")]),
        )
        .expect("config");
        assert_eq!(config.run.slice, SliceMode::Range(51, 200));

        let error = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides {
                head: Some(3),
                ..CliOverrides::default()
            },
            env_from(&[("RANGE", "1-2")]),
        )
        .expect_err("must fail");
        assert_eq!(error, ConfigError::ConflictingSliceMode);

        let error = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("RANGE", "first-ten")]),
        )
        .expect_err("must fail");
        assert_eq!(error, ConfigError::MalformedRange("first-ten".to_string()));
    }

    #[test]
    fn status_column_must_not_overwrite_page_ids() {
        let error = RunConfig::resolve(
            &FileConfig::default(),
            &CliOverrides::default(),
            env_from(&[("WORKLIST_STATUS_COL", "PageID")]),
        )
        .expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://test.wikipedia.org/w/api.php"
maxlag = 10

[worklist]
path = "ia-files.csv"
resolver_column = "ResolverURL"

[run]
pause_seconds = 0.5
range = "3-4"
"#,
        )
        .expect("write config");

        let file = load_config(&config_path).expect("load config");
        let config = RunConfig::resolve(&file, &CliOverrides::default(), env_from(&[]))
            .expect("config");
        assert_eq!(config.wiki.api_url, "https://test.wikipedia.org/w/api.php");
        assert_eq!(config.wiki.maxlag, 10);
        assert_eq!(config.worklist.path, PathBuf::from("ia-files.csv"));
        assert_eq!(config.worklist.resolver_column.as_deref(), Some("ResolverURL"));
        assert_eq!(config.run.pause, Duration::from_millis(500));
        assert_eq!(config.run.slice, SliceMode::Range(3, 4));
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/delphertool.toml")).expect("load");
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(&config_path, "[run\nhead = 1").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "Bot".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }
}

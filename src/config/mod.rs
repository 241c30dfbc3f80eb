//! Configuration context shared by every stage.
//!
//! The context is loaded once from a shell-style `KEY=VALUE` file layered on
//! top of built-in defaults. It is threaded explicitly through the pipeline
//! and handed to each external command as its environment, so tools still
//! discover configuration implicitly without this process mutating its own
//! environment.
//!
//! After the `configure` stage the context is frozen: only the computed keys
//! listed in [`keys::COMPUTED`] can be written from then on.

pub mod keys;

use crate::error::ConfigError;
use path_absolutize::Absolutize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide key/value configuration.
#[derive(Debug, Clone)]
pub struct Context {
    values: BTreeMap<String, String>,
    source: Option<PathBuf>,
    frozen: bool,
}

impl Default for Context {
    fn default() -> Self {
        let values = keys::DEFAULTS
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self {
            values,
            source: None,
            frozen: false,
        }
    }
}

impl Context {
    /// Creates a context holding only the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from defaults plus the given pairs.
    ///
    /// Values are taken as-is; relative paths are not resolved.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut ctx = Self::default();
        for (k, v) in pairs {
            ctx.values.insert(k.into(), v.into());
        }
        ctx
    }

    /// Loads the configuration file at `path`.
    ///
    /// The file uses shell assignment syntax (`export` prefixes, quoting,
    /// `#` comments and `${VAR}` substitution are understood). Path-valued
    /// keys are resolved against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let parse_err = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        let iter = dotenvy::from_path_iter(path).map_err(|e| parse_err(e.to_string()))?;

        let mut ctx = Self::default();
        for item in iter {
            let (key, value) = item.map_err(|e| parse_err(e.to_string()))?;
            ctx.values.insert(key, value);
        }

        let absolute = path
            .absolutize()
            .map_err(|e| parse_err(e.to_string()))?
            .into_owned();
        let base_dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        for key in keys::PATH_KEYS {
            if let Some(value) = ctx.get(key) {
                let resolved = Path::new(value)
                    .absolutize_from(&base_dir)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: (*key).to_string(),
                        reason: e.to_string(),
                    })?
                    .to_string_lossy()
                    .into_owned();
                ctx.values.insert((*key).to_string(), resolved);
            }
        }

        log::debug!(
            "Loaded {} configuration values from {}",
            ctx.values.len(),
            absolute.display()
        );
        ctx.source = Some(absolute);
        Ok(ctx)
    }

    /// File the context was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns the value for `key`. Empty values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Returns the value for `key` or `default`.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns the value for `key`, failing if it is absent.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingRequiredKey {
            key: key.to_string(),
        })
    }

    /// Returns the value for `key` as a path.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Returns the value for `key` as a path, failing if it is absent.
    pub fn require_path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        self.require(key).map(PathBuf::from)
    }

    /// Lenient flag lookup used by stage predicates: anything that is not a
    /// recognised truthy value is disabled.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(parse_flag_value).unwrap_or(false)
    }

    /// Strict flag lookup: unrecognised spellings are an error.
    pub fn parse_flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(false),
            Some(value) => parse_flag_value(value).ok_or_else(|| ConfigError::InvalidFlag {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Optional per-command timeout.
    pub fn command_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match self.get(keys::COMMAND_TIMEOUT_SECS) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(|secs| Some(Duration::from_secs(secs)))
                .map_err(|e| ConfigError::InvalidValue {
                    key: keys::COMMAND_TIMEOUT_SECS.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Writes `key`. After [`freeze`](Self::freeze) only computed keys are writable.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), ConfigError> {
        if self.frozen && !keys::COMPUTED.contains(&key) {
            return Err(ConfigError::Frozen {
                key: key.to_string(),
            });
        }
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Makes every non-computed key read-only.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Key/value pairs handed to external commands as environment.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Checks that every key the enabled stages depend on is present and
    /// every flag is well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for flag in keys::FLAGS {
            self.parse_flag(flag)?;
        }

        self.require(keys::APP_SCHEME)?;
        self.require(keys::APP_INFO_PLIST)?;
        if self.get(keys::APP_WORKSPACE).is_none() && self.get(keys::APP_PROJECT).is_none() {
            return Err(ConfigError::MissingRequiredKey {
                key: format!("{} or {}", keys::APP_WORKSPACE, keys::APP_PROJECT),
            });
        }

        let conditional: &[(&str, &[&str])] = &[
            (
                keys::SIGNING_ENABLED,
                &[
                    keys::KEYCHAIN_PATH,
                    keys::KEYCHAIN_PASSWORD,
                    keys::CODE_SIGN_IDENTITY,
                ],
            ),
            (keys::IMPORT_PROFILE, &[keys::PROVISIONING_PROFILE]),
            (keys::FETCH_PROFILE, &[keys::PROFILE_NAME]),
            (keys::EXPORT_PACKAGE, &[keys::EXPORT_OPTIONS_PLIST]),
            (
                keys::UPLOAD_CRASH_REPORTS,
                &[keys::CRASH_API_TOKEN, keys::CRASH_APP_ID],
            ),
        ];
        for (flag, required) in conditional {
            if self.flag(flag) {
                for key in *required {
                    self.require(key)?;
                }
            }
        }

        if self.flag(keys::UPLOAD_CRASH_REPORTS) && !self.flag(keys::EXPORT_PACKAGE) {
            return Err(ConfigError::InvalidValue {
                key: keys::UPLOAD_CRASH_REPORTS.to_string(),
                reason: format!("requires {} to produce a package", keys::EXPORT_PACKAGE),
            });
        }

        self.command_timeout()?;
        crate::runner::OutputFilter::parse(self.get_or(keys::OUTPUT_FILTER, "condensed"))?;
        Ok(())
    }
}

/// Parses a flag spelling. `None` for anything unrecognised.
pub fn parse_flag_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

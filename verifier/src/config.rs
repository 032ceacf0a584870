//! Analysis configuration, loadable from TOML

use std::error::Error;
use std::fmt;

use serde::Deserialize;

use crate::findings::Severity;

/// How a configurable problem class is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Ignore,
    Warning,
    Error,
}

impl SeverityLevel {
    pub fn as_severity(self) -> Option<Severity> {
        match self {
            SeverityLevel::Ignore => None,
            SeverityLevel::Warning => Some(Severity::Warning),
            SeverityLevel::Error => Some(Severity::Error),
        }
    }
}

/// Tunable knobs of one analysis run.
///
/// Unset fields fall back to the defaults below, so a config file only
/// needs the entries it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Severity for a resource left open on every path
    pub report_unclosed_closeable: SeverityLevel,
    /// Severity for a resource left open on some path
    pub report_potentially_unclosed_closeable: SeverityLevel,
    /// Severity for explicitly releasing an auto-managed resource
    pub report_explicitly_closed_auto_closeable: SeverityLevel,
    /// Let assertion-style checks refine presence, not just equality tests
    pub include_guards_in_null_analysis: bool,
    /// Treat a field as present between a syntactic check and the next call
    pub syntactic_presence_analysis_for_fields: bool,
    /// Let overridden declarations contribute presence contracts
    pub inherit_absence_contracts: bool,
    /// Report statements no path reaches
    pub report_dead_code: bool,
    /// Routine names treated as releasing their argument or receiver
    pub close_helpers: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            report_unclosed_closeable: SeverityLevel::Error,
            report_potentially_unclosed_closeable: SeverityLevel::Warning,
            report_explicitly_closed_auto_closeable: SeverityLevel::Warning,
            include_guards_in_null_analysis: false,
            syntactic_presence_analysis_for_fields: false,
            inherit_absence_contracts: true,
            report_dead_code: false,
            close_helpers: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn is_close_helper(&self, name: &str) -> bool {
        self.close_helpers.iter().any(|h| h == name)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "invalid analysis config: {}", err),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Parse(err) => Some(err),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

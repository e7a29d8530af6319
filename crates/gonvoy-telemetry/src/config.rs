//! Logging settings, from code or from `GONVOY_LOG_*` variables.

use std::str::FromStr;

use crate::TelemetryError;

/// Environment variable holding the default level directive.
pub const LOG_LEVEL_ENV: &str = "GONVOY_LOG_LEVEL";

/// Environment variable selecting `json` or `pretty` output.
pub const LOG_FORMAT_ENV: &str = "GONVOY_LOG_FORMAT";

/// How records are rendered on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One flattened JSON object per record.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else if s.eq_ignore_ascii_case("pretty") {
            Ok(Self::Pretty)
        } else {
            Err(TelemetryError::UnknownFormat(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Directive used when neither `GONVOY_LOG` nor `RUST_LOG` is set.
    pub level: String,
    pub format: LogFormat,
    /// Stamp file and line on every record.
    pub source_location: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            source_location: false,
        }
    }
}

impl TelemetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `GONVOY_LOG_LEVEL` and `GONVOY_LOG_FORMAT`.
    pub fn from_env() -> Result<Self, TelemetryError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`TelemetryConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TelemetryError> {
        let mut config = Self::default();
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|l| !l.trim().is_empty()) {
            config.level = level.trim().to_string();
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.format = format.trim().parse()?;
        }
        Ok(config)
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn format_names_ignore_case() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!(matches!(
            "yaml".parse::<LogFormat>(),
            Err(TelemetryError::UnknownFormat(f)) if f == "yaml"
        ));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            (LOG_LEVEL_ENV, " gonvoy=debug,warn "),
            (LOG_FORMAT_ENV, "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.level, "gonvoy=debug,warn");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.source_location);
    }

    #[test]
    fn blank_level_keeps_default() {
        let config = TelemetryConfig::from_lookup(lookup(&[(LOG_LEVEL_ENV, "  ")])).unwrap();
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    fn bad_format_is_an_error() {
        assert!(TelemetryConfig::from_lookup(lookup(&[(LOG_FORMAT_ENV, "xml")])).is_err());
    }
}

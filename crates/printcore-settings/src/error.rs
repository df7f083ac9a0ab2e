//! Error types for the settings crate.
//!
//! [`ConfigError`] covers a machine description that cannot be used,
//! [`PersistenceError`] a stored snapshot that cannot be applied, and
//! [`SettingsError`] wraps both together with file and format failures.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, saving or applying settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A settings or configuration file could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// A settings or configuration file (or its directory) could not be written.
    #[error("Cannot write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// No platform configuration directory.
    #[error("Config directory error: {0}")]
    ConfigDirectory(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl SettingsError {
    pub(crate) fn read(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Read { path, source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Write { path, source }
    }
}

/// A machine description that fails validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Neither `.json` nor `.toml`.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },

    /// Two values contradict each other.
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),

    #[error("Unknown geometry: {0}")]
    UnknownGeometry(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(key: &str, value: impl ToString) -> Self {
        Self::ValueOutOfRange {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// A stored snapshot that cannot be applied.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Written by an incompatible snapshot layout.
    #[error("Stored settings version {found} does not match {expected}")]
    VersionMismatch { found: String, expected: String },

    /// Applying the snapshot would leave an invalid configuration.
    #[error("Settings validation failed: {0}")]
    ValidationFailed(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_errors_name_the_path() {
        let err = SettingsError::read("/tmp/printcore/settings.toml")(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(err.to_string(), "Cannot read /tmp/printcore/settings.toml: denied");

        let err = SettingsError::write("machine.json")(io::Error::other("disk full"));
        assert!(matches!(err, SettingsError::Write { .. }));
        assert_eq!(err.to_string(), "Cannot write machine.json: disk full");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnsupportedFormat("yaml".to_string());
        assert_eq!(err.to_string(), "Unsupported config format: yaml");

        let err = ConfigError::out_of_range("delta.diagonal_rod", -1.0);
        assert_eq!(
            err.to_string(),
            "Value out of range for 'delta.diagonal_rod': -1"
        );
    }

    #[test]
    fn test_persistence_error_display() {
        let err = PersistenceError::VersionMismatch {
            found: "V0".to_string(),
            expected: "V1".to_string(),
        };
        assert_eq!(err.to_string(), "Stored settings version V0 does not match V1");
    }

    #[test]
    fn test_error_conversion() {
        let settings_err: SettingsError = ConfigError::UnknownGeometry("hexapod".to_string()).into();
        assert!(matches!(settings_err, SettingsError::Config(_)));

        let settings_err: SettingsError = PersistenceError::ValidationFailed("test".to_string()).into();
        assert!(matches!(settings_err, SettingsError::Persistence(_)));
    }
}

//! Field checks applied before settings are accepted.

use crate::error::{ConfigError, ConfigResult};
use crate::model::Settings;

pub(crate) fn validate(settings: &Settings) -> ConfigResult<()> {
    if settings.download_path.as_os_str().is_empty() {
        return Err(invalid("download_path", None, "must not be empty"));
    }
    if settings.torrents_path.as_os_str().is_empty() {
        return Err(invalid("torrents_path", None, "must not be empty"));
    }
    if settings.session_save == 0 {
        return Err(invalid(
            "session_save",
            Some(settings.session_save.to_string()),
            "must be positive",
        ));
    }
    if !(settings.read_ahead > 0.0 && settings.read_ahead <= 1.0) {
        return Err(invalid(
            "read_ahead",
            Some(settings.read_ahead.to_string()),
            "must be within (0, 1]",
        ));
    }
    if settings.buffer_size == 0 {
        return Err(invalid("buffer_size", Some("0".into()), "must be positive"));
    }
    if settings.log_level.trim().is_empty() {
        return Err(invalid("log_level", None, "must not be empty"));
    }
    Ok(())
}

const fn invalid(field: &'static str, value: Option<String>, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        field,
        value,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn accepts_defaults() {
        assert!(validate(&Settings::default()).is_ok());
    }

    #[test]
    fn reports_the_offending_field() {
        let cases = [
            (
                Settings {
                    download_path: PathBuf::new(),
                    ..Settings::default()
                },
                "download_path",
            ),
            (
                Settings {
                    session_save: 0,
                    ..Settings::default()
                },
                "session_save",
            ),
            (
                Settings {
                    read_ahead: 1.5,
                    ..Settings::default()
                },
                "read_ahead",
            ),
            (
                Settings {
                    read_ahead: f64::NAN,
                    ..Settings::default()
                },
                "read_ahead",
            ),
        ];
        for (settings, expected) in cases {
            match validate(&settings) {
                Err(ConfigError::InvalidField { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} to be rejected, got {other:?}"),
            }
        }
    }
}

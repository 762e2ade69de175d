use rivulet_config::{ConfigError, EncryptionPolicy, Settings};
use tempfile::TempDir;

#[test]
fn missing_file_yields_defaults_bound_to_path() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("settings.json");
    let settings = Settings::load(&path)?;
    assert_eq!(settings.path, path);
    assert_eq!(settings.listen_port, Settings::default().listen_port);
    Ok(())
}

#[test]
fn saved_settings_load_back() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("conf").join("settings.json");
    let mut settings = Settings::load(&path)?;
    settings.update(br#"{"max_download_rate": 1048576, "encryption_policy": "forced"}"#)?;
    settings.save()?;

    let loaded = Settings::load(&path)?;
    assert_eq!(loaded.max_download_rate, 1_048_576);
    assert_eq!(loaded.encryption_policy, EncryptionPolicy::Forced);
    assert_eq!(loaded, settings);
    Ok(())
}

#[test]
fn partial_documents_keep_defaults_for_missing_fields() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("settings.json");
    std::fs::write(&path, br#"{"session_save": 5}"#)?;
    let settings = Settings::load(&path)?;
    assert_eq!(settings.session_save, 5);
    assert_eq!(settings.buffer_size, Settings::default().buffer_size);
    Ok(())
}

#[test]
fn rejected_updates_leave_settings_untouched() -> anyhow::Result<()> {
    let mut settings = Settings::default();
    let before = settings.clone();

    let unknown = settings.update(br#"{"listen_port": 7000, "bogus": 1}"#);
    assert!(matches!(unknown, Err(ConfigError::UnknownField { ref field }) if field == "bogus"));

    let invalid = settings.update(br#"{"listen_port": 7000, "session_save": 0}"#);
    assert!(matches!(
        invalid,
        Err(ConfigError::InvalidField {
            field: "session_save",
            ..
        })
    ));

    assert!(settings.update(b"[1, 2]").is_err());
    assert_eq!(settings, before);
    Ok(())
}

#[test]
fn malformed_file_is_a_parse_error() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("settings.json");
    std::fs::write(&path, b"{not json")?;
    assert!(matches!(
        Settings::load(&path),
        Err(ConfigError::Parse { path: Some(_), .. })
    ));
    Ok(())
}

use screensaverd::config::{self, Config, Mode};
use screensaverd::prefs::PreferencesLoader;
use serial_test::serial;
use std::fs;
use std::time::Duration;

fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
lock_enabled = false
mode = "random"
themes = ["gears", "glmatrix"]
idle_timeout_seconds = 300
"#,
    );

    let config = Config::load(&path).unwrap();
    assert!(!config.lock_enabled);
    assert_eq!(config.mode, Mode::Random);
    assert_eq!(config.themes.len(), 2);
    assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    assert_eq!(config.grab_release_delay(), Duration::from_millis(500));
    assert!(config.idle_activation_enabled);
}

#[test]
fn test_load_rejects_bad_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "mode = \"fireworks\"\n");

    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_reload_keeps_snapshot_on_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "idle_timeout_seconds = 120\n");

    let loader = PreferencesLoader::new(Config::load(&path).unwrap(), Some(path.clone()));
    let prefs = loader.subscribe();

    fs::write(&path, "idle_timeout_seconds = 240\n").unwrap();
    assert!(loader.reload().unwrap());
    assert_eq!(prefs.snapshot().idle_timeout_seconds, 240);

    // Unchanged file: no notification
    assert!(!loader.reload().unwrap());

    fs::write(&path, "idle_timeout_seconds = \"soon\"\n").unwrap();
    assert!(loader.reload().is_err());
    assert_eq!(prefs.snapshot().idle_timeout_seconds, 240);
}

#[test]
#[serial]
fn test_default_path_follows_xdg_config_home() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("screensaverd");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "saver_enabled = false\n").unwrap();

    // SAFETY: serialized with the other environment tests.
    unsafe { std::env::set_var("XDG_CONFIG_HOME", dir.path()) };

    assert_eq!(
        config::default_path(),
        Some(config_dir.join("config.toml"))
    );
    let config = Config::load_or_default(None).unwrap();
    assert!(!config.saver_enabled);

    unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
}

#[test]
#[serial]
fn test_missing_default_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();

    // SAFETY: serialized with the other environment tests.
    unsafe { std::env::set_var("XDG_CONFIG_HOME", dir.path()) };

    let config = Config::load_or_default(None).unwrap();
    assert_eq!(config, Config::default());

    unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
}

use std::sync::Mutex;
use std::time::Duration;

use tempfile::{tempdir, NamedTempFile};

use fall_sentinel::settings::{Settings, SettingsStore};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FALL_SENTINEL_SETTINGS",
        "FALL_SENTINEL_OUTPUT_DIR",
        "FALL_SENTINEL_TELEGRAM_TOKEN",
        "FALL_SENTINEL_TELEGRAM_CHAT_ID",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn missing_file_is_created_with_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("conf").join("settings.json");
    let store = SettingsStore::load(&path).expect("load settings");

    assert_eq!(store.stored(), &Settings::default());
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["model_name"], "yolo11n_fall.onnx");
    assert_eq!(written["wait_time"], 5.0);
    assert_eq!(written["notify_cooldown"], 10.0);
}

#[test]
fn partial_file_fills_missing_keys_and_env_overrides_apply() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp settings");
    let json = r#"{
        "confidence_threshold": "0.65",
        "wait_time": 3,
        "telegram_token": "111:stored",
        "telegram_chat_id": 99
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write settings");

    std::env::set_var("FALL_SENTINEL_SETTINGS", file.path());
    std::env::set_var("FALL_SENTINEL_TELEGRAM_CHAT_ID", "-1001");
    std::env::set_var("FALL_SENTINEL_OUTPUT_DIR", "  ");

    let store = SettingsStore::load_default().expect("load settings");
    assert_eq!(store.path(), file.path());
    assert_eq!(store.stored().telegram_chat_id, "99");

    let effective = store.effective().unwrap();
    assert_eq!(effective.telegram_chat_id, "-1001");
    assert_eq!(effective.output_dir, std::path::PathBuf::from("outputs"));

    let session = store.session_config().unwrap();
    assert_eq!(session.label_font, None);
    assert_eq!(session.debounce.sustain, Duration::from_secs(3));
    assert_eq!(session.debounce.cooldown, Duration::from_secs(10));
    assert!((session.condition.confidence_threshold - 0.65).abs() < 1e-6);
    let telegram = session.telegram.expect("telegram configured");
    assert_eq!(telegram.token, "111:stored");
    assert_eq!(telegram.chat_id, "-1001");

    clear_env();
}

#[test]
fn corrupt_file_falls_back_without_overwriting() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = SettingsStore::load(&path).expect("load settings");
    assert_eq!(store.stored(), &Settings::default());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn set_validates_persists_and_creates_folders() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let mut store = SettingsStore::load(&path).unwrap();
    store
        .replace(Settings {
            models_dir: dir.path().join("models"),
            output_dir: dir.path().join("outputs"),
            ..Settings::default()
        })
        .unwrap();

    store.set("notify_cooldown", "30").unwrap();
    assert!(dir.path().join("models").is_dir());
    assert!(dir.path().join("outputs").is_dir());

    assert!(store.set("confidence_threshold", "1.5").is_err());
    assert!(store.set("wait_time", "soon").is_err());
    assert!(store.set("model_input_size", "500").is_err());
    assert!(store.set("no_such_key", "1").is_err());
    assert!(store.set("telegram_token", "bad token").is_err());

    let reloaded = SettingsStore::load(&path).unwrap();
    assert_eq!(reloaded.stored().notify_cooldown, 30.0);
    assert_eq!(reloaded.stored().confidence_threshold, 0.5);

    store.set("label_font", " fonts/Label.ttf ").unwrap();
    let session = store.session_config().unwrap();
    assert_eq!(session.label_font, Some(std::path::PathBuf::from("fonts/Label.ttf")));

    store.set("class_names", "fall, person,,").unwrap();
    let reloaded = SettingsStore::load(&path).unwrap();
    assert_eq!(reloaded.stored().class_names, vec!["fall", "person"]);
}

#[test]
fn invalid_env_token_is_rejected_at_session_start() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().unwrap();
    let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();
    std::env::set_var("FALL_SENTINEL_TELEGRAM_TOKEN", "nonsense");

    assert!(store.session_config().is_err());
    assert_eq!(store.stored().telegram_token, "");

    clear_env();
}

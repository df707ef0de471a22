use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use brand_sentry::config::SentryConfig;
use brand_sentry::detect::ModelBackendKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTRY_CONFIG",
        "SENTRY_SOURCE_URL",
        "SENTRY_MODEL_BACKEND",
        "SENTRY_MODEL_PATH",
        "SENTRY_VEHICLE_CLASSES",
        "SENTRY_VERIFY_ENDPOINT",
        "SENTRY_API_KEY",
        "SENTRY_TARGET_BRAND",
        "SENTRY_COOLDOWN_MS",
        "SENTRY_DEBUG_SNAPSHOT",
        "SENTRY_ALARM_ASSET",
        "SENTRY_ALARM_PLAYER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "url": "http://cam.local:81/stream",
            "target_fps": 15,
            "max_consecutive_errors": 5
        },
        "display": { "width": 320, "height": 240 },
        "model": { "backend": "scripted", "path": "detections.json" },
        "filter": { "confidence_threshold": 0.75, "classes": ["Car", "truck"] },
        "mask": { "stroke_width": 30, "strokes": [[[0, 0], [100, 0]]] },
        "verification": {
            "endpoint": "https://mmg.example.com/detect",
            "api_key": "file-key",
            "cooldown_ms": 5000,
            "jpeg_quality": 80
        },
        "alarm": { "asset": "sounds/horn.wav", "player": "paplay" },
        "refresh_hz": 30
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SENTRY_CONFIG", file.path());
    std::env::set_var("SENTRY_API_KEY", "env-key");
    std::env::set_var("SENTRY_TARGET_BRAND", "Porsche");
    std::env::set_var("SENTRY_COOLDOWN_MS", "2500");

    let cfg = SentryConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "http://cam.local:81/stream");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.max_consecutive_errors, 5);
    assert_eq!(cfg.display, (320, 240));
    assert_eq!(cfg.model.backend, ModelBackendKind::Scripted);
    assert_eq!(cfg.model.path.as_deref(), Some(std::path::Path::new("detections.json")));
    assert_eq!(cfg.filter.confidence_threshold, 0.75);
    assert_eq!(cfg.filter.classes, vec!["car", "truck"]);
    assert_eq!(cfg.mask.stroke_width, 30.0);
    assert_eq!(cfg.mask.strokes.len(), 1);
    assert_eq!(cfg.verification.endpoint, "https://mmg.example.com/detect");
    assert_eq!(cfg.verification.api_key.as_deref(), Some("env-key"));
    assert_eq!(cfg.verification.target_brand, "Porsche");
    assert_eq!(cfg.verification.cooldown, Duration::from_millis(2500));
    assert_eq!(cfg.verification.jpeg_quality, 80);
    assert_eq!(cfg.alarm.player, "paplay");
    assert_eq!(cfg.refresh_hz, 30);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
refresh_hz = 24

[source]
url = "stub://garage?frames=10"
width = 320
height = 240

[verification]
target_brand = "jaguar"
debug_snapshot_path = "/tmp/last_snapshot.jpg"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SENTRY_VEHICLE_CLASSES", "car, van ,");

    let cfg = SentryConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.source.url, "stub://garage?frames=10");
    assert_eq!(cfg.display, (320, 240));
    assert_eq!(cfg.refresh_hz, 24);
    assert_eq!(cfg.filter.classes, vec!["car", "van"]);
    assert_eq!(
        cfg.verification.debug_snapshot_path.as_deref(),
        Some(std::path::Path::new("/tmp/last_snapshot.jpg"))
    );

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SentryConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://driveway");
    assert_eq!(cfg.verification.endpoint, "http://localhost:8010/proxy/v2/mmg/detect");
    assert!(cfg.verification.api_key.is_none());
    assert_eq!(cfg.verification.cooldown, Duration::from_millis(2000));
    assert_eq!(cfg.verification.timeout, Duration::from_secs(30));
    assert_eq!(cfg.status_interval, Duration::from_secs(5));
}

#[test]
fn rejects_bad_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTRY_COOLDOWN_MS", "soon");
    let err = SentryConfig::load().unwrap_err();
    assert!(err.to_string().contains("SENTRY_COOLDOWN_MS"));
    clear_env();

    std::env::set_var("SENTRY_MODEL_BACKEND", "yolo");
    let err = SentryConfig::load().unwrap_err();
    assert!(err.to_string().contains("SENTRY_MODEL_BACKEND"));
    clear_env();

    std::env::set_var("SENTRY_VERIFY_ENDPOINT", "localhost:8010");
    assert!(SentryConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unreadable_or_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    assert!(SentryConfig::load_from(Some(std::path::Path::new("/nonexistent/sentry.json"))).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    let err = SentryConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
}

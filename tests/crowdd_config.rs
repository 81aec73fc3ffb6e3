use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use crowdwatch::CrowddConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CROWD_CONFIG",
        "CAMERA_SOURCE",
        "CAMERA_WIDTH",
        "CAMERA_HEIGHT",
        "CAMERA_FPS",
        "CROWD_THRESHOLD",
        "DETECTION_CONFIDENCE",
        "DETECTION_MODEL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "source": "rtsp://lobby-cam",
            "width": 800,
            "height": 600,
            "target_fps": 12,
            "stall_timeout_ms": 3000
        },
        "detection": {
            "confidence": 0.6,
            "model_path": "models/ssd.onnx"
        },
        "alerting": {
            "threshold": 25,
            "debounce_window": 5
        },
        "stream": {
            "jpeg_quality": 70
        },
        "supervisor": {
            "reopen_backoff_base_ms": 250,
            "reopen_backoff_max_ms": 10000,
            "failure_window": 20,
            "failure_ratio": 0.25
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CROWD_CONFIG", file.path());
    std::env::set_var("CAMERA_SOURCE", "rtsp://rear-cam");
    std::env::set_var("CROWD_THRESHOLD", "30");

    let cfg = CrowddConfig::load().expect("load config");

    // Env wins over file; untouched file values survive.
    assert_eq!(cfg.camera_source, "rtsp://rear-cam");
    assert_eq!(cfg.pipeline.threshold, 30);
    assert_eq!(cfg.pipeline.width, 800);
    assert_eq!(cfg.pipeline.height, 600);
    assert_eq!(cfg.pipeline.target_fps, 12);
    assert_eq!(cfg.pipeline.stall_timeout, Duration::from_millis(3000));
    assert_eq!(cfg.pipeline.confidence, 0.6);
    assert_eq!(cfg.model_path.as_deref(), Some("models/ssd.onnx"));
    assert_eq!(cfg.pipeline.debounce_window, 5);
    assert_eq!(cfg.pipeline.jpeg_quality, 70);
    assert_eq!(cfg.pipeline.reopen_backoff_base, Duration::from_millis(250));
    assert_eq!(cfg.pipeline.reopen_backoff_max, Duration::from_millis(10000));
    assert_eq!(cfg.pipeline.failure_window, 20);
    assert_eq!(cfg.pipeline.failure_ratio, 0.25);

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CrowddConfig::load().expect("load config");

    assert_eq!(cfg.camera_source, "stub://front_camera");
    assert_eq!(cfg.pipeline.threshold, 10);
    assert_eq!(cfg.pipeline.confidence, 0.5);
    assert_eq!(cfg.pipeline.target_fps, 10);
    assert_eq!(cfg.pipeline.width, 640);
    assert_eq!(cfg.pipeline.height, 480);
    assert_eq!(cfg.pipeline.debounce_window, 3);
    assert!(cfg.model_path.is_none());

    clear_env();
}

#[test]
fn invalid_env_value_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CROWD_THRESHOLD", "lots");
    let err = CrowddConfig::load().expect_err("bad threshold must fail");
    assert!(err.to_string().contains("CROWD_THRESHOLD"));

    clear_env();
}

#[test]
fn out_of_range_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CROWD_THRESHOLD", "0");
    assert!(CrowddConfig::load().is_err());
    clear_env();

    std::env::set_var("DETECTION_CONFIDENCE", "1.5");
    assert!(CrowddConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CROWD_CONFIG", "/nonexistent/crowd.json");
    let err = CrowddConfig::load().expect_err("missing file must fail");
    assert!(err.to_string().contains("/nonexistent/crowd.json"));

    clear_env();
}

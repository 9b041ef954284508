use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_kestrel"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "kestrel init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let config_path = dir.path().join(".kestrel.toml");
    assert!(config_path.exists(), ".kestrel.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[llm]"));
    assert!(content.contains("[review]"));

    // Verify it's valid TOML that kestrel-core can parse
    let _config: kestrel_core::KestrelConfig = toml::from_str(&content).unwrap();
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".kestrel.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_kestrel"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success(), "init should refuse to overwrite");
    let content = std::fs::read_to_string(dir.path().join(".kestrel.toml")).unwrap();
    assert_eq!(content, "# existing");
}

#[test]
fn doctor_runs_without_config() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_kestrel"))
        .arg("doctor")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Environment Check"));
    assert!(stdout.contains("config file"));
}

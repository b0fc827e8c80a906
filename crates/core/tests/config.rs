use retainer_core::config::AppConfig;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_defaults_match_engine_conventions() {
    let file = write_config("host = \"sense.local\"\n");
    let config = AppConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.require_host().unwrap(), "sense.local");
    assert_eq!(config.port, 4747);
    assert_eq!(config.idle_days, 180);
    assert_eq!(config.min_size_bytes(), 1024 * 1024);
    assert!(!config.include_published);
    assert_eq!(config.max_concurrency, 1);
    assert_eq!(config.save_method, "DoSave");
    assert!(config.clear_method.is_none());
    assert!(config.cert_dir().ends_with("certs"));
}

#[test]
fn test_file_values_override_defaults() {
    let file = write_config(
        r#"
host = "bi.corp"
port = 443
idle_days = 90
min_size_mb = 0.5
exclude_ids = "a1, b2"
exclude_patterns = "^Monitoring,Template$"
max_concurrency = 4
cert_dir = "/etc/retainer/certs"
"#,
    );
    let config = AppConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.port, 443);
    assert_eq!(config.idle_days, 90);
    assert_eq!(config.min_size_bytes(), 512 * 1024);
    assert_eq!(config.excluded_ids(), vec!["a1", "b2"]);
    assert_eq!(config.excluded_patterns(), vec!["^Monitoring", "Template$"]);
    assert_eq!(config.max_concurrency, 4);

    let paths = config.credential_paths();
    assert_eq!(paths.client_cert.to_str(), Some("/etc/retainer/certs/client.pem"));
    assert_eq!(paths.client_key.to_str(), Some("/etc/retainer/certs/client_key.pem"));
    assert_eq!(paths.root_cert.to_str(), Some("/etc/retainer/certs/root.pem"));
}

#[test]
fn test_zero_concurrency_is_rejected() {
    let file = write_config("max_concurrency = 0\n");
    assert!(AppConfig::load_from_file(file.path()).is_err());
}

#[test]
fn test_missing_host_is_reported() {
    let file = write_config("port = 4747\n");
    let config = AppConfig::load_from_file(file.path()).unwrap();
    assert!(config.require_host().is_err());
}

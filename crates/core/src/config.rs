use crate::credentials::CredentialPaths;
use crate::endpoint::{Credentials, Endpoint, EngineUser};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub host: Option<String>,
    pub port: u16,
    pub ws_path: String,
    pub user_directory: String,
    pub user_id: String,

    pub cert_dir: Option<String>,
    pub client_cert: String,
    pub client_key: String,
    pub root_cert: String,

    pub idle_days: i64,
    pub min_size_mb: f64,
    pub include_published: bool,
    pub exclude_ids: Option<String>,
    pub exclude_patterns: Option<String>,
    pub max_concurrency: usize,

    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub save_timeout_secs: u64,

    pub clear_method: Option<String>,
    pub save_method: String,
    pub close_method: Option<String>,

    pub report_dir: Option<String>,

    #[serde(skip)]
    pub project_root: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // 1. Try standard dotenv discovery from current dir
        if dotenvy::dotenv().is_err() {
            // 2. Fallback: Try explicitly from resolved RETAINER_ROOT
            let root = crate::path_utils::get_app_root();
            let path = root.join(".env");
            if path.exists() {
                let _ = dotenvy::from_path(&path);
            }
        }

        let builder = Self::defaults()?
            .add_source(File::with_name("retainer").required(false))
            .add_source(Environment::with_prefix("RETAINER").try_parsing(true));

        Self::finish(builder)
    }

    /// Loads defaults plus a single explicit file, ignoring the environment.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let builder = Self::defaults()?.add_source(File::from(path));
        Self::finish(builder)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("port", 4747)?
            .set_default("ws_path", "/app/")?
            .set_default("user_directory", "INTERNAL")?
            .set_default("user_id", "sa_engine")?
            .set_default("client_cert", "client.pem")?
            .set_default("client_key", "client_key.pem")?
            .set_default("root_cert", "root.pem")?
            .set_default("idle_days", 180)?
            .set_default("min_size_mb", 1.0)?
            .set_default("include_published", false)?
            .set_default("max_concurrency", 1)?
            .set_default("connect_timeout_secs", 10)?
            .set_default("idle_timeout_secs", 600)?
            .set_default("call_timeout_secs", 60)?
            .set_default("save_timeout_secs", 300)?
            .set_default("save_method", "DoSave")
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let mut config: Self = builder.build()?.try_deserialize()?;

        if config.max_concurrency == 0 {
            return Err(ConfigError::Message("max_concurrency must be at least 1".into()));
        }
        if config.idle_days < 0 {
            return Err(ConfigError::Message("idle_days must not be negative".into()));
        }

        config.project_root = crate::path_utils::get_app_root();
        Ok(config)
    }

    pub fn require_host(&self) -> Result<&str, ConfigError> {
        self.host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::NotFound("host".into()))
    }

    pub fn cert_dir(&self) -> PathBuf {
        match &self.cert_dir {
            Some(dir) => crate::path_utils::ensure_absolute(dir),
            None => self.project_root.join("certs"),
        }
    }

    pub fn report_dir(&self) -> PathBuf {
        match &self.report_dir {
            Some(dir) => crate::path_utils::ensure_absolute(dir),
            None => self.project_root.join("reports"),
        }
    }

    pub fn credential_paths(&self) -> CredentialPaths {
        CredentialPaths::in_dir(&self.cert_dir(), &self.client_cert, &self.client_key, &self.root_cert)
    }

    pub fn endpoint(&self, credentials: Credentials) -> Result<Endpoint, ConfigError> {
        let host = self.require_host()?;
        Ok(Endpoint::new(host, credentials)
            .with_port(self.port)
            .with_path(self.ws_path.clone())
            .with_user(EngineUser {
                directory: self.user_directory.clone(),
                id: self.user_id.clone(),
            }))
    }

    pub fn excluded_ids(&self) -> Vec<String> {
        split_list(self.exclude_ids.as_deref())
    }

    pub fn excluded_patterns(&self) -> Vec<String> {
        split_list(self.exclude_patterns.as_deref())
    }

    pub fn min_size_bytes(&self) -> u64 {
        (self.min_size_mb.max(0.0) * 1024.0 * 1024.0) as u64
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs(self.save_timeout_secs)
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

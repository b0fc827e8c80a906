use std::fmt;

pub const DEFAULT_ENGINE_PORT: u16 = 4747;
pub const DEFAULT_WS_PATH: &str = "/app/";

/// PEM material for a mutual-TLS session, held in memory.
#[derive(Clone)]
pub struct Credentials {
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
    pub root_cert: Vec<u8>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .field("root_cert", &format_args!("{} bytes", self.root_cert.len()))
            .finish()
    }
}

/// The identity the engine attributes the session to (sent as `X-Qlik-User`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineUser {
    pub directory: String,
    pub id: String,
}

impl EngineUser {
    pub fn header_value(&self) -> String {
        format!("UserDirectory={}; UserId={}", self.directory, self.id)
    }
}

impl Default for EngineUser {
    fn default() -> Self {
        Self {
            directory: "INTERNAL".to_string(),
            id: "sa_engine".to_string(),
        }
    }
}

/// A single engine endpoint. Immutable for the life of a run.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub user: EngineUser,
    pub credentials: Credentials,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_ENGINE_PORT,
            path: DEFAULT_WS_PATH.to_string(),
            user: EngineUser::default(),
            credentials,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_user(mut self, user: EngineUser) -> Self {
        self.user = user;
        self
    }

    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("wss://{}:{}{}", self.host, self.port, path)
    }
}

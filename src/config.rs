use std::{env, net::SocketAddr, time::Duration};

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_LMSTUDIO_HOST: &str = "http://127.0.0.1:1234";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI assistant that follows instructions. Help the user with their tasks.";

/// Process-wide settings, read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub chat_defaults: ChatDefaults,
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub admin_password: Option<String>,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub ollama_host: String,
    pub lmstudio_host: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatDefaults {
    pub system_prompt: String,
    pub temperature: f64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|value| value.parse::<SocketAddr>().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));

        Self {
            upstream: UpstreamConfig::from_env(),
            chat_defaults: ChatDefaults::from_env(),
            bind_addr,
            database_url: database_url_from_env(),
            admin_password: non_empty_var("ADMIN_PASSWORD"),
            token_ttl: Duration::from_secs(read_u64("ACCESS_TOKEN_TTL_MINUTES", 30) * 60),
        }
    }

    pub fn for_tests(upstream: UpstreamConfig) -> Self {
        Self {
            upstream,
            chat_defaults: ChatDefaults::default(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: None,
            admin_password: None,
            token_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl UpstreamConfig {
    pub fn from_env() -> Self {
        Self {
            ollama_host: non_empty_var("OLLAMA_HOST")
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_owned()),
            lmstudio_host: non_empty_var("LMSTUDIO_HOST")
                .unwrap_or_else(|| DEFAULT_LMSTUDIO_HOST.to_owned()),
            timeout: Duration::from_millis(read_u64("API_TIMEOUT_DURATION", 60_000)),
        }
    }

    /// Both hosts pointing at the same server means LMStudio serves everything.
    pub fn single_host(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            ollama_host: host.clone(),
            lmstudio_host: host,
            timeout: Duration::from_millis(60_000),
        }
    }

    pub fn ollama(host: impl Into<String>) -> Self {
        Self {
            ollama_host: host.into(),
            lmstudio_host: DEFAULT_LMSTUDIO_HOST.to_owned(),
            timeout: Duration::from_millis(60_000),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True when the primary host was overridden away from the stock Ollama address.
    pub fn ollama_host_overridden(&self) -> bool {
        trim_host(&self.ollama_host) != trim_host(DEFAULT_OLLAMA_HOST)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_owned(),
            lmstudio_host: DEFAULT_LMSTUDIO_HOST.to_owned(),
            timeout: Duration::from_millis(60_000),
        }
    }
}

impl ChatDefaults {
    pub fn from_env() -> Self {
        Self {
            system_prompt: non_empty_var("DEFAULT_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned()),
            temperature: env::var("DEFAULT_TEMPERATURE")
                .ok()
                .and_then(|value| value.parse::<f64>().ok())
                .unwrap_or(1.0),
        }
    }
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            temperature: 1.0,
        }
    }
}

pub fn trim_host(host: &str) -> &str {
    host.trim().trim_end_matches('/')
}

fn database_url_from_env() -> Option<String> {
    if let Some(url) = non_empty_var("DATABASE_URL") {
        return Some(url);
    }
    let host = non_empty_var("PG_HOST")?;
    let user = non_empty_var("PG_USER").unwrap_or_else(|| "postgres".to_owned());
    let password = env::var("PG_PASSWORD").unwrap_or_default();
    let port = non_empty_var("PG_PORT").unwrap_or_else(|| "5432".to_owned());
    let database = non_empty_var("PG_DATABASE").unwrap_or_else(|| "chatbot_ollama".to_owned());
    Some(format!(
        "postgres://{user}:{password}@{host}:{port}/{database}"
    ))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn read_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

use std::collections::HashMap;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_BRAVE_BASE_URL: &str = "https://api.search.brave.com/res/v1/web/search";
pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub env: String,
    pub public_base_url: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub openrouter_default_model: Option<String>,
    pub brave_api_key: Option<String>,
    pub brave_base_url: String,
    pub tavily_api_key: Option<String>,
    pub tavily_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServerConfig {
    pub fn load() -> Result<Self, StartupError> {
        let kv = std::env::vars().collect::<HashMap<_, _>>();
        Self::from_kv(&kv)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let port = parse_u16(kv.get("PORT"), DEFAULT_PORT, "PORT")?;

        let env = optional_nonempty(kv, "NODE_ENV").unwrap_or_else(|| "development".to_string());

        let public_base_url =
            optional_nonempty(kv, "PUBLIC_BASE_URL").map(|s| s.trim_end_matches('/').to_string());

        let openrouter_api_key = optional_nonempty(kv, "OPENROUTER_API_KEY");
        let openrouter_base_url = base_url(kv, "OPENROUTER_BASE_URL", DEFAULT_OPENROUTER_BASE_URL);
        let openrouter_default_model = optional_nonempty(kv, "OPENROUTER_DEFAULT_MODEL");

        let brave_api_key = optional_nonempty(kv, "BRAVE_SEARCH_API_KEY");
        let brave_base_url = base_url(kv, "BRAVE_SEARCH_BASE_URL", DEFAULT_BRAVE_BASE_URL);

        let tavily_api_key = optional_nonempty(kv, "TAVILY_API_KEY");
        let tavily_base_url = base_url(kv, "TAVILY_BASE_URL", DEFAULT_TAVILY_BASE_URL);

        Ok(Self {
            port,
            env,
            public_base_url,
            openrouter_api_key,
            openrouter_base_url,
            openrouter_default_model,
            brave_api_key,
            brave_base_url,
            tavily_api_key,
            tavily_base_url,
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn base_url(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    optional_nonempty(kv, key)
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

fn parse_u16(
    value: Option<&String>,
    default: u16,
    key: &'static str,
) -> Result<u16, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u16>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer port number", key),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_env_yields_defaults() {
        let config = ServerConfig::from_kv(&HashMap::new()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.env, "development");
        assert_eq!(config.openrouter_base_url, DEFAULT_OPENROUTER_BASE_URL);
        assert_eq!(config.brave_base_url, DEFAULT_BRAVE_BASE_URL);
        assert_eq!(config.tavily_base_url, DEFAULT_TAVILY_BASE_URL);
        assert!(config.openrouter_api_key.is_none());
        assert!(config.brave_api_key.is_none());
        assert!(config.tavily_api_key.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn invalid_port_fails_startup() {
        let kv = HashMap::from([("PORT".to_string(), "not-a-port".to_string())]);
        let err = ServerConfig::from_kv(&kv).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn base_urls_drop_trailing_slashes() {
        let kv = HashMap::from([
            (
                "OPENROUTER_BASE_URL".to_string(),
                "https://proxy.example/api/v1/".to_string(),
            ),
            (
                "PUBLIC_BASE_URL".to_string(),
                "https://ask.example/".to_string(),
            ),
        ]);
        let config = ServerConfig::from_kv(&kv).unwrap();
        assert_eq!(config.openrouter_base_url, "https://proxy.example/api/v1");
        assert_eq!(config.public_base_url.as_deref(), Some("https://ask.example"));
    }

    #[test]
    fn blank_keys_count_as_absent() {
        let kv = HashMap::from([("OPENROUTER_API_KEY".to_string(), "   ".to_string())]);
        let config = ServerConfig::from_kv(&kv).unwrap();
        assert!(config.openrouter_api_key.is_none());
    }

    #[test]
    fn production_flag_follows_node_env() {
        let kv = HashMap::from([("NODE_ENV".to_string(), "production".to_string())]);
        let config = ServerConfig::from_kv(&kv).unwrap();
        assert!(config.is_production());
    }
}

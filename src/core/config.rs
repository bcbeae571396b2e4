use std::env;
use std::net::SocketAddr;

use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Checked per request so the server can start without it.
    pub openai_api_key: Option<String>,
    pub openai_org_id: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Url,
    pub bind_addr: SocketAddr,
    /// Raw `MODEL_PRICING` JSON, merged over the default price table.
    pub model_pricing: Option<String>,
    pub channel_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = non_empty("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let openai_base_url =
            Url::parse(&base_url).map_err(|e| format!("OPENAI_BASE_URL: {}", e))?;

        let bind_addr = non_empty("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e| format!("BIND_ADDR: {}", e))?;

        let channel_capacity = match non_empty("RELAY_CHANNEL_CAPACITY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => return Err("RELAY_CHANNEL_CAPACITY: must be at least 1".to_string()),
                Ok(n) => n,
                Err(e) => return Err(format!("RELAY_CHANNEL_CAPACITY: {}", e)),
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Ok(Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_org_id: non_empty("OPENAI_ORG_ID"),
            openai_model: non_empty("OPENAI_MODEL"),
            openai_base_url,
            bind_addr,
            model_pricing: non_empty("MODEL_PRICING"),
            channel_capacity,
        })
    }

    /// Endpoint receiving streaming chat completion requests.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.openai_base_url.as_str().trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(
            config.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("OPENAI_BASE_URL", "http://127.0.0.1:8080/v1/"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("RELAY_CHANNEL_CAPACITY", "4"),
        ])
        .unwrap();
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_model.as_deref(), Some("gpt-4o"));
        assert_eq!(
            config.completions_url(),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.channel_capacity, 4);
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = config_from(&[("OPENAI_API_KEY", "  ")]).unwrap();
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config_from(&[("OPENAI_BASE_URL", "not a url")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "nowhere")]).is_err());
        let err = config_from(&[("RELAY_CHANNEL_CAPACITY", "0")]).unwrap_err();
        assert!(err.contains("RELAY_CHANNEL_CAPACITY"));
    }
}

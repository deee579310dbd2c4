use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_DATA_PATH: &str = "resultado_eficiencia.csv";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-latest";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_path: PathBuf,
    /// `None` when no API key is configured; the narrative feature is then
    /// disabled and everything else keeps working.
    pub gemini: Option<GeminiConfig>,
}

#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "API_KEYS")]
    api_keys: ApiKeys,
}

#[derive(Deserialize)]
struct ApiKeys {
    gemini_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_path = get("EFICIENCIA_DATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));

        let api_key = get("GEMINI_API_KEY").or_else(|| {
            let file = get("GEMINI_CONFIG_FILE").unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
            api_key_from_file(Path::new(&file))
        });

        let temperature = get("GEMINI_TEMPERATURE").and_then(|t| match t.parse::<f32>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(value = %t, "ignoring unparseable GEMINI_TEMPERATURE");
                None
            }
        });
        let timeout_secs = get("GEMINI_TIMEOUT_SECS")
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let gemini = api_key.map(|api_key| GeminiConfig {
            api_key,
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            temperature,
            timeout_secs,
        });
        if gemini.is_none() {
            debug!("no Gemini API key configured; narrative analysis disabled");
        }

        Config { data_path, gemini }
    }
}

/// Read `API_KEYS.gemini_api_key` from a JSON file. Any failure means "no key".
pub fn api_key_from_file(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let parsed: KeyFile = match serde_json::from_str(&text) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config file is not valid JSON");
            return None;
        }
    };
    parsed
        .api_keys
        .gemini_api_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

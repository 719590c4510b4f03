use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, eyre};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::cli::chat::language::Language;
use crate::openai_client::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

const CONFIG_DIR_NAME: &str = "exam-tutor";
const CONFIG_FILE_NAME: &str = "config.json";

/// Optional settings file. Every field may be left out.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub language: Option<Language>,
    pub capture_command: Option<String>,
    pub speech_output: Option<bool>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .wrap_err_with(|| format!("Invalid config file {}", path.display()))
    }
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct TutorConfig {
    pub api_key: Option<String>,
    pub endpoint: Url,
    pub model: String,
    pub language: Language,
    pub capture_command: Option<String>,
    pub speech_output: bool,
}

impl TutorConfig {
    /// Defaults, then the config file, then the environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => FileConfig::read(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    debug!("Loading config from {}", path.display());
                    FileConfig::read(&path)?
                }
                None => FileConfig::default(),
            },
        };

        Self::from_sources(file, |key| env::var(key).ok())
    }

    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let api_key =
            non_empty("OPENAI_API_KEY").or_else(|| non_empty("NEXT_PUBLIC_OPENAI_API_KEY"));

        let endpoint = non_empty("EXAM_TUTOR_ENDPOINT")
            .or(file.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| eyre!("Invalid completion endpoint '{}': {}", endpoint, e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(eyre!("Completion endpoint must be http or https: {}", endpoint));
        }

        let model = non_empty("EXAM_TUTOR_MODEL")
            .or(file.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let capture_command = non_empty("EXAM_TUTOR_CAPTURE_COMMAND").or(file.capture_command);

        let config = Self {
            api_key,
            endpoint,
            model,
            language: file.language.unwrap_or_default(),
            capture_command,
            speech_output: file.speech_output.unwrap_or(true),
        };

        info!(
            "Using model {} at {} (credential {})",
            config.model,
            config.endpoint,
            if config.api_key.is_some() { "present" } else { "missing" }
        );
        Ok(config)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_source() {
        let config = TutorConfig::from_sources(FileConfig::default(), env_from(&[])).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.endpoint.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.language, Language::English);
        assert!(config.speech_output);
        assert_eq!(config.capture_command, None);
    }

    #[test]
    fn falls_back_to_public_key_variable() {
        let config = TutorConfig::from_sources(
            FileConfig::default(),
            env_from(&[("OPENAI_API_KEY", " "), ("NEXT_PUBLIC_OPENAI_API_KEY", "sk-public")]),
        )
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-public"));
    }

    #[test]
    fn environment_overrides_file() {
        let file: FileConfig = serde_json::from_str(
            r#"{"model": "gpt-4o-mini", "language": "arabic", "endpoint": "https://proxy.example/v1/chat/completions"}"#,
        )
        .unwrap();
        let config =
            TutorConfig::from_sources(file, env_from(&[("EXAM_TUTOR_MODEL", "gpt-4o")])).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.language, Language::Arabic);
        assert_eq!(config.endpoint.host_str(), Some("proxy.example"));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let result = TutorConfig::from_sources(
            FileConfig::default(),
            env_from(&[("EXAM_TUTOR_ENDPOINT", "ftp://example.com/")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_file_keys() {
        let result = serde_json::from_str::<FileConfig>(r#"{"temperature": 1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = TutorConfig::load(Some(Path::new("/definitely/not/here/config.json")));
        assert!(result.is_err());
    }
}

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Extra directory scanned for .ttf/.otf/.ttc files used by dialogue captions.
    #[serde(default)]
    pub fonts_dir: Option<String>,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // only "gemini" for now
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Upper bound of concurrent image requests during a "generate all" fan-out.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_idea_count")]
    pub idea_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            fonts_dir: None,
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            gemini: Some(GeminiConfig::default()),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            base_url: default_gemini_base_url(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            idea_count: default_idea_count(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_max_concurrency() -> usize {
    4
}
fn default_idea_count() -> usize {
    5
}

impl Config {
    /// Loads `config.yml` from the working directory. A missing file yields the defaults,
    /// so the API key can come from the environment alone.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml_ng::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            info!("{} not found, using defaults", path.display());
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(CONFIG_FILE, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        let env_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        if let Some(key) = env_key {
            let gemini = self.llm.gemini.get_or_insert_with(GeminiConfig::default);
            if gemini.api_key.trim().is_empty() {
                gemini.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = "llm:\n  provider: gemini\n  gemini:\n    api_key: abc\n";
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.generation.max_concurrency, 4);
        assert_eq!(config.generation.idea_count, 5);

        let gemini = config.llm.gemini.unwrap();
        assert_eq!(gemini.api_key, "abc");
        assert_eq!(gemini.text_model, "gemini-2.5-flash");
        assert_eq!(gemini.image_model, "gemini-2.5-flash-image");
        assert!(gemini.base_url.starts_with("https://generativelanguage"));
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load_from(&dir.path().join("config.yml"))?;
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.llm.provider, "gemini");
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "output_folder: comics\ngeneration:\n  max_concurrency: 2\nllm:\n  gemini:\n    api_key: from-file\n",
        )?;
        let config = Config::load_from(&path)?;
        assert_eq!(config.output_folder, "comics");
        assert_eq!(config.generation.max_concurrency, 2);
        assert_eq!(config.llm.gemini.unwrap().api_key, "from-file");
        Ok(())
    }
}

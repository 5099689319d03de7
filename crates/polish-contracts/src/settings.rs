use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default file name for persisted settings, the file-backed analogue of
/// the original's fixed local-storage key.
pub const SETTINGS_FILE: &str = "prose-polish-settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub models: ModelSettings,
    pub system_message: SystemMessage,
    pub default_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub tongyi: ProviderSettings,
    pub deepseek: DeepSeekSettings,
    pub openai: ProviderSettings,
    pub gemini: ProviderSettings,
    pub custom: ProviderSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeepSeekSettings {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub models: DeepSeekModels,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepSeekModels {
    #[serde(rename = "V3", default)]
    pub v3: String,
    #[serde(rename = "R1", default)]
    pub r1: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemMessage {
    pub role: String,
    pub content: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models: ModelSettings::default(),
            system_message: SystemMessage::default(),
            default_model: "tongyi".to_string(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            tongyi: ProviderSettings {
                enabled: false,
                api_key: String::new(),
                base_url:
                    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
                        .to_string(),
                model: "qwen-plus".to_string(),
            },
            deepseek: DeepSeekSettings {
                enabled: false,
                api_key: String::new(),
                base_url: "https://api.deepseek.com/v1".to_string(),
                models: DeepSeekModels {
                    v3: "deepseek-chat".to_string(),
                    r1: "deepseek-reasoner".to_string(),
                },
            },
            openai: ProviderSettings {
                enabled: false,
                api_key: String::new(),
                base_url: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-3.5-turbo".to_string(),
            },
            gemini: ProviderSettings {
                enabled: false,
                api_key: String::new(),
                base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
                model: "gemini-pro".to_string(),
            },
            custom: ProviderSettings::default(),
        }
    }
}

impl Default for SystemMessage {
    fn default() -> Self {
        Self {
            role: "system".to_string(),
            content: "You are a professional copy editor with a deep command of \
                      publishing standards. For any request, give the result \
                      directly without extra commentary."
                .to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file
    /// is missing or unreadable, as the original did for its stored blob.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("settings serialization failed")?;
        fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_provider_table() {
        let settings = Settings::default();
        assert_eq!(settings.default_model, "tongyi");
        assert_eq!(settings.models.deepseek.models.v3, "deepseek-chat");
        assert_eq!(settings.models.deepseek.models.r1, "deepseek-reasoner");
        assert!(!settings.models.openai.enabled);
        assert!(settings.models.custom.base_url.is_empty());
        assert_eq!(settings.system_message.role, "system");
    }

    #[test]
    fn save_and_load_round_trip() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join(SETTINGS_FILE);

        let mut settings = Settings::default();
        settings.models.openai.enabled = true;
        settings.models.openai.api_key = "sk-test".to_string();
        settings.default_model = "openai".to_string();
        settings.save(&path)?;

        assert_eq!(Settings::load(&path), settings);
        Ok(())
    }

    #[test]
    fn load_falls_back_to_defaults_on_missing_or_corrupt_files() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("nope.json");
        assert_eq!(Settings::load(&missing), Settings::default());

        let corrupt = temp.path().join("bad.json");
        fs::write(&corrupt, "{not json")?;
        assert_eq!(Settings::load(&corrupt), Settings::default());
        Ok(())
    }

    #[test]
    fn serialized_keys_match_the_original_shape() -> Result<()> {
        let raw = serde_json::to_value(Settings::default())?;
        assert!(raw["models"]["openai"]["apiKey"].is_string());
        assert!(raw["models"]["deepseek"]["models"]["V3"].is_string());
        assert!(raw["systemMessage"]["content"].is_string());
        assert!(raw["defaultModel"].is_string());
        Ok(())
    }
}

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Root configuration tree. Immutable once a pipeline is constructed;
/// `Pipeline::update_config` atomically replaces it while the pipeline is idle.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub asr: AsrConfig,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub output: Value,
}

impl Config {
    /// Parse a config from its canonical JSON shape. Unknown keys are ignored;
    /// missing optional sections take their documented defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::ConfigInvalid(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum AsrProvider {
    Qwen(QwenConfig),
    DashScope(ParaformerConfig),
    OpenAiWhisper(WhisperConfig),
    FunAsr(FunAsrConfig),
}

/// Wraps the tagged provider selection. Kept as its own struct (rather than
/// flattening `AsrProvider` directly into `Config`) so the JSON shape matches
/// the spec's `{ "provider": ..., "<provider_lc>": { ... } }` envelope.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub provider: AsrProvider,
}

impl<'de> Deserialize<'de> for AsrConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Envelope {
            provider: String,
            #[serde(default)]
            qwen: Option<QwenConfig>,
            #[serde(default)]
            dashscope: Option<ParaformerConfig>,
            #[serde(default, rename = "openaiwhisper")]
            openai_whisper: Option<WhisperConfig>,
            #[serde(default)]
            funasr: Option<FunAsrConfig>,
        }

        let envelope = Envelope::deserialize(deserializer)?;
        let provider = match envelope.provider.to_lowercase().as_str() {
            "qwen" => AsrProvider::Qwen(envelope.qwen.unwrap_or_default()),
            "dashscope" => AsrProvider::DashScope(envelope.dashscope.unwrap_or_default()),
            "openaiwhisper" => {
                AsrProvider::OpenAiWhisper(envelope.openai_whisper.unwrap_or_default())
            }
            "funasr" => AsrProvider::FunAsr(envelope.funasr.unwrap_or_default()),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unknown asr provider: {other}"
                )))
            }
        };
        Ok(AsrConfig { provider })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QwenConfig {
    pub api_key: String,
    #[serde(default = "default_qwen_model")]
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_qwen_model() -> String {
    "qwen3-asr-flash-realtime".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParaformerConfig {
    pub api_key: String,
    #[serde(default = "default_paraformer_model")]
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_paraformer_model() -> String {
    "paraformer-realtime-v2".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WhisperConfig {
    pub api_key: String,
    #[serde(default = "default_whisper_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_whisper_endpoint() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FunAsrConfig {
    pub endpoint: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// The optional text-post-processing (LLM enhancer) selection.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProvider,
}

#[derive(Debug, Clone)]
pub enum LlmProvider {
    DashScope(DashScopeLlmConfig),
    OpenAi(OpenAiLlmConfig),
    Ollama(OllamaConfig),
}

impl<'de> Deserialize<'de> for LlmConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default)]
            enabled: bool,
            #[serde(default)]
            provider: Option<String>,
            #[serde(default)]
            dashscope: Option<DashScopeLlmConfig>,
            #[serde(default)]
            openai: Option<OpenAiLlmConfig>,
            #[serde(default)]
            ollama: Option<OllamaConfig>,
        }

        let envelope = Envelope::deserialize(deserializer)?;
        if !envelope.enabled {
            return Ok(LlmConfig {
                enabled: false,
                provider: LlmProvider::Ollama(OllamaConfig::default()),
            });
        }
        let provider_name = envelope
            .provider
            .ok_or_else(|| serde::de::Error::custom("llm.enabled is true but provider is missing"))?;
        let provider = match provider_name.to_lowercase().as_str() {
            "dashscope" => LlmProvider::DashScope(envelope.dashscope.unwrap_or_default()),
            "openai" => LlmProvider::OpenAi(envelope.openai.unwrap_or_default()),
            "ollama" => LlmProvider::Ollama(envelope.ollama.unwrap_or_default()),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unknown llm provider: {other}"
                )))
            }
        };
        Ok(LlmConfig {
            enabled: true,
            provider,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DashScopeLlmConfig {
    pub api_key: String,
    #[serde(default = "default_dashscope_llm_model")]
    pub model: String,
}

fn default_dashscope_llm_model() -> String {
    "qwen-plus".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OpenAiLlmConfig {
    pub api_key: String,
    #[serde(default = "default_openai_llm_model")]
    pub model: String,
}

fn default_openai_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_qwen_config() {
        let json = r#"{
            "asr": { "provider": "Qwen", "qwen": { "api_key": "sk-test" } }
        }"#;
        let config = Config::from_json(json).expect("should parse");
        match config.asr.provider {
            AsrProvider::Qwen(qwen) => {
                assert_eq!(qwen.api_key, "sk-test");
                assert_eq!(qwen.model, "qwen3-asr-flash-realtime");
            }
            _ => panic!("expected qwen provider"),
        }
        assert!(config.llm.is_none());
    }

    #[test]
    fn parses_llm_and_ignores_unknown_keys() {
        let json = r#"{
            "asr": { "provider": "OpenAIWhisper", "openaiwhisper": { "api_key": "sk-w" } },
            "llm": { "enabled": true, "provider": "OpenAI", "openai": { "api_key": "sk-l" } },
            "output": { "restore_clipboard": true, "paste_delay_ms": 50 },
            "future_field_the_core_does_not_know_about": 42
        }"#;
        let config = Config::from_json(json).expect("should parse");
        let llm = config.llm.expect("llm should be present");
        assert!(llm.enabled);
        match llm.provider {
            LlmProvider::OpenAi(cfg) => assert_eq!(cfg.api_key, "sk-l"),
            _ => panic!("expected openai provider"),
        }
    }

    #[test]
    fn rejects_unknown_provider() {
        let json = r#"{ "asr": { "provider": "Bogus" } }"#;
        assert!(Config::from_json(json).is_err());
    }
}

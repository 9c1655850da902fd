//! Builds the provider-polymorphic `RecognizerPort`/`EnhancerPort` trait
//! objects selected by a `Config`, mirroring the teacher's
//! `commands::config`/`commands::llm` provider-switch pattern (which
//! constructs `Box<dyn LlmServicePort>` from a `ServiceType` string).

use std::sync::Arc;

use crate::adapters::asr::{FunAsrRecognizer, ParaformerRecognizer, QwenRecognizer, WhisperRecognizer};
use crate::adapters::llm::{DashScopeEnhancer, OllamaEnhancer, OpenAiEnhancer};
use crate::domain::{AsrConfig, AsrProvider, LlmConfig, LlmProvider};
use crate::ports::{EnhancerPort, RecognizerPort};

pub fn build_recognizer(config: &AsrConfig) -> Arc<dyn RecognizerPort> {
    match &config.provider {
        AsrProvider::Qwen(cfg) => Arc::new(QwenRecognizer::new(cfg.clone())),
        AsrProvider::DashScope(cfg) => Arc::new(ParaformerRecognizer::new(cfg.clone())),
        AsrProvider::OpenAiWhisper(cfg) => Arc::new(WhisperRecognizer::new(cfg.clone())),
        AsrProvider::FunAsr(cfg) => Arc::new(FunAsrRecognizer::new(cfg.clone())),
    }
}

pub fn build_enhancer(config: &Option<LlmConfig>) -> Option<Arc<dyn EnhancerPort>> {
    let config = config.as_ref()?;
    if !config.enabled {
        return None;
    }
    let enhancer: Arc<dyn EnhancerPort> = match &config.provider {
        LlmProvider::DashScope(cfg) => Arc::new(DashScopeEnhancer::new(cfg.clone())),
        LlmProvider::OpenAi(cfg) => Arc::new(OpenAiEnhancer::new(cfg.clone())),
        LlmProvider::Ollama(cfg) => Arc::new(OllamaEnhancer::new(cfg.clone())),
    };
    Some(enhancer)
}

//! LLM enhancer adapters, mirroring the teacher's
//! `adapters/services/llm/{openai,groq,anthropic}.rs` chat-completion shape.

pub mod dashscope;
pub mod ollama;
pub mod openai;

pub use dashscope::DashScopeEnhancer;
pub use ollama::OllamaEnhancer;
pub use openai::OpenAiEnhancer;

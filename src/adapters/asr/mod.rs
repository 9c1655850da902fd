pub mod funasr;
pub mod paraformer;
pub mod qwen;
pub mod whisper;

pub use funasr::FunAsrRecognizer;
pub use paraformer::ParaformerRecognizer;
pub use qwen::QwenRecognizer;
pub use whisper::WhisperRecognizer;

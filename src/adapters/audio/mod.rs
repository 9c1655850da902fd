pub mod microphone;

pub use microphone::MicrophoneSource;

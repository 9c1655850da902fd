use async_trait::async_trait;

use crate::error::Result;

/// Single-shot text post-processor, applied only to Final text and only if
/// enabled. Failure is never fatal to the Pipeline — callers downgrade to
/// the un-enhanced text and log a warning.
#[async_trait]
pub trait EnhancerPort: Send + Sync {
    async fn enhance(&self, text: &str) -> Result<String>;

    fn provider_name(&self) -> &'static str;
}

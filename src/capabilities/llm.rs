use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::ConversationTurn;

/// Deployment-chosen cost/quality tier. The core never names a concrete
/// provider or model; mapping `fast`/`strong` to an actual model is the
/// capability implementation's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Strong,
}

#[async_trait]
pub trait LLM: Send + Sync {
    async fn complete(
        &self,
        tier: ModelTier,
        system: &str,
        messages: &[ConversationTurn],
        max_tokens: u32,
    ) -> CoreResult<String>;
}

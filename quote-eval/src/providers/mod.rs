//! Text-generation service clients

pub mod openai;
pub mod traits;

pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, OutputSchema, ProviderError,
    ProviderResult,
};

use crate::config::JudgeSection;
use std::sync::Arc;

/// Apply judge settings to an OpenAI client
fn configure_openai(client: OpenAIClient, section: &JudgeSection) -> OpenAIClient {
    client
        .with_base_url(&section.base_url)
        .with_rate_limits(section.rpm, section.tpm)
        .with_model(&section.model)
        .with_reasoning_effort(section.reasoning_effort.as_str())
}

/// Create the provider backing the semantic judge, reading the API key from
/// the configured environment variable
pub fn create_judge_provider(section: &JudgeSection) -> ProviderResult<Arc<dyn LLMProvider>> {
    let client = OpenAIClient::from_env_var(&section.api_key_env)?;
    Ok(Arc::new(configure_openai(client, section)))
}

//! LLM-based semantic matching of quote sets
//!
//! The judge asks a text-generation service for the fraction of ground-truth
//! quotes matched by the system response (recall) and the fraction of system
//! quotes matched by the ground truth (precision). A call is attempted once;
//! failures surface to the caller untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::JudgeVerdict;
use crate::providers::{CompletionRequest, LLMProvider, Message, ProviderError};

/// Reasoning effort requested from reasoning models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recognized judge options
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeConfig {
    pub model: String,
    pub reasoning_effort: ReasoningEffort,
    /// Only `0` is accepted
    pub max_retries: u32,
    pub max_output_tokens: u32,
    pub timeout_ms: Option<u64>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: "o4-mini".to_string(),
            reasoning_effort: ReasoningEffort::Medium,
            max_retries: 0,
            max_output_tokens: 4096,
            timeout_ms: None,
        }
    }
}

/// Judge failures. Each one marks the sample as errored.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Unparseable verdict: {0}")]
    Parse(String),

    #[error("Non-finite {field} in verdict")]
    NonFinite { field: &'static str },

    #[error("Judge configuration error: {0}")]
    Config(String),
}

/// Recall/precision estimator for a pair of quote texts
#[async_trait]
pub trait QuoteJudge: Send + Sync {
    /// Judge one (ground truth, system response) pair
    async fn judge(
        &self,
        ground_truth: &str,
        system_response: &str,
    ) -> Result<JudgeVerdict, JudgeError>;

    /// System and user prompt sent for the pair
    fn render_prompt(&self, ground_truth: &str, system_response: &str) -> (String, String);
}

/// Judge backed by a text-generation service
pub struct SemanticJudge {
    provider: Arc<dyn LLMProvider>,
    config: JudgeConfig,
}

impl SemanticJudge {
    pub fn new(provider: Arc<dyn LLMProvider>, config: JudgeConfig) -> Result<Self, JudgeError> {
        if config.max_retries != 0 {
            return Err(JudgeError::Config(format!(
                "max_retries must be 0, got {}",
                config.max_retries
            )));
        }
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    fn request(&self, ground_truth: &str, system_response: &str) -> CompletionRequest {
        let (system, user) = self.render_prompt(ground_truth, system_response);
        CompletionRequest::new(vec![Message::user(user)], self.config.max_output_tokens)
            .with_model(&self.config.model)
            .with_system(system)
            .with_temperature(0.0)
            .with_output_schema("quote_match_verdict", verdict_schema())
    }
}

#[async_trait]
impl QuoteJudge for SemanticJudge {
    async fn judge(
        &self,
        ground_truth: &str,
        system_response: &str,
    ) -> Result<JudgeVerdict, JudgeError> {
        let request = self.request(ground_truth, system_response);

        let response = match self.config.timeout_ms {
            Some(timeout_ms) => tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.provider.complete(&request),
            )
            .await
            .map_err(|_| ProviderError::Timeout { timeout_ms })??,
            None => self.provider.complete(&request).await?,
        };

        tracing::debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            latency_ms = response.latency_ms,
            "judge verdict received"
        );

        parse_verdict(&response.content)
    }

    fn render_prompt(&self, ground_truth: &str, system_response: &str) -> (String, String) {
        (JUDGE_SYSTEM_PROMPT.to_string(), render_user_prompt(ground_truth, system_response))
    }
}

fn render_user_prompt(ground_truth: &str, system_response: &str) -> String {
    format!(
        "**Ground Truth Quotes:**\n{}\n\n**System Response Quotes:**\n{}\n",
        ground_truth, system_response
    )
}

/// Schema of the structured verdict
pub fn verdict_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "recall": {
                "type": "number",
                "description": "Fraction (0.0 to 1.0) of ground truth quotes with a matching system quote"
            },
            "precision": {
                "type": "number",
                "description": "Fraction (0.0 to 1.0) of system quotes with a matching ground truth quote"
            }
        },
        "required": ["recall", "precision"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct RawVerdict {
    recall: f64,
    precision: f64,
}

/// Parse a verdict from the service's reply
pub fn parse_verdict(content: &str) -> Result<JudgeVerdict, JudgeError> {
    let json = extract_json(content)
        .ok_or_else(|| JudgeError::Parse(format!("no JSON object in reply: {}", content)))?;
    let raw: RawVerdict = serde_json::from_str(json)
        .map_err(|e| JudgeError::Parse(format!("{}: {}", e, json)))?;

    if !raw.recall.is_finite() {
        return Err(JudgeError::NonFinite { field: "recall" });
    }
    if !raw.precision.is_finite() {
        return Err(JudgeError::NonFinite { field: "precision" });
    }
    Ok(JudgeVerdict::new(raw.recall, raw.precision))
}

/// Outermost `{ ... }` span of a reply that may carry code fences or prose
fn extract_json(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

const JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert evaluator that compares two sets of quotes and calculates semantic recall and precision.

Use the SAME matching rule for both metrics: two quotes match if they convey the same main information, even if wording differs.
Matching is symmetric: if quote A matches quote B, then B matches A.

- Recall: Fraction (0.0 to 1.0) of ground truth quotes that have at least one matching quote in the system response
- Precision: Fraction (0.0 to 1.0) of system response quotes that have at least one matching quote in the ground truth

IMPORTANT: If recall > 0, then precision must also be > 0 (a matched ground truth quote implies a matching system quote).
If the system response is empty or has no valid quotes, precision = 0 and recall = 0 (if ground truth has quotes) or 1 (if ground truth is empty).
If ground truth is empty, recall = 1 and precision = 0.

Respond with JSON only: {"recall": <number>, "precision": <number>}"#;

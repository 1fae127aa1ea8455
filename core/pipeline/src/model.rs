use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use transcript_analyzer_schemas::AnalysisKind;

use crate::error::ModelError;

/// Configuration for the model gateway (OpenAI-compatible chat completions).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timeout_secs = std::env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Self {
            base_url: std::env::var("GATEWAY_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("GATEWAY_API_KEY").ok(),
            model: std::env::var("GATEWAY_MODEL").unwrap_or(defaults.model),
            timeout_secs,
        }
    }
}

/// The seam between the pipeline and the model provider. One request, one
/// response; the returned text is persisted verbatim and parsed lazily.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, kind: AnalysisKind, transcript: &str) -> Result<String, ModelError>;
}

/// HTTP client for the model gateway.
pub struct GatewayClient {
    config: GatewayConfig,
    client: Client,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ModelInvoker for GatewayClient {
    async fn invoke(&self, kind: AnalysisKind, transcript: &str) -> Result<String, ModelError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let request_body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt(kind) },
                { "role": "user", "content": format!("Analyze this conversation transcript:\n\n{transcript}") }
            ],
        });

        debug!("Calling model gateway at {} for {} analysis", url, kind);

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(ref api_key) = self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ModelError::RateLimited,
                402 => ModelError::QuotaExhausted,
                code => ModelError::Status { status: code, body },
            });
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<ChatChoice>,
        }

        #[derive(Deserialize)]
        struct ChatChoice {
            message: ChatMessage,
        }

        #[derive(Deserialize)]
        struct ChatMessage {
            content: String,
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ModelError::EmptyResponse)
    }
}

/// Fixed system instruction per analysis kind.
pub fn system_prompt(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::Memory => MEMORY_PROMPT,
        AnalysisKind::Language => LANGUAGE_PROMPT,
    }
}

const MEMORY_PROMPT: &str = r#"You are an event extraction engine, not a summarizer.

Extract durable, continuity-relevant state changes from the conversation so a future session can feel like a natural continuation. If nothing meaningful changed, return an empty list.

Allowed values for "type" (strict): goal, decision, preference, belief, constraint, plan, question, insight, emotion. Discard anything that does not fit.

Every event must match this schema exactly:
{
  "event_id": "uuid",
  "type": "event_type",
  "actor": "user | assistant | system | other",
  "subject": "short noun phrase",
  "content": "clear, canonical statement of the durable change",
  "status": "asserted | tentative | resolved | unresolved",
  "evidence": [ { "kind": "quote", "ref": ["exact verbatim quote"] } ],
  "timestamp": "iso8601"
}

Evidence quotes must be verbatim text copied exactly from the conversation; omit the evidence field rather than paraphrase. Never fabricate evidence.

Do not extract momentary moods, one-off logistics, or transient small talk. Favor preferences and beliefs when in doubt. A plan requires explicit commitment or concrete specifics; otherwise downgrade it to a preference or belief. Merge redundant events about the same actor and topic into one canonical event.

Return only a JSON array. No explanations, no markdown, no comments. If no events exist, return: []"#;

const LANGUAGE_PROMPT: &str = r#"You are a linguistic analyst scoring conversational language quality.

Score the speaker's language along three dimensions plus an overall score, each an integer from 1 (needs work) to 3 (strong): clarity, range, flow.

Catalog every language mistake you find. Allowed values for "category": articles, prepositions, pronouns, tense, nouns, word_order, word_form, determiners, verb_form, verb_agreement, adjectives, adverbs, particles, plurals, conjunctions, vocabulary, other.

Return only a JSON object with this exact shape:
{
  "scores": { "clarity": 1-3, "range": 1-3, "flow": 1-3, "overall": 1-3 },
  "mistakes": [
    { "category": "category", "description": "what is wrong", "quote": "verbatim original", "correction": "corrected version" }
  ],
  "dimension_evidence": {
    "clarity": ["verbatim quote"],
    "range": ["verbatim quote"],
    "flow": ["verbatim quote"]
  }
}

Quotes must be verbatim from the transcript. No explanations, no markdown, no comments."#;

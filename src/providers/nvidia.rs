//! NVIDIA backend speaking the OpenAI-compatible chat completions API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Generation, GenerationRequest, Provider, ProviderError, ProviderId, PROVIDER_TIMEOUT};
use crate::config::{ApiKey, ProviderConfig};
use crate::router::Tier;

const DEFAULT_FAST_MODEL: &str = "nvidia/nemotron-3-nano-30b-a3b";
const DEFAULT_DEEP_MODEL: &str = "nvidia/llama-3.1-nemotron-70b-instruct";

const TEMPERATURE: f32 = 0.7;

pub struct NvidiaProvider {
    url: String,
    api_key: Option<ApiKey>,
    fast_model: String,
    deep_model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

impl NvidiaProvider {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            fast_model: config
                .fast_model
                .clone()
                .unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string()),
            deep_model: config
                .deep_model
                .clone()
                .unwrap_or_else(|| DEFAULT_DEEP_MODEL.to_string()),
            client,
        }
    }

    fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Fast => &self.fast_model,
            Tier::Deep => &self.deep_model,
        }
    }
}

#[async_trait]
impl Provider for NvidiaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Nvidia
    }

    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<Generation, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::MissingCredentials)?;

        let model = self.model_for(request.tier);
        let endpoint = format!("{}/chat/completions", self.url);

        let body = ChatCompletionBody {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .timeout(PROVIDER_TIMEOUT)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), error_body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Malformed(
                "empty generation in response".to_string(),
            ));
        }

        let (tokens_input, tokens_output) = match parsed.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (None, None),
        };

        Ok(Generation {
            text,
            model: model.to_string(),
            tokens_input,
            tokens_output,
        })
    }
}

//! Gemini backend speaking the native generateContent API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Generation, GenerationRequest, Provider, ProviderError, ProviderId, PROVIDER_TIMEOUT};
use crate::config::{ApiKey, ProviderConfig};
use crate::router::Tier;

const DEFAULT_FAST_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_DEEP_MODEL: &str = "gemini-2.0-pro-exp-02-05";

/// Hardcoded sampling temperature; per-version overrides are a later concern.
const TEMPERATURE: f32 = 0.7;

pub struct GeminiProvider {
    url: String,
    api_key: Option<ApiKey>,
    fast_model: String,
    deep_model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateContentBody<'a> {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

impl GeminiProvider {
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
impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
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
        let endpoint = format!("{}/v1beta/models/{}:generateContent", self.url, model);

        let body = GenerateContentBody {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system_prompt,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let response = self
            .client
            .post(&endpoint)
            .header("x-goog-api-key", api_key.expose_secret())
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

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let text: String = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Malformed(
                "empty generation in response".to_string(),
            ));
        }

        let (tokens_input, tokens_output) = match parsed.usage_metadata {
            Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
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

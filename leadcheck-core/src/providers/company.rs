use std::{fmt, time::Duration};

use async_trait::async_trait;
use leadcheck_model::{CompanyVerdict, TokenUsage};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

use super::{ensure_success, http_client};

pub const PERPLEXITY_DEFAULT_API_URL: &str =
    "https://api.perplexity.ai/chat/completions";

pub const INVALID_RESPONSE_REASONING: &str =
    "Invalid response format from company checker";

static VERDICT_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\{[^}]*"valid"[^}]*"reasoning"[^}]*\}"#)
        .expect("verdict object pattern is valid")
});

/// Checks a company against free-text requirements.
#[async_trait]
pub trait CompanyProvider: Send + Sync {
    async fn check(
        &self,
        company: &str,
        requirements: &str,
    ) -> Result<CompanyVerdict>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: PERPLEXITY_DEFAULT_API_URL.to_string(),
            model: "sonar".to_string(),
            max_tokens: 123,
            request_timeout_ms: 60_000,
        }
    }
}

/// Chat-completion client that asks a search-backed model for a verdict.
#[derive(Clone)]
pub struct ReasoningClient {
    http: reqwest::Client,
    settings: ReasoningSettings,
}

impl fmt::Debug for ReasoningClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningClient")
            .field("api_url", &self.settings.api_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    search_recency_filter: &'a str,
    return_images: bool,
    return_related_questions: bool,
    stream: bool,
    frequency_penalty: f32,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: TokenUsage,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ChatContent {
    content: String,
}

impl ReasoningClient {
    pub fn new(settings: ReasoningSettings) -> Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_millis(
                settings.request_timeout_ms,
            ))?,
            settings,
        })
    }

    fn request<'a>(
        &'a self,
        company: &str,
        requirements: &str,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "Be precise and concise.".to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: company_prompt(company, requirements),
                },
            ],
            max_tokens: self.settings.max_tokens,
            temperature: 0.0,
            top_p: 0.9,
            search_recency_filter: "year",
            return_images: false,
            return_related_questions: false,
            stream: false,
            frequency_penalty: 1.0,
        }
    }
}

#[async_trait]
impl CompanyProvider for ReasoningClient {
    async fn check(
        &self,
        company: &str,
        requirements: &str,
    ) -> Result<CompanyVerdict> {
        debug!(company, "calling company checker");
        let response = self
            .http
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.request(company, requirements))
            .send()
            .await?;
        ensure_success(&response)?;

        let body = response.text().await?;
        let parsed: ChatResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "company checker returned an unparseable body");
                return Ok(CompanyVerdict::rejected(INVALID_RESPONSE_REASONING));
            }
        };

        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default();

        match extract_verdict(content) {
            Some((valid, reasoning)) => Ok(CompanyVerdict {
                valid,
                reasoning,
                usage: parsed.usage,
                cached: false,
            }),
            None => {
                warn!(content, "company checker answer did not contain a verdict");
                Ok(CompanyVerdict::rejected(INVALID_RESPONSE_REASONING))
            }
        }
    }
}

pub fn company_prompt(company: &str, requirements: &str) -> String {
    format!(
        "Does company {company} meet the following requirements: \
         {requirements}? Return JSON format WITHOUT MARKDOWN containing: \
         {{ \"valid\": boolean, \"reasoning\": \"concise explanation based \
         on verifiable facts\" }}"
    )
}

/// Pulls `{valid, reasoning}` out of a model answer: the whole content as
/// JSON first, then the first object mentioning both keys.
pub fn extract_verdict(content: &str) -> Option<(bool, String)> {
    if let Ok(value) = serde_json::from_str::<Value>(content.trim()) {
        if let Some(verdict) = verdict_fields(&value) {
            return Some(verdict);
        }
    }

    let found = VERDICT_OBJECT.find(content)?;
    let value = serde_json::from_str::<Value>(found.as_str()).ok()?;
    verdict_fields(&value)
}

fn verdict_fields(value: &Value) -> Option<(bool, String)> {
    let valid = value.get("valid")?.as_bool()?;
    let reasoning = value.get("reasoning")?.as_str()?;
    Some((valid, reasoning.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_json() {
        let content = r#"{"valid": true, "reasoning": "Sells B2B software"}"#;
        assert_eq!(
            extract_verdict(content),
            Some((true, "Sells B2B software".to_string()))
        );
    }

    #[test]
    fn extracts_object_embedded_in_prose() {
        let content = "Sure! Here you go:\n```json\n{\"valid\": false,\n \"reasoning\": \"Only 12 employees\"}\n```";
        assert_eq!(
            extract_verdict(content),
            Some((false, "Only 12 employees".to_string()))
        );
    }

    #[test]
    fn wrong_types_do_not_count_as_a_verdict() {
        assert_eq!(
            extract_verdict(r#"{"valid": "yes", "reasoning": "because"}"#),
            None
        );
        assert_eq!(extract_verdict("I could not find that company."), None);
    }

    #[test]
    fn prompt_names_company_and_requirements() {
        let prompt = company_prompt("acme.io", "B2B SaaS");
        assert!(prompt.starts_with("Does company acme.io meet"));
        assert!(prompt.contains("B2B SaaS?"));
        assert!(prompt.contains("\"reasoning\""));
    }
}

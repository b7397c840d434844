use std::{fmt, time::Duration};

use async_trait::async_trait;
use leadcheck_model::{EmailRouting, EmailStatus, EmailVerdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{LeadError, Result};

use super::{ensure_success, http_client};

pub const LEADMAGIC_DEFAULT_BASE_URL: &str = "https://api.leadmagic.io";

/// Inputs for resolving an address from a person and their company domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub domain: String,
}

/// Email verification and finding provider.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn verify(&self, email: &str) -> Result<EmailVerdict>;

    async fn find(&self, request: &FindRequest) -> Result<EmailVerdict>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadMagicSettings {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for LeadMagicSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: LEADMAGIC_DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// HTTP client for the LeadMagic email endpoints.
#[derive(Clone)]
pub struct LeadMagicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: Url,
}

impl fmt::Debug for LeadMagicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeadMagicClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl LeadMagicClient {
    pub fn new(settings: &LeadMagicSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url).map_err(|err| {
            LeadError::InvalidInput(format!(
                "invalid LeadMagic base url {}: {err}",
                settings.base_url
            ))
        })?;
        Ok(Self {
            http: http_client(Duration::from_millis(
                settings.request_timeout_ms,
            ))?,
            api_key: settings.api_key.clone(),
            base_url,
        })
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value> {
        let url = self.base_url.join(path).map_err(|err| {
            LeadError::Internal(format!("failed to build url for {path}: {err}"))
        })?;

        debug!(url = %url, "calling email provider");
        let response = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await?;
        ensure_success(&response)?;

        let text = response.text().await?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "email provider returned a non-JSON body");
                Ok(Value::Null)
            }
        }
    }
}

#[async_trait]
impl EmailProvider for LeadMagicClient {
    async fn verify(&self, email: &str) -> Result<EmailVerdict> {
        #[derive(Serialize)]
        struct VerifyBody<'a> {
            email: &'a str,
        }

        let payload = self.post("email-validate", &VerifyBody { email }).await?;
        Ok(parse_email_payload(payload))
    }

    async fn find(&self, request: &FindRequest) -> Result<EmailVerdict> {
        let payload = self.post("email-finder", request).await?;
        Ok(parse_email_payload(payload))
    }
}

#[derive(Deserialize)]
struct ProviderPayload {
    email_status: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    mx_provider: Option<String>,
    #[serde(default)]
    mx_record: Option<String>,
    #[serde(default)]
    mx_security_gateway: Option<bool>,
    #[serde(default)]
    is_domain_catch_all: Option<bool>,
    #[serde(default)]
    credits_consumed: Option<f64>,
}

/// Normalizes a provider body. Anything without an `email_status` is an
/// `unknown` verdict rather than an error.
pub fn parse_email_payload(payload: Value) -> EmailVerdict {
    let parsed = match serde_json::from_value::<ProviderPayload>(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            return EmailVerdict::rejected(
                EmailStatus::Unknown,
                format!("Unexpected response from email provider: {err}"),
            );
        }
    };

    let Some(status) = parsed.email_status else {
        return EmailVerdict::rejected(
            EmailStatus::Unknown,
            "Email provider response did not include email_status",
        );
    };

    EmailVerdict {
        status: EmailStatus::from(status),
        email: parsed.email,
        reason: parsed.message,
        routing: EmailRouting {
            domain: parsed.domain,
            mx_provider: parsed.mx_provider,
            mx_record: parsed.mx_record,
            mx_security_gateway: parsed.mx_security_gateway,
            is_domain_catch_all: parsed.is_domain_catch_all,
        },
        credits_consumed: parsed.credits_consumed,
        cached: false,
    }
}

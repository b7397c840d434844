use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Logical cache table a key belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    EmailValidation,
    EmailFinding,
    CompanyValidation,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::EmailValidation => "email_validation",
            CacheNamespace::EmailFinding => "email_finding",
            CacheNamespace::CompanyValidation => "company_validation",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            CacheNamespace::EmailValidation => "email_validation_cache",
            CacheNamespace::EmailFinding => "email_finding_cache",
            CacheNamespace::CompanyValidation => "company_validation_cache",
        }
    }
}

/// Deterministic fingerprint of a validator input.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: CacheNamespace,
    pub fingerprint: String,
}

impl CacheKey {
    /// Verification results are keyed by the normalized address.
    pub fn email_validation(email: &str) -> Self {
        Self {
            namespace: CacheNamespace::EmailValidation,
            fingerprint: digest(&[&normalize_text(email)]),
        }
    }

    /// Finding results are keyed by first + last + company + domain.
    pub fn email_finding(
        first_name: &str,
        last_name: &str,
        company_name: Option<&str>,
        domain: &str,
    ) -> Self {
        Self {
            namespace: CacheNamespace::EmailFinding,
            fingerprint: digest(&[
                &normalize_text(first_name),
                &normalize_text(last_name),
                &normalize_text(company_name.unwrap_or_default()),
                &normalize_website(domain),
            ]),
        }
    }

    /// Company checks are keyed by website plus a digest of the requirement
    /// text, never the text itself.
    pub fn company_validation(website: &str, requirement: &str) -> Self {
        let requirement_digest = digest(&[requirement.trim()]);
        Self {
            namespace: CacheNamespace::CompanyValidation,
            fingerprint: digest(&[
                &normalize_website(website),
                &requirement_digest,
            ]),
        }
    }

    /// Flat key used by stores without a per-namespace table.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.namespace.as_str(), self.fingerprint)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

fn normalize_text(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Reduce a website or domain to `host[/path]` without scheme, `www.` or
/// trailing slash so incidental formatting never splits cache entries.
pub fn normalize_website(raw: &str) -> String {
    let trimmed = raw.trim().to_lowercase();
    let candidate = if trimmed.contains("://") {
        trimmed.clone()
    } else {
        format!("https://{trimmed}")
    };

    match Url::parse(&candidate) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let host = host.strip_prefix("www.").unwrap_or(host);
            let path = url.path().trim_end_matches('/');
            format!("{host}{path}")
        }
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn website_formatting_does_not_change_the_key() {
        let a = CacheKey::company_validation("https://www.Acme.io/", "SaaS");
        let b = CacheKey::company_validation("acme.io", "SaaS");
        assert_eq!(a, b);
    }

    #[test]
    fn requirement_text_changes_the_key() {
        let a = CacheKey::company_validation("acme.io", "SaaS, >50 staff");
        let b = CacheKey::company_validation("acme.io", "SaaS, >500 staff");
        assert_ne!(a, b);
    }

    #[test]
    fn keys_stay_bounded_for_long_requirements() {
        let requirement = "must sell to enterprises ".repeat(400);
        let key = CacheKey::company_validation("acme.io", &requirement);
        assert_eq!(key.fingerprint.len(), 64);
    }

    #[test]
    fn email_key_ignores_case_and_whitespace() {
        assert_eq!(
            CacheKey::email_validation(" Jane@Acme.io "),
            CacheKey::email_validation("jane@acme.io")
        );
    }

    #[test]
    fn finding_key_separates_fields() {
        let a = CacheKey::email_finding("ann", "alee", None, "acme.io");
        let b = CacheKey::email_finding("anna", "lee", None, "acme.io");
        assert_ne!(a, b);
        assert_eq!(a.namespace, CacheNamespace::EmailFinding);
    }
}

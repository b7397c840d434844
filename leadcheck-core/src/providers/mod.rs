//! Adapters for the external validators.
//!
//! Each adapter normalizes the provider's response into a model verdict.
//! Transport failures and non-2xx responses surface as transient
//! [`LeadError`](crate::error::LeadError)s so the calling step retries them;
//! a response that arrives but breaks the expected shape becomes a negative
//! verdict instead of an error.

pub mod company;
pub mod email;

pub use company::*;
pub use email::*;

use std::time::Duration;

use crate::error::{LeadError, Result};

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("leadcheck/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(LeadError::from)
}

/// Maps a non-success status into the transient error the retry policy
/// understands.
pub(crate) fn ensure_success(
    response: &reqwest::Response,
) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(LeadError::HttpStatus {
        status,
        url: response.url().to_string(),
    })
}

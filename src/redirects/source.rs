//! CMS redirect feed.
//!
//! The CMS exposes the full redirect list plus an `isUpToDate` flag that
//! reports whether anything changed since the caller's `since` cursor. Only
//! the rebuild path talks to it; request handling never does.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CmsConfig;

/// Errors talking to the CMS redirect endpoint.
#[derive(Error, Debug)]
pub enum CmsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid redirect feed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A rule as the CMS delivers it, before origin normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRedirect {
    pub id: u64,
    pub origin_url: String,
    pub destination_url: String,
    #[serde(default)]
    pub status_code: u16,
}

/// Response of one redirect fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectFeed {
    /// Nothing changed since the cursor; `redirects` may be empty.
    #[serde(default)]
    pub is_up_to_date: bool,
    #[serde(default)]
    pub redirects: Vec<RawRedirect>,
    /// CMS clock at the time of the answer; becomes the next `since` cursor.
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
}

/// Source of the full redirect list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RedirectSource: Send + Sync {
    /// Fetch the redirect list; `since` is the last successful access.
    async fn fetch_redirects(&self, since: Option<DateTime<Utc>>)
        -> Result<RedirectFeed, CmsError>;
}

/// `reqwest`-backed CMS client.
pub struct HttpRedirectSource {
    config: CmsConfig,
}

impl HttpRedirectSource {
    pub fn new(config: CmsConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.path
        )
    }
}

#[async_trait]
impl RedirectSource for HttpRedirectSource {
    async fn fetch_redirects(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<RedirectFeed, CmsError> {
        // The refresh scheduler and the admin endpoint run on different
        // runtimes, so the client (and its pool) is built per fetch.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;

        let mut request = client.get(self.endpoint());
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        if let Some(api_key) = &self.config.api_key {
            request = request.header(self.config.api_key_header.as_str(), api_key.as_str());
        }

        tracing::debug!(
            endpoint = %self.endpoint(),
            since = ?since,
            "Fetching redirect feed from CMS"
        );

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CmsError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

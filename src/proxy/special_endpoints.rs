// Special endpoint handlers for the proxy's own `/_edge/` routes.
//
// Handlers return an `EndpointResponse` and never touch the session, so the
// Pingora adapter stays a thin writer and everything here is unit tested.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Instant;

use crate::constants::ADMIN_PREFIX;
use crate::metrics::Metrics;
use crate::redirects::{RebuildOutcome, RebuildReport, RedirectIndex};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the CMS webhook signature
pub const SIGNATURE_HEADER: &str = "x-edge-signature";

/// Response returned by a special endpoint handler.
#[derive(Debug)]
pub struct EndpointResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl EndpointResponse {
    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    pub fn prometheus(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body,
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({
            "status": "error",
            "message": message,
        })
        .to_string();
        Self::json(status, body)
    }
}

/// Admin routes served by the proxy itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRoute {
    Health,
    Metrics,
    Rebuild { force: bool },
    /// Known prefix, unknown route or wrong method
    NotFound,
}

impl AdminRoute {
    /// Match a request against the admin routes; `None` means the request
    /// belongs to the routing pipeline.
    pub fn classify(method: &str, path: &str, query: Option<&str>) -> Option<Self> {
        let rest = path.strip_prefix(ADMIN_PREFIX)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }

        let route = match (method, rest) {
            ("GET", "/health") => AdminRoute::Health,
            ("GET", "/metrics") => AdminRoute::Metrics,
            ("POST", "/redirects/rebuild") => AdminRoute::Rebuild {
                force: force_requested(query),
            },
            _ => AdminRoute::NotFound,
        };
        Some(route)
    }
}

fn force_requested(query: Option<&str>) -> bool {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .any(|pair| matches!(pair, "force" | "force=true" | "force=1"))
}

/// Generate response for `/_edge/health`.
///
/// Returns JSON with status, uptime, version, and the state of the live
/// redirect index.
pub fn handle_health(start_time: Instant, index: &RedirectIndex) -> EndpointResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "redirects": {
            "items": index.snapshot.len(),
            "last_access_date": index.snapshot.last_access_date.to_rfc3339(),
            "filter_loaded": index.has_filter(),
            "filter_in_sync": index.in_sync,
        },
    })
    .to_string();

    EndpointResponse::json(200, body)
}

/// Generate response for `/_edge/metrics`.
pub fn handle_metrics(metrics: &Metrics) -> EndpointResponse {
    EndpointResponse::prometheus(metrics.export_prometheus())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAuthError {
    /// No webhook secret is configured, so the endpoint is disabled
    Disabled,
    MissingSignature,
    MalformedSignature,
    BadSignature,
}

impl WebhookAuthError {
    pub fn status(&self) -> u16 {
        match self {
            WebhookAuthError::Disabled => 403,
            _ => 401,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            WebhookAuthError::Disabled => "Webhook rebuild is not enabled",
            WebhookAuthError::MissingSignature => "Missing webhook signature",
            WebhookAuthError::MalformedSignature => "Malformed webhook signature",
            WebhookAuthError::BadSignature => "Invalid webhook signature",
        }
    }

    pub fn into_response(self) -> EndpointResponse {
        EndpointResponse::error(self.status(), self.message())
    }
}

/// Verify a `sha256=<hex>` HMAC-SHA256 signature over the request body.
///
/// The comparison is constant time (`Mac::verify_slice`).
pub fn verify_webhook_signature(
    secret: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookAuthError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(WebhookAuthError::Disabled)?;
    let signature = signature.ok_or(WebhookAuthError::MissingSignature)?;

    let hex_digest = signature
        .trim()
        .strip_prefix("sha256=")
        .ok_or(WebhookAuthError::MalformedSignature)?;
    let expected = hex::decode(hex_digest).map_err(|_| WebhookAuthError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookAuthError::MalformedSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookAuthError::BadSignature)
}

/// Generate response for a finished rebuild.
///
/// A failed rebuild answers 502: the CMS (or storage) let us down, the
/// previous index is still serving.
pub fn handle_rebuild_report(report: &RebuildReport) -> EndpointResponse {
    let status = match report.outcome {
        RebuildOutcome::Refreshed | RebuildOutcome::Unchanged => 200,
        RebuildOutcome::Failed => 502,
    };
    match serde_json::to_string(report) {
        Ok(body) => EndpointResponse::json(status, body),
        Err(e) => EndpointResponse::error(500, &e.to_string()),
    }
}

pub fn handle_not_found() -> EndpointResponse {
    EndpointResponse::error(404, "Not found")
}

// Proxy module - Pingora ProxyHttp implementation
// Runs the routing pipeline in front of the rendering origin

use async_trait::async_trait;
use bytes::BytesMut;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::metrics::Metrics;
use crate::redirects::RedirectService;
use crate::routing::{EdgeRequest, EdgeRouter, RouteDecision};

pub mod context;
pub mod special_endpoints;
pub mod upstream;

pub use context::EdgeContext;
use special_endpoints::{AdminRoute, EndpointResponse, SIGNATURE_HEADER};
use upstream::{forward_headers, UpstreamPeerConfig};

/// Largest webhook body accepted by the rebuild endpoint
const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

/// Header carrying the per-request ID to the origin
const REQUEST_ID_HEADER: &str = "x-edge-request-id";

/// Header carrying the browser-facing target of a rewritten request
const REWRITTEN_FROM_HEADER: &str = "x-edge-rewritten-from";

/// EdgeProxy implements the Pingora ProxyHttp trait.
/// Answers redirects itself and forwards everything else to the origin,
/// rewritten when the router says so.
pub struct EdgeProxy {
    router: EdgeRouter,
    service: Arc<RedirectService>,
    metrics: Arc<Metrics>,
    upstream: UpstreamPeerConfig,
    webhook_secret: Option<String>,
    /// Proxy start time (for uptime in the health endpoint)
    start_time: Instant,
}

impl EdgeProxy {
    pub fn new(
        config: &Config,
        router: EdgeRouter,
        service: Arc<RedirectService>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            router,
            service,
            metrics,
            upstream: UpstreamPeerConfig::from_origin(&config.origin),
            webhook_secret: config.redirects.webhook_secret.clone(),
            start_time: Instant::now(),
        }
    }

    pub fn router(&self) -> &EdgeRouter {
        &self.router
    }

    async fn write_endpoint_response(
        &self,
        session: &mut Session,
        response: EndpointResponse,
    ) -> Result<()> {
        let mut header = ResponseHeader::build(response.status, None)?;
        header.insert_header("Content-Type", response.content_type)?;
        header.insert_header("Content-Length", response.body.len().to_string())?;
        header.insert_header("Cache-Control", "no-store")?;

        session
            .write_response_header(Box::new(header), false)
            .await?;
        session
            .write_response_body(Some(response.body.into()), true)
            .await?;
        Ok(())
    }

    async fn write_redirect(
        &self,
        session: &mut Session,
        location: &str,
        status: u16,
        cache_control: Option<&str>,
    ) -> Result<()> {
        let mut header = ResponseHeader::build(status, None)?;
        header.insert_header("Location", location)?;
        if let Some(cache_control) = cache_control {
            header.insert_header("Cache-Control", cache_control)?;
        }
        header.insert_header("Content-Length", "0")?;

        session
            .write_response_header(Box::new(header), true)
            .await?;
        Ok(())
    }

    /// Read the request body, giving up once it exceeds `limit`.
    async fn read_body(session: &mut Session, limit: usize) -> Result<Option<BytesMut>> {
        let mut body = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            if body.len() + chunk.len() > limit {
                return Ok(None);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(Some(body))
    }

    async fn handle_admin(
        &self,
        session: &mut Session,
        route: AdminRoute,
        ctx: &EdgeContext,
    ) -> Result<EndpointResponse> {
        let response = match route {
            AdminRoute::Health => {
                special_endpoints::handle_health(self.start_time, &self.service.current())
            }
            AdminRoute::Metrics => special_endpoints::handle_metrics(&self.metrics),
            AdminRoute::NotFound => special_endpoints::handle_not_found(),
            AdminRoute::Rebuild { force } => {
                let signature = session
                    .req_header()
                    .headers
                    .get(SIGNATURE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                let body = match Self::read_body(session, MAX_WEBHOOK_BODY_BYTES).await? {
                    Some(body) => body,
                    None => {
                        return Ok(EndpointResponse::json(
                            413,
                            serde_json::json!({
                                "status": "error",
                                "message": "Webhook body too large",
                            })
                            .to_string(),
                        ))
                    }
                };

                if let Err(auth_error) = special_endpoints::verify_webhook_signature(
                    self.webhook_secret.as_deref(),
                    signature.as_deref(),
                    &body,
                ) {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = ?auth_error,
                        "Rejected redirect rebuild webhook"
                    );
                    return Ok(auth_error.into_response());
                }

                tracing::info!(
                    request_id = %ctx.request_id(),
                    force = force,
                    "Redirect rebuild requested by webhook"
                );
                let report = self.service.rebuild(force).await;
                special_endpoints::handle_rebuild_report(&report)
            }
        };
        Ok(response)
    }
}

#[async_trait]
impl ProxyHttp for EdgeProxy {
    type CTX = EdgeContext;

    fn new_ctx(&self) -> Self::CTX {
        EdgeContext::new()
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        tracing::debug!(
            request_id = %ctx.request_id(),
            host = %self.upstream.host,
            port = self.upstream.port,
            "Forwarding to origin"
        );
        Ok(self.upstream.build_peer())
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        self.metrics.increment_request_count();

        let req = session.req_header();
        let method = req.method.as_str().to_string();
        let request = EdgeRequest::from_uri(&req.uri);
        ctx.set_request(&method, &request.path_and_query());

        if let Some(route) = AdminRoute::classify(&method, request.path(), request.query()) {
            ctx.set_decision(None, "admin");
            let response = self.handle_admin(session, route, ctx).await?;
            self.write_endpoint_response(session, response).await?;
            return Ok(true);
        }

        let routed = self.router.evaluate(&request);
        let kind = routed.decision.kind();
        ctx.set_decision(Some(routed.stage), kind);
        self.metrics.record_decision(kind, routed.stage.name());

        match routed.decision {
            RouteDecision::Redirect {
                location,
                status,
                cache_control,
            } => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    stage = routed.stage.name(),
                    status = status,
                    location = %location,
                    "Redirecting"
                );
                self.write_redirect(session, &location, status, cache_control.as_deref())
                    .await?;
                Ok(true)
            }
            decision @ RouteDecision::Rewrite { .. } => {
                if let Some(target) = decision.rewrite_target() {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        stage = routed.stage.name(),
                        target = %target,
                        "Rewriting request for origin"
                    );
                    ctx.set_rewrite_target(target);
                }
                Ok(false)
            }
            RouteDecision::PassThrough => Ok(false),
        }
    }

    async fn upstream_request_filter(
        &self,
        _session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(target) = ctx.rewrite_target() {
            let parsed_uri = target.parse().map_err(|e: http::uri::InvalidUri| {
                pingora_core::Error::explain(
                    pingora_core::ErrorType::InternalError,
                    format!("Invalid rewrite target: {}", e),
                )
            })?;
            upstream_request.set_uri(parsed_uri);
        }

        let headers = forward_headers(
            &self.upstream,
            ctx.request_id(),
            ctx.path(),
            ctx.rewrite_target(),
        );
        upstream_request.insert_header(http::header::HOST, headers.host)?;
        upstream_request.insert_header(REQUEST_ID_HEADER, headers.request_id)?;
        if let Some(original) = headers.rewritten_from {
            upstream_request.insert_header(REWRITTEN_FROM_HEADER, original)?;
        }

        Ok(())
    }

    /// Log request completion for metrics and debugging
    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let status_code = if let Some(resp) = session.response_written() {
            resp.status.as_u16()
        } else {
            500
        };
        self.metrics.increment_status_count(status_code);

        let stage = ctx.stage().map(|s| s.name()).unwrap_or("none");
        if let Some(error) = e {
            tracing::warn!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                path = %ctx.path(),
                stage = stage,
                decision = ctx.decision(),
                status = status_code,
                error = %error,
                "Request failed"
            );
        } else {
            tracing::info!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                path = %ctx.path(),
                stage = stage,
                decision = ctx.decision(),
                rewrite = ctx.rewrite_target().unwrap_or(""),
                status = status_code,
                duration_ms = ctx.elapsed_ms(),
                "Request completed"
            );
        }
    }
}

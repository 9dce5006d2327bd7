//! Edge routing pipeline.
//!
//! Every request is evaluated once against a fixed, ordered list of named
//! stages. A stage either passes control to the next one or ends the
//! pipeline with a [`RouteDecision`]:
//!
//! 1. Preview handshake (redirect)
//! 2. Preview exit (redirect)
//! 3. Content-ID routing (rewrite)
//! 4. Static asset bypass
//! 5. CMS redirect lookup (redirect)
//! 6. Internal route bypass (`/api`, `/_next`)
//! 7. Legacy `lang` query migration (redirect)
//! 8. Query smuggling (appends a segment, never terminal)
//! 9. Docs bypass
//! 10. Default-locale rewrite
//! 11. Smuggled-parameter rewrite
//! 12. Fallthrough
//!
//! The order is load-bearing: static assets must never reach the redirect
//! table, internal routes keep their query string, and docs routes must be
//! bypassed before locale rewriting.
//!
//! The pipeline is pure and synchronous. The redirect lookup reads an
//! in-memory index only.

pub mod request;

use std::sync::Arc;

pub use request::EdgeRequest;

use crate::config::{Config, RoutingConfig};
use crate::constants::TEMPORARY_REDIRECT_STATUS;
use crate::locale::{LocaleError, LocaleSet};
use crate::metrics::Metrics;
use crate::redirects::{Redirect, RedirectResolver};
use crate::smuggle::QueryCodec;

// ============================================================================
// Route Stages
// ============================================================================

/// Stages of the routing pipeline in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStage {
    /// Preview key present: start a CMS preview session.
    PreviewHandshake,
    /// Preview-off flag present: end the preview session.
    PreviewExit,
    /// Positive integer content ID: resolve the page dynamically.
    ContentId,
    /// Path names a file; skip the page pipeline.
    StaticAsset,
    /// CMS redirect table lookup.
    RedirectLookup,
    /// Framework and API routes; forwarded untouched.
    InternalBypass,
    /// `lang=` query from the pre-prefix URL scheme.
    LegacyLangQuery,
    /// Carry whitelisted query parameters in the path.
    QuerySmuggling,
    /// Documentation browser owns its routes.
    DocsBypass,
    /// Rewrite locale-less paths to the default locale.
    LocaleRewrite,
    /// Rewrite already-localized paths that gained a smuggled segment.
    SmuggledRewrite,
    /// Nothing matched.
    Fallthrough,
}

impl RouteStage {
    /// All stages in pipeline order.
    pub const STAGES: &'static [Self] = &[
        Self::PreviewHandshake,
        Self::PreviewExit,
        Self::ContentId,
        Self::StaticAsset,
        Self::RedirectLookup,
        Self::InternalBypass,
        Self::LegacyLangQuery,
        Self::QuerySmuggling,
        Self::DocsBypass,
        Self::LocaleRewrite,
        Self::SmuggledRewrite,
        Self::Fallthrough,
    ];

    /// Get the next stage in the pipeline.
    pub fn next(&self) -> Option<RouteStage> {
        let current_pos = Self::STAGES.iter().position(|&s| s == *self)?;
        Self::STAGES.get(current_pos + 1).copied()
    }

    /// Get stage name for logging/metrics.
    pub fn name(&self) -> &'static str {
        match self {
            RouteStage::PreviewHandshake => "preview_handshake",
            RouteStage::PreviewExit => "preview_exit",
            RouteStage::ContentId => "content_id",
            RouteStage::StaticAsset => "static_asset",
            RouteStage::RedirectLookup => "redirect_lookup",
            RouteStage::InternalBypass => "internal_bypass",
            RouteStage::LegacyLangQuery => "legacy_lang_query",
            RouteStage::QuerySmuggling => "query_smuggling",
            RouteStage::DocsBypass => "docs_bypass",
            RouteStage::LocaleRewrite => "locale_rewrite",
            RouteStage::SmuggledRewrite => "smuggled_rewrite",
            RouteStage::Fallthrough => "fallthrough",
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// What the proxy does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Answer with an HTTP redirect.
    Redirect {
        location: String,
        status: u16,
        cache_control: Option<String>,
    },
    /// Forward to the origin under a different path; the browser URL stays.
    Rewrite { path: String, query: Option<String> },
    /// Forward unchanged.
    PassThrough,
}

impl RouteDecision {
    /// Decision kind for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteDecision::Redirect { .. } => "redirect",
            RouteDecision::Rewrite { .. } => "rewrite",
            RouteDecision::PassThrough => "pass",
        }
    }

    /// Origin request target for a rewrite.
    pub fn rewrite_target(&self) -> Option<String> {
        match self {
            RouteDecision::Rewrite { path, query: Some(query) } => {
                Some(format!("{}?{}", path, query))
            }
            RouteDecision::Rewrite { path, query: None } => Some(path.clone()),
            _ => None,
        }
    }
}

/// A decision together with the stage that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub stage: RouteStage,
    pub decision: RouteDecision,
}

/// Outcome of a single stage.
#[derive(Debug, Clone)]
enum StageOutcome {
    Continue,
    Done(RouteDecision),
}

/// Per-request state carried between stages.
struct RouteState<'r> {
    request: &'r EdgeRequest,
    /// Request path plus any appended smuggled segment.
    working_path: String,
    smuggled: bool,
}

impl RouteState<'_> {
    /// Query forwarded with a rewrite.
    ///
    /// Once a smuggled segment exists it is the only carrier of request
    /// parameters; everything off the whitelist is dropped.
    fn rewrite_query(&self) -> Option<String> {
        if self.smuggled {
            None
        } else {
            self.request.query().map(str::to_string)
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Evaluates [`RouteStage::STAGES`] for each request.
#[derive(Clone)]
pub struct EdgeRouter {
    config: RoutingConfig,
    locales: LocaleSet,
    codec: QueryCodec,
    resolver: RedirectResolver,
    metrics: Arc<Metrics>,
}

impl EdgeRouter {
    pub fn new(
        config: RoutingConfig,
        locales: LocaleSet,
        resolver: RedirectResolver,
        metrics: Arc<Metrics>,
    ) -> Self {
        let codec = QueryCodec::new(config.smuggled_params.iter().cloned(), config.smuggled_max_length);
        Self {
            config,
            locales,
            codec,
            resolver,
            metrics,
        }
    }

    pub fn from_config(
        config: &Config,
        resolver: RedirectResolver,
        metrics: Arc<Metrics>,
    ) -> Result<Self, LocaleError> {
        let locales = LocaleSet::new(config.locales.iter().cloned())?;
        Ok(Self::new(config.routing.clone(), locales, resolver, metrics))
    }

    pub fn locales(&self) -> &LocaleSet {
        &self.locales
    }

    pub fn codec(&self) -> &QueryCodec {
        &self.codec
    }

    /// Decide what to do with `request`.
    pub fn route(&self, request: &EdgeRequest) -> RouteDecision {
        self.evaluate(request).decision
    }

    /// Run the pipeline, reporting which stage decided.
    pub fn evaluate(&self, request: &EdgeRequest) -> Routed {
        let mut state = RouteState {
            request,
            working_path: request.path().to_string(),
            smuggled: false,
        };

        for &stage in RouteStage::STAGES {
            if let StageOutcome::Done(decision) = self.run_stage(stage, &mut state) {
                tracing::debug!(
                    stage = stage.name(),
                    decision = decision.kind(),
                    path = %request.path(),
                    "Routing decision"
                );
                return Routed { stage, decision };
            }
        }

        Routed {
            stage: RouteStage::Fallthrough,
            decision: RouteDecision::PassThrough,
        }
    }

    fn run_stage(&self, stage: RouteStage, state: &mut RouteState<'_>) -> StageOutcome {
        match stage {
            RouteStage::PreviewHandshake => self.preview_handshake(state.request),
            RouteStage::PreviewExit => self.preview_exit(state.request),
            RouteStage::ContentId => self.content_id(state.request),
            RouteStage::StaticAsset => {
                if has_file_extension(state.request.path()) {
                    StageOutcome::Done(RouteDecision::PassThrough)
                } else {
                    StageOutcome::Continue
                }
            }
            RouteStage::RedirectLookup => self.redirect_lookup(state.request),
            RouteStage::InternalBypass => {
                if self.is_internal(state.request.path()) {
                    StageOutcome::Done(RouteDecision::PassThrough)
                } else {
                    StageOutcome::Continue
                }
            }
            RouteStage::LegacyLangQuery => self.legacy_lang_query(state.request),
            RouteStage::QuerySmuggling => {
                self.smuggle_query(state);
                StageOutcome::Continue
            }
            RouteStage::DocsBypass => {
                if has_path_prefix(state.request.path(), &self.config.docs_prefix) {
                    StageOutcome::Done(RouteDecision::PassThrough)
                } else {
                    StageOutcome::Continue
                }
            }
            RouteStage::LocaleRewrite => self.locale_rewrite(state),
            RouteStage::SmuggledRewrite => {
                // Only reached by paths that already carry a locale prefix
                if state.smuggled && self.locales.locale_from_path(state.request.path()).is_some() {
                    StageOutcome::Done(RouteDecision::Rewrite {
                        path: state.working_path.clone(),
                        query: state.rewrite_query(),
                    })
                } else {
                    StageOutcome::Continue
                }
            }
            RouteStage::Fallthrough => StageOutcome::Done(RouteDecision::PassThrough),
        }
    }

    /// Positive integer content ID, if the request carries a valid one.
    fn content_id(&self, request: &EdgeRequest) -> StageOutcome {
        match self.valid_content_id(request) {
            Some(id) => StageOutcome::Done(RouteDecision::Rewrite {
                path: self.config.content_endpoint.clone(),
                query: Some(format!("id={}", id)),
            }),
            None => StageOutcome::Continue,
        }
    }

    fn valid_content_id(&self, request: &EdgeRequest) -> Option<u64> {
        let raw = request.param(&self.config.content_id_param)?;
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse::<u64>().ok().filter(|id| *id > 0)
    }

    fn preview_handshake(&self, request: &EdgeRequest) -> StageOutcome {
        let Some(key) = request.param(&self.config.preview.key_param) else {
            return StageOutcome::Continue;
        };

        let location = self.preview_location(&self.config.preview.endpoint, request, Some(key));
        StageOutcome::Done(temporary_redirect(location))
    }

    fn preview_exit(&self, request: &EdgeRequest) -> StageOutcome {
        if !request.has_param(&self.config.preview.exit_param) {
            return StageOutcome::Continue;
        }

        let location = self.preview_location(&self.config.preview.exit_endpoint, request, None);
        StageOutcome::Done(temporary_redirect(location))
    }

    /// `{endpoint}?locale=..&id=..&path=..[&key=..]`
    fn preview_location(&self, endpoint: &str, request: &EdgeRequest, key: Option<&str>) -> String {
        let locale = self.locales.effective_locale(request.path());
        let id = self.valid_content_id(request).map(|id| id.to_string());

        let mut pairs: Vec<(&str, &str)> = vec![("locale", locale)];
        if let Some(id) = id.as_deref() {
            pairs.push(("id", id));
        }
        pairs.push(("path", request.path()));
        if let Some(key) = key {
            pairs.push(("key", key));
        }

        format!("{}?{}", endpoint, encode_query(&pairs))
    }

    fn redirect_lookup(&self, request: &EdgeRequest) -> StageOutcome {
        let Some(redirect) = self.lookup(request.path()) else {
            return StageOutcome::Continue;
        };

        let (location, ttl) = if redirect.is_relative() {
            (
                relative_location(&redirect.destination_url, request.query()),
                self.config.relative_redirect_ttl_secs,
            )
        } else {
            (
                redirect.destination_url.clone(),
                self.config.absolute_redirect_ttl_secs,
            )
        };

        tracing::info!(
            path = %request.path(),
            location = %location,
            redirect_id = redirect.id,
            status = redirect.effective_status(),
            "CMS redirect matched"
        );

        StageOutcome::Done(RouteDecision::Redirect {
            location,
            status: redirect.effective_status(),
            cache_control: Some(format!("public, max-age={}", ttl)),
        })
    }

    /// Look the path up as received, then percent-decoded.
    fn lookup(&self, path: &str) -> Option<Redirect> {
        if let Some(redirect) = self.resolver.resolve(path) {
            return Some(redirect);
        }
        match urlencoding::decode(path) {
            Ok(decoded) if decoded != path => self.resolver.resolve(&decoded),
            _ => None,
        }
    }

    fn is_internal(&self, path: &str) -> bool {
        self.config
            .internal_prefixes
            .iter()
            .any(|prefix| has_path_prefix(path, prefix))
    }

    fn legacy_lang_query(&self, request: &EdgeRequest) -> StageOutcome {
        let Some(lang) = request.param(&self.config.lang_param) else {
            return StageOutcome::Continue;
        };
        if !self.locales.is_valid_locale(lang) {
            return StageOutcome::Continue;
        }
        if self.locales.effective_locale(request.path()) == lang {
            return StageOutcome::Continue;
        }

        let path = self.locales.localize_url(request.path(), lang);
        let location = match request.query_without(&self.config.lang_param) {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };
        StageOutcome::Done(temporary_redirect(location))
    }

    fn smuggle_query(&self, state: &mut RouteState<'_>) {
        let whitelisted = state
            .request
            .params()
            .any(|(name, _)| self.codec.is_whitelisted(name));
        if !whitelisted {
            return;
        }

        match self.codec.encode(state.request.params()) {
            Some(segment) => {
                state.working_path = QueryCodec::append_to_path(&state.working_path, Some(&segment));
                state.smuggled = true;
                self.metrics.increment_smuggled_blob();
            }
            None => {
                self.metrics.increment_smuggled_dropped();
                tracing::debug!(path = %state.request.path(), "Smuggled query parameters dropped");
            }
        }
    }

    fn locale_rewrite(&self, state: &RouteState<'_>) -> StageOutcome {
        let path = state.request.path();
        if self.locales.locale_from_path(path).is_some() {
            return StageOutcome::Continue;
        }

        StageOutcome::Done(RouteDecision::Rewrite {
            path: LocaleSet::with_locale_prefix(&state.working_path, self.locales.default_locale()),
            query: state.rewrite_query(),
        })
    }
}

fn temporary_redirect(location: String) -> RouteDecision {
    RouteDecision::Redirect {
        location,
        status: TEMPORARY_REDIRECT_STATUS,
        cache_control: None,
    }
}

/// Place a relative destination on the current host.
///
/// The request query is kept unless the destination brings its own.
fn relative_location(destination: &str, query: Option<&str>) -> String {
    let destination = if destination.starts_with('/') {
        destination.to_string()
    } else {
        format!("/{}", destination)
    };
    match query {
        Some(query) if !destination.contains('?') => format!("{}?{}", destination, query),
        _ => destination,
    }
}

/// Last path segment has a `name.ext` shape.
fn has_file_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rfind('.') {
        Some(idx) => idx + 1 < last.len(),
        None => false,
    }
}

/// `path` equals `prefix` or lies beneath it.
fn has_path_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn encode_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

// Shared fixtures for the end-to-end routing tests

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use cms_edge::config::{RedirectsConfig, RoutingConfig};
use cms_edge::locale::LocaleSet;
use cms_edge::metrics::Metrics;
use cms_edge::redirects::{
    CmsError, MemoryStorage, RawRedirect, RedirectFeed, RedirectIndex, RedirectResolver,
    RedirectService, RedirectSource, RedirectTableSnapshot,
};
use cms_edge::routing::{EdgeRequest, EdgeRouter, Routed};

pub const LOCALES: [&str; 2] = ["en-us", "fr"];

pub fn rule(id: u64, origin: &str, destination: &str, status: u16) -> RawRedirect {
    RawRedirect {
        id,
        origin_url: origin.to_string(),
        destination_url: destination.to_string(),
        status_code: status,
    }
}

/// Router over an in-memory redirect index built from `rules`.
pub fn router_with(rules: Vec<RawRedirect>) -> (EdgeRouter, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let snapshot = RedirectTableSnapshot::from_rules(rules, Utc::now());
    let index = RedirectIndex::from_snapshot(snapshot, 1e-4).expect("valid error rate");
    let resolver = RedirectResolver::from_index(index, Arc::clone(&metrics));
    let router = router_for(resolver, Arc::clone(&metrics));
    (router, metrics)
}

pub fn router_for(resolver: RedirectResolver, metrics: Arc<Metrics>) -> EdgeRouter {
    let locales = LocaleSet::new(LOCALES).expect("valid locales");
    EdgeRouter::new(RoutingConfig::default(), locales, resolver, metrics)
}

pub fn evaluate(router: &EdgeRouter, target: &str) -> Routed {
    router.evaluate(&EdgeRequest::parse(target))
}

/// CMS stand-in answering from a queue of scripted responses.
///
/// Records every `since` cursor it was called with.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<Vec<Result<RedirectFeed, u16>>>,
    calls: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_feed(&self, redirects: Vec<RawRedirect>) {
        self.responses.lock().push(Ok(RedirectFeed {
            is_up_to_date: false,
            redirects,
            server_time: None,
        }));
    }

    pub fn push_up_to_date(&self) {
        self.responses.lock().push(Ok(RedirectFeed {
            is_up_to_date: true,
            redirects: Vec::new(),
            server_time: None,
        }));
    }

    pub fn push_error(&self, status: u16) {
        self.responses.lock().push(Err(status));
    }

    pub fn calls(&self) -> Vec<Option<DateTime<Utc>>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RedirectSource for ScriptedSource {
    async fn fetch_redirects(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<RedirectFeed, CmsError> {
        self.calls.lock().push(since);
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Err(CmsError::Status {
                status: 503,
                body: "no scripted response".to_string(),
            });
        }
        match responses.remove(0) {
            Ok(feed) => Ok(feed),
            Err(status) => Err(CmsError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
        }
    }
}

pub fn redirects_config() -> RedirectsConfig {
    RedirectsConfig {
        data_dir: "data".into(),
        ..RedirectsConfig::default()
    }
}

pub fn service(
    storage: &MemoryStorage,
    source: Arc<ScriptedSource>,
) -> (Arc<RedirectService>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let service = RedirectService::new(
        Arc::new(storage.clone()),
        source,
        &redirects_config(),
        Arc::clone(&metrics),
    );
    (Arc::new(service), metrics)
}

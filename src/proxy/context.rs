// Per-request context carried through the Pingora phases

use std::time::Instant;
use uuid::Uuid;

use crate::routing::RouteStage;

/// Request context created for every request and filled in as the
/// request moves from `request_filter` to `logging`
#[derive(Debug, Clone)]
pub struct EdgeContext {
    request_id: String,
    started: Instant,
    method: String,
    path: String,
    /// Origin request target when the router chose a rewrite
    rewrite_target: Option<String>,
    stage: Option<RouteStage>,
    decision: &'static str,
}

impl EdgeContext {
    /// Create a new context with a fresh request ID (UUID v4)
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            started: Instant::now(),
            method: String::new(),
            path: String::new(),
            rewrite_target: None,
            stage: None,
            decision: "none",
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_request(&mut self, method: &str, path: &str) {
        self.method = method.to_string();
        self.path = path.to_string();
    }

    pub fn rewrite_target(&self) -> Option<&str> {
        self.rewrite_target.as_deref()
    }

    pub fn set_rewrite_target(&mut self, target: String) {
        self.rewrite_target = Some(target);
    }

    pub fn stage(&self) -> Option<RouteStage> {
        self.stage
    }

    pub fn decision(&self) -> &'static str {
        self.decision
    }

    /// Record which stage decided and what kind of decision it was
    pub fn set_decision(&mut self, stage: Option<RouteStage>, decision: &'static str) {
        self.stage = stage;
        self.decision = decision;
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for EdgeContext {
    fn default() -> Self {
        Self::new()
    }
}

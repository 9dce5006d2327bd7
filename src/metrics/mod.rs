// Metrics module - Prometheus-compatible counters for the edge router
// Counters are atomics; labelled counters sit behind a mutex

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Metrics tracks routing, redirect and rebuild counters for Prometheus export
pub struct Metrics {
    // Request counters
    request_count: AtomicU64,

    // Routing decisions by kind (redirect, rewrite, pass)
    decision_counts: Mutex<HashMap<&'static str, u64>>,

    // Terminal stage counters (preview_handshake, redirect_lookup, ...)
    stage_counts: Mutex<HashMap<&'static str, u64>>,

    // Response status counters
    status_counts: Mutex<HashMap<u16, u64>>,

    // Redirect resolver
    redirect_hits: AtomicU64,
    bloom_negatives: AtomicU64,
    bloom_false_positives: AtomicU64,
    filter_desyncs: AtomicU64,

    // Query smuggling
    smuggled_blobs: AtomicU64,
    smuggled_dropped: AtomicU64,

    // Rebuilds
    rebuild_success: AtomicU64,
    rebuild_unchanged: AtomicU64,
    rebuild_failure: AtomicU64,
    redirect_items: AtomicU64,
    filter_loaded: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            request_count: AtomicU64::new(0),
            decision_counts: Mutex::new(HashMap::new()),
            stage_counts: Mutex::new(HashMap::new()),
            status_counts: Mutex::new(HashMap::new()),
            redirect_hits: AtomicU64::new(0),
            bloom_negatives: AtomicU64::new(0),
            bloom_false_positives: AtomicU64::new(0),
            filter_desyncs: AtomicU64::new(0),
            smuggled_blobs: AtomicU64::new(0),
            smuggled_dropped: AtomicU64::new(0),
            rebuild_success: AtomicU64::new(0),
            rebuild_unchanged: AtomicU64::new(0),
            rebuild_failure: AtomicU64::new(0),
            redirect_items: AtomicU64::new(0),
            filter_loaded: AtomicU64::new(0),
        }
    }

    /// Increment the total request count
    pub fn increment_request_count(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a routing decision by kind and the stage that produced it
    pub fn record_decision(&self, kind: &'static str, stage: &'static str) {
        if let Ok(mut counts) = self.decision_counts.lock() {
            *counts.entry(kind).or_insert(0) += 1;
        }
        if let Ok(mut counts) = self.stage_counts.lock() {
            *counts.entry(stage).or_insert(0) += 1;
        }
    }

    /// Increment counter for a specific HTTP status code
    pub fn increment_status_count(&self, status_code: u16) {
        if let Ok(mut counts) = self.status_counts.lock() {
            *counts.entry(status_code).or_insert(0) += 1;
        }
    }

    pub fn increment_redirect_hit(&self) {
        self.redirect_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Filter answered "definitely absent"
    pub fn increment_bloom_negative(&self) {
        self.bloom_negatives.fetch_add(1, Ordering::Relaxed);
    }

    /// Filter answered "maybe present" but the table had no rule
    pub fn increment_bloom_false_positive(&self) {
        self.bloom_false_positives.fetch_add(1, Ordering::Relaxed);
    }

    /// False positive on a filter built from the live snapshot's own keys
    pub fn increment_filter_desync(&self) {
        self.filter_desyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_smuggled_blob(&self) {
        self.smuggled_blobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Whitelisted params present but the encoded blob was over the limit
    pub fn increment_smuggled_dropped(&self) {
        self.smuggled_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rebuild_success(&self) {
        self.rebuild_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rebuild_unchanged(&self) {
        self.rebuild_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rebuild_failure(&self) {
        self.rebuild_failure.fetch_add(1, Ordering::Relaxed);
    }

    /// Update gauges describing the live redirect index
    pub fn set_redirect_index(&self, items: usize, filter_loaded: bool) {
        self.redirect_items.store(items as u64, Ordering::Relaxed);
        self.filter_loaded
            .store(u64::from(filter_loaded), Ordering::Relaxed);
    }

    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn get_decision_count(&self, kind: &str) -> u64 {
        self.decision_counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(kind).copied())
            .unwrap_or(0)
    }

    pub fn get_stage_count(&self, stage: &str) -> u64 {
        self.stage_counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(stage).copied())
            .unwrap_or(0)
    }

    pub fn get_redirect_hits(&self) -> u64 {
        self.redirect_hits.load(Ordering::Relaxed)
    }

    pub fn get_bloom_negatives(&self) -> u64 {
        self.bloom_negatives.load(Ordering::Relaxed)
    }

    pub fn get_bloom_false_positives(&self) -> u64 {
        self.bloom_false_positives.load(Ordering::Relaxed)
    }

    pub fn get_filter_desyncs(&self) -> u64 {
        self.filter_desyncs.load(Ordering::Relaxed)
    }

    pub fn get_smuggled_blobs(&self) -> u64 {
        self.smuggled_blobs.load(Ordering::Relaxed)
    }

    pub fn get_smuggled_dropped(&self) -> u64 {
        self.smuggled_dropped.load(Ordering::Relaxed)
    }

    pub fn get_rebuild_success_count(&self) -> u64 {
        self.rebuild_success.load(Ordering::Relaxed)
    }

    pub fn get_rebuild_unchanged_count(&self) -> u64 {
        self.rebuild_unchanged.load(Ordering::Relaxed)
    }

    pub fn get_rebuild_failure_count(&self) -> u64 {
        self.rebuild_failure.load(Ordering::Relaxed)
    }

    pub fn get_redirect_items(&self) -> u64 {
        self.redirect_items.load(Ordering::Relaxed)
    }

    /// Export all metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        push_counter(
            &mut output,
            "edge_requests_total",
            "Total number of requests routed",
            self.request_count.load(Ordering::Relaxed),
        );

        output.push_str("\n# HELP edge_decisions_total Routing decisions by kind\n");
        output.push_str("# TYPE edge_decisions_total counter\n");
        if let Ok(counts) = self.decision_counts.lock() {
            let mut entries: Vec<_> = counts.iter().collect();
            entries.sort();
            for (kind, count) in entries {
                output.push_str(&format!(
                    "edge_decisions_total{{kind=\"{}\"}} {}\n",
                    kind, count
                ));
            }
        }

        output.push_str("\n# HELP edge_stage_decisions_total Terminal decisions by pipeline stage\n");
        output.push_str("# TYPE edge_stage_decisions_total counter\n");
        if let Ok(counts) = self.stage_counts.lock() {
            let mut entries: Vec<_> = counts.iter().collect();
            entries.sort();
            for (stage, count) in entries {
                output.push_str(&format!(
                    "edge_stage_decisions_total{{stage=\"{}\"}} {}\n",
                    stage, count
                ));
            }
        }

        output.push_str("\n# HELP edge_responses_by_status_total Responses by status code\n");
        output.push_str("# TYPE edge_responses_by_status_total counter\n");
        if let Ok(counts) = self.status_counts.lock() {
            let mut entries: Vec<_> = counts.iter().collect();
            entries.sort();
            for (status, count) in entries {
                output.push_str(&format!(
                    "edge_responses_by_status_total{{status=\"{}\"}} {}\n",
                    status, count
                ));
            }
        }

        output.push('\n');
        push_counter(
            &mut output,
            "edge_redirect_hits_total",
            "Requests answered with a CMS redirect",
            self.redirect_hits.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_bloom_negatives_total",
            "Lookups short-circuited by the bloom filter",
            self.bloom_negatives.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_bloom_false_positives_total",
            "Bloom filter positives with no matching rule",
            self.bloom_false_positives.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_filter_desyncs_total",
            "False positives on a filter built from the live snapshot",
            self.filter_desyncs.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_smuggled_blobs_total",
            "Paths that carried smuggled query parameters",
            self.smuggled_blobs.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_smuggled_dropped_total",
            "Smuggled parameter sets dropped for exceeding the length limit",
            self.smuggled_dropped.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_redirect_rebuild_success_total",
            "Rebuilds that installed a new redirect snapshot",
            self.rebuild_success.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_redirect_rebuild_unchanged_total",
            "Rebuilds where the CMS reported no changes",
            self.rebuild_unchanged.load(Ordering::Relaxed),
        );
        output.push('\n');
        push_counter(
            &mut output,
            "edge_redirect_rebuild_failure_total",
            "Rebuilds that failed and kept the previous snapshot",
            self.rebuild_failure.load(Ordering::Relaxed),
        );

        output.push_str("\n# HELP edge_redirect_items Redirect rules in the live snapshot\n");
        output.push_str("# TYPE edge_redirect_items gauge\n");
        output.push_str(&format!(
            "edge_redirect_items {}\n",
            self.redirect_items.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP edge_redirect_filter_loaded Whether a bloom filter guards lookups (1=yes)\n");
        output.push_str("# TYPE edge_redirect_filter_loaded gauge\n");
        output.push_str(&format!(
            "edge_redirect_filter_loaded {}\n",
            self.filter_loaded.load(Ordering::Relaxed)
        ));

        output
    }
}

fn push_counter(output: &mut String, name: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} counter\n", name));
    output.push_str(&format!("{} {}\n", name, value));
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get_request_count(), 0);
        assert_eq!(metrics.get_decision_count("redirect"), 0);
        assert_eq!(metrics.get_redirect_hits(), 0);
        assert_eq!(metrics.get_rebuild_failure_count(), 0);
    }

    #[test]
    fn test_record_decision_counts_kind_and_stage() {
        let metrics = Metrics::new();
        metrics.record_decision("redirect", "redirect_lookup");
        metrics.record_decision("redirect", "preview_handshake");
        metrics.record_decision("rewrite", "locale_rewrite");

        assert_eq!(metrics.get_decision_count("redirect"), 2);
        assert_eq!(metrics.get_decision_count("rewrite"), 1);
        assert_eq!(metrics.get_stage_count("redirect_lookup"), 1);
        assert_eq!(metrics.get_stage_count("fallthrough"), 0);
    }

    #[test]
    fn test_counters_are_thread_safe() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.increment_request_count();
                        metrics.record_decision("pass", "fallthrough");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.get_request_count(), 8000);
        assert_eq!(metrics.get_decision_count("pass"), 8000);
    }

    #[test]
    fn test_export_prometheus_format() {
        let metrics = Metrics::new();
        metrics.increment_request_count();
        metrics.record_decision("redirect", "redirect_lookup");
        metrics.increment_status_count(301);
        metrics.increment_redirect_hit();
        metrics.increment_bloom_negative();
        metrics.set_redirect_index(42, true);

        let output = metrics.export_prometheus();
        assert!(output.contains("# TYPE edge_requests_total counter"));
        assert!(output.contains("edge_requests_total 1"));
        assert!(output.contains("edge_decisions_total{kind=\"redirect\"} 1"));
        assert!(output.contains("edge_stage_decisions_total{stage=\"redirect_lookup\"} 1"));
        assert!(output.contains("edge_responses_by_status_total{status=\"301\"} 1"));
        assert!(output.contains("edge_redirect_hits_total 1"));
        assert!(output.contains("edge_bloom_negatives_total 1"));
        assert!(output.contains("edge_redirect_items 42"));
        assert!(output.contains("edge_redirect_filter_loaded 1"));
    }
}

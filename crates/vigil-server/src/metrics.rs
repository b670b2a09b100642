//! Prometheus-compatible counters for the Vigil server.
//!
//! Tracks request counts, decisions, and appeal outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use vigil_core::{AppealStatus, Decision, DecisionSource};

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    http_requests_total: AtomicU64,
    http_errors_total: AtomicU64,
    evaluations_total: AtomicU64,
    blocks_total: AtomicU64,
    /// Blocks issued because moderation gave no verdict.
    fail_closed_total: AtomicU64,
    appeals_submitted_total: AtomicU64,
    appeals_ai_approved_total: AtomicU64,
    appeals_ai_denied_total: AtomicU64,
    appeals_escalated_total: AtomicU64,
    verdicts_approved_total: AtomicU64,
    verdicts_denied_total: AtomicU64,
    rate_limit_rejections_total: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                http_errors_total: AtomicU64::new(0),
                evaluations_total: AtomicU64::new(0),
                blocks_total: AtomicU64::new(0),
                fail_closed_total: AtomicU64::new(0),
                appeals_submitted_total: AtomicU64::new(0),
                appeals_ai_approved_total: AtomicU64::new(0),
                appeals_ai_denied_total: AtomicU64::new(0),
                appeals_escalated_total: AtomicU64::new(0),
                verdicts_approved_total: AtomicU64::new(0),
                verdicts_denied_total: AtomicU64::new(0),
                rate_limit_rejections_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    pub fn inc_http_requests(&self) {
        self.inner
            .http_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_errors(&self) {
        self.inner.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, decision: &Decision) {
        let m = &self.inner;
        m.evaluations_total.fetch_add(1, Ordering::Relaxed);
        if !decision.is_allowed() {
            m.blocks_total.fetch_add(1, Ordering::Relaxed);
        }
        if decision.source == DecisionSource::FailClosed {
            m.fail_closed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_appeal(&self, status: AppealStatus) {
        let m = &self.inner;
        m.appeals_submitted_total.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            AppealStatus::Approved => &m.appeals_ai_approved_total,
            AppealStatus::AiDenied => &m.appeals_ai_denied_total,
            AppealStatus::PendingParent => &m.appeals_escalated_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_appeals_escalated(&self) {
        self.inner
            .appeals_escalated_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verdicts(&self, approved: bool) {
        let counter = if approved {
            &self.inner.verdicts_approved_total
        } else {
            &self.inner.verdicts_denied_total
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limit_rejections(&self) {
        self.inner
            .rate_limit_rejections_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let m = &self.inner;
        let counters: [(&str, &str, &AtomicU64); 12] = [
            ("http_requests_total", "Total HTTP requests served.", &m.http_requests_total),
            ("http_errors_total", "Total HTTP errors (4xx/5xx).", &m.http_errors_total),
            ("evaluations_total", "Total website and app evaluations.", &m.evaluations_total),
            ("blocks_total", "Total evaluations that blocked.", &m.blocks_total),
            (
                "fail_closed_total",
                "Total blocks issued without a moderation verdict.",
                &m.fail_closed_total,
            ),
            ("appeals_submitted_total", "Total appeals accepted.", &m.appeals_submitted_total),
            (
                "appeals_ai_approved_total",
                "Total appeals approved by moderation.",
                &m.appeals_ai_approved_total,
            ),
            (
                "appeals_ai_denied_total",
                "Total appeals denied by moderation.",
                &m.appeals_ai_denied_total,
            ),
            (
                "appeals_escalated_total",
                "Total appeals sent to the parent.",
                &m.appeals_escalated_total,
            ),
            (
                "verdicts_approved_total",
                "Total parent approvals.",
                &m.verdicts_approved_total,
            ),
            ("verdicts_denied_total", "Total parent denials.", &m.verdicts_denied_total),
            (
                "rate_limit_rejections_total",
                "Total rate limit rejections (429).",
                &m.rate_limit_rejections_total,
            ),
        ];

        let mut out = format!(
            "# HELP vigil_uptime_seconds Time since the server started.\n\
             # TYPE vigil_uptime_seconds gauge\n\
             vigil_uptime_seconds {}\n",
            self.uptime_secs()
        );
        for (name, help, value) in counters {
            out.push_str(&format!(
                "\n# HELP vigil_{name} {help}\n# TYPE vigil_{name} counter\nvigil_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

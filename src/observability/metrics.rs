use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Upper bounds in seconds; an implicit `+Inf` bucket follows.
const LATENCY_BUCKETS: [f64; 9] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

pub struct Histogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len()],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum_secs: f64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if secs <= *bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: LATENCY_BUCKETS
                .iter()
                .zip(self.buckets.iter())
                .map(|(bound, n)| (*bound, n.load(Ordering::Relaxed)))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum_secs: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

pub struct Metrics {
    pub http_requests: AtomicU64,
    pub rate_limited_requests: AtomicU64,
    pub slack_events: AtomicU64,
    pub slack_commands: AtomicU64,
    pub slack_interactions: AtomicU64,
    pub reports_generated: AtomicU64,
    pub reports_failed: AtomicU64,
    pub daily_reports: AtomicU64,
    pub weekly_reports: AtomicU64,
    pub monthly_reports: AtomicU64,
    pub custom_reports: AtomicU64,
    pub keywords_detected: AtomicU64,
    pub approvals_approved: AtomicU64,
    pub approvals_ignored: AtomicU64,
    pub approvals_expired: AtomicU64,
    pub tokens_refreshed: AtomicU64,
    pub token_refresh_failures: AtomicU64,
    pub errors: AtomicU64,
    pub report_generation_latency: Histogram,
    pub google_ads_latency: Histogram,
    pub gemini_latency: Histogram,
    pub start_time: Instant,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub http_requests: u64,
    pub rate_limited_requests: u64,
    pub slack_events: u64,
    pub slack_commands: u64,
    pub slack_interactions: u64,
    pub reports_generated: u64,
    pub reports_failed: u64,
    pub daily_reports: u64,
    pub weekly_reports: u64,
    pub monthly_reports: u64,
    pub custom_reports: u64,
    pub keywords_detected: u64,
    pub approvals_approved: u64,
    pub approvals_ignored: u64,
    pub approvals_expired: u64,
    pub tokens_refreshed: u64,
    pub token_refresh_failures: u64,
    pub errors: u64,
    pub report_generation_latency: HistogramSnapshot,
    pub google_ads_latency: HistogramSnapshot,
    pub gemini_latency: HistogramSnapshot,
    pub uptime_secs: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            http_requests: AtomicU64::new(0),
            rate_limited_requests: AtomicU64::new(0),
            slack_events: AtomicU64::new(0),
            slack_commands: AtomicU64::new(0),
            slack_interactions: AtomicU64::new(0),
            reports_generated: AtomicU64::new(0),
            reports_failed: AtomicU64::new(0),
            daily_reports: AtomicU64::new(0),
            weekly_reports: AtomicU64::new(0),
            monthly_reports: AtomicU64::new(0),
            custom_reports: AtomicU64::new(0),
            keywords_detected: AtomicU64::new(0),
            approvals_approved: AtomicU64::new(0),
            approvals_ignored: AtomicU64::new(0),
            approvals_expired: AtomicU64::new(0),
            tokens_refreshed: AtomicU64::new(0),
            token_refresh_failures: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            report_generation_latency: Histogram::new(),
            google_ads_latency: Histogram::new(),
            gemini_latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn increment_http_requests(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_slack(&self, surface: &str) {
        match surface {
            "events" => self.slack_events.fetch_add(1, Ordering::Relaxed),
            "commands" => self.slack_commands.fetch_add(1, Ordering::Relaxed),
            "interactions" => self.slack_interactions.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_report(&self, report_type: &str, success: bool) {
        if !success {
            self.reports_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.reports_generated.fetch_add(1, Ordering::Relaxed);
        match report_type {
            "daily" => self.daily_reports.fetch_add(1, Ordering::Relaxed),
            "weekly" => self.weekly_reports.fetch_add(1, Ordering::Relaxed),
            "monthly" => self.monthly_reports.fetch_add(1, Ordering::Relaxed),
            _ => self.custom_reports.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn add_keywords_detected(&self, n: u64) {
        self.keywords_detected.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_approval(&self, action: &str) {
        match action {
            "approve" => self.approvals_approved.fetch_add(1, Ordering::Relaxed),
            "ignore" => self.approvals_ignored.fetch_add(1, Ordering::Relaxed),
            "expired" => self.approvals_expired.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_token_refresh(&self, success: bool) {
        if success {
            self.tokens_refreshed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.token_refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            http_requests: self.http_requests.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited_requests.load(Ordering::Relaxed),
            slack_events: self.slack_events.load(Ordering::Relaxed),
            slack_commands: self.slack_commands.load(Ordering::Relaxed),
            slack_interactions: self.slack_interactions.load(Ordering::Relaxed),
            reports_generated: self.reports_generated.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            daily_reports: self.daily_reports.load(Ordering::Relaxed),
            weekly_reports: self.weekly_reports.load(Ordering::Relaxed),
            monthly_reports: self.monthly_reports.load(Ordering::Relaxed),
            custom_reports: self.custom_reports.load(Ordering::Relaxed),
            keywords_detected: self.keywords_detected.load(Ordering::Relaxed),
            approvals_approved: self.approvals_approved.load(Ordering::Relaxed),
            approvals_ignored: self.approvals_ignored.load(Ordering::Relaxed),
            approvals_expired: self.approvals_expired.load(Ordering::Relaxed),
            tokens_refreshed: self.tokens_refreshed.load(Ordering::Relaxed),
            token_refresh_failures: self.token_refresh_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            report_generation_latency: self.report_generation_latency.snapshot(),
            google_ads_latency: self.google_ads_latency.snapshot(),
            gemini_latency: self.gemini_latency.snapshot(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl MetricsSnapshot {
    /// Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        counter(&mut out, "sem_http_requests_total", &[], self.http_requests);
        counter(
            &mut out,
            "sem_rate_limited_requests_total",
            &[],
            self.rate_limited_requests,
        );

        let _ = writeln!(out, "# TYPE sem_slack_requests_total counter");
        for (surface, value) in [
            ("events", self.slack_events),
            ("commands", self.slack_commands),
            ("interactions", self.slack_interactions),
        ] {
            sample(&mut out, "sem_slack_requests_total", &[("surface", surface)], value);
        }

        let _ = writeln!(out, "# TYPE sem_reports_generated_total counter");
        for (report_type, value) in [
            ("daily", self.daily_reports),
            ("weekly", self.weekly_reports),
            ("monthly", self.monthly_reports),
            ("custom", self.custom_reports),
        ] {
            sample(
                &mut out,
                "sem_reports_generated_total",
                &[("report_type", report_type), ("status", "success")],
                value,
            );
        }
        sample(
            &mut out,
            "sem_reports_generated_total",
            &[("report_type", "all"), ("status", "failure")],
            self.reports_failed,
        );

        counter(
            &mut out,
            "sem_keywords_detected_total",
            &[],
            self.keywords_detected,
        );

        let _ = writeln!(out, "# TYPE sem_approvals_processed_total counter");
        for (action, value) in [
            ("approve", self.approvals_approved),
            ("ignore", self.approvals_ignored),
            ("expired", self.approvals_expired),
        ] {
            sample(
                &mut out,
                "sem_approvals_processed_total",
                &[("action", action)],
                value,
            );
        }

        let _ = writeln!(out, "# TYPE sem_token_refresh_total counter");
        sample(
            &mut out,
            "sem_token_refresh_total",
            &[("status", "success")],
            self.tokens_refreshed,
        );
        sample(
            &mut out,
            "sem_token_refresh_total",
            &[("status", "failure")],
            self.token_refresh_failures,
        );

        counter(&mut out, "sem_errors_total", &[], self.errors);

        histogram(
            &mut out,
            "sem_report_generation_seconds",
            &self.report_generation_latency,
        );
        histogram(
            &mut out,
            "sem_google_ads_request_seconds",
            &self.google_ads_latency,
        );
        histogram(&mut out, "sem_gemini_request_seconds", &self.gemini_latency);

        let _ = writeln!(out, "# TYPE sem_uptime_seconds gauge");
        let _ = writeln!(out, "sem_uptime_seconds {}", self.uptime_secs);

        out
    }
}

fn counter(out: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    sample(out, name, labels, value);
}

fn sample(out: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
    if labels.is_empty() {
        let _ = writeln!(out, "{name} {value}");
        return;
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    let _ = writeln!(out, "{name}{{{}}} {value}", rendered.join(","));
}

fn histogram(out: &mut String, name: &str, snapshot: &HistogramSnapshot) {
    let _ = writeln!(out, "# TYPE {name} histogram");
    for (bound, count) in &snapshot.buckets {
        let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {count}");
    }
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", snapshot.count);
    let _ = writeln!(out, "{name}_sum {}", snapshot.sum_secs);
    let _ = writeln!(out, "{name}_count {}", snapshot.count);
}

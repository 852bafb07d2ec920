//! HTTP client for the relay's `/metrics` and `/health` endpoints.
//!
//! These are read-only side channels; the chat session never depends on
//! them.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;

use crate::constants::{self, HEALTH_PATH, METRICS_PATH, NO_PERFORMANCE_DATA};
use crate::ws::ws_to_http_scheme;

/// Response of `GET /metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayMetrics {
    /// Free-form report text.
    pub performance_report: String,
    /// Translations measured since the relay started.
    #[serde(default)]
    pub total_translations: u64,
    /// Currently connected participants.
    #[serde(default)]
    pub active_connections: u64,
}

impl RelayMetrics {
    /// Structured view of the report, `None` when there is no data.
    #[must_use]
    pub fn report(&self) -> Option<PerformanceReport> {
        parse_performance_report(&self.performance_report)
    }
}

/// Figures extracted from the relay's performance report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    /// `Average Latency:` in milliseconds.
    pub avg_latency_ms: Option<f64>,
    /// `P95 Latency:` in milliseconds.
    pub p95_latency_ms: Option<f64>,
    /// `Status:` line as printed (e.g. `✓ PASS`).
    pub status: Option<String>,
}

impl PerformanceReport {
    /// Whether the relay reports meeting its latency target.
    #[must_use]
    pub fn passed(&self) -> Option<bool> {
        self.status.as_deref().map(|status| status.contains("PASS"))
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelayHealth {
    /// `healthy` or `degraded`.
    pub status: String,
    /// Mean latency of recent translations.
    #[serde(default)]
    pub avg_latency_ms: f64,
    /// Currently connected participants.
    #[serde(default)]
    pub active_connections: u64,
}

impl RelayHealth {
    /// `status == "healthy"`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Parse the report text line by line.
///
/// Returns `None` for the relay's "no data" marker or when no known line
/// is present.
#[must_use]
pub fn parse_performance_report(report: &str) -> Option<PerformanceReport> {
    let report = report.trim();
    if report.is_empty() || report == NO_PERFORMANCE_DATA {
        return None;
    }

    let mut parsed = PerformanceReport::default();
    for line in report.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim() {
            "Average Latency" => parsed.avg_latency_ms = parse_millis(value),
            "P95 Latency" => parsed.p95_latency_ms = parse_millis(value),
            "Status" => parsed.status = Some(value.to_string()),
            _ => {}
        }
    }

    (parsed != PerformanceReport::default()).then_some(parsed)
}

fn parse_millis(value: &str) -> Option<f64> {
    value.trim_end_matches("ms").trim().parse().ok()
}

/// Client for the relay's HTTP side channel.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    client: Client,
    base_url: String,
}

impl MetricsClient {
    /// Client for the relay at `server_url` (`ws(s)://` is mapped to
    /// `http(s)://`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, server_url))
    }

    /// Client with a pre-configured HTTP client.
    #[must_use]
    pub fn with_client(client: Client, server_url: &str) -> Self {
        Self {
            client,
            base_url: ws_to_http_scheme(server_url).trim_end_matches('/').to_string(),
        }
    }

    /// Base URL requests are made against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch `GET /metrics`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the status is not a success,
    /// or the body does not parse.
    pub async fn fetch_metrics(&self) -> Result<RelayMetrics> {
        self.get_json(METRICS_PATH).await
    }

    /// Fetch `GET /health`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the status is not a success,
    /// or the body does not parse.
    pub async fn fetch_health(&self) -> Result<RelayHealth> {
        self.get_json(HEALTH_PATH).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        log::debug!("[Metrics] GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("GET {} failed: {}", url, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Invalid response from {url}"))
    }
}

//! Timeseries queries against the Datadog metrics API.
use crate::http::reqwest::try_build_reqwest_client;
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SITE: &str = "datadoghq.com";

const API_KEY_HEADER: &str = "DD-API-KEY";
const APPLICATION_KEY_HEADER: &str = "DD-APPLICATION-KEY";

#[derive(Debug, Error)]
pub enum MetricsError {
    /// Non-2xx answer, rendered as `403 Forbidden`.
    #[error("{code} {reason}")]
    Status { code: u16, reason: String },
    #[error("error querying metrics: {0}")]
    Transport(String),
    #[error("could not decode the metrics response: {0}")]
    Decode(String),
}

impl MetricsError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, MetricsError::Status { code: 401 | 403, .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetricSeries {
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub pointlist: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetricsQueryResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub series: Vec<MetricSeries>,
}

impl MetricsQueryResponse {
    /// Error reported inside a successful HTTP answer, such as an invalid query.
    pub fn api_error(&self) -> Option<String> {
        if let Some(error) = self.error.as_ref().filter(|e| !e.is_empty()) {
            return Some(error.clone());
        }
        (self.status.as_deref() == Some("error")).then(|| "query status is error".to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait MetricsQuery: Send + Sync {
    /// Runs `query` over the `[from, to]` window, both in seconds since the epoch.
    fn query_metrics(
        &self,
        from: i64,
        to: i64,
        query: &str,
    ) -> Result<MetricsQueryResponse, MetricsError>;
}

pub struct DatadogMetricsClient {
    client: Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

impl DatadogMetricsClient {
    /// Client for `site`, a bare site such as `datadoghq.com` targets `https://api.{site}` and a
    /// full base url is used as is.
    pub fn try_new(site: &str, api_key: String, app_key: String) -> Result<Self, MetricsError> {
        let client = try_build_reqwest_client().map_err(|err| MetricsError::Transport(err.to_string()))?;
        let base_url = if site.contains("://") {
            site.trim_end_matches('/').to_string()
        } else {
            format!("https://api.{site}")
        };
        Ok(Self {
            client,
            base_url,
            api_key,
            app_key,
        })
    }
}

impl MetricsQuery for DatadogMetricsClient {
    fn query_metrics(
        &self,
        from: i64,
        to: i64,
        query: &str,
    ) -> Result<MetricsQueryResponse, MetricsError> {
        debug!(from, to, query, "Querying metrics");
        let response = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header(APPLICATION_KEY_HEADER, &self.app_key)
            .query(&[
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("query", query.to_string()),
            ])
            .send()
            .map_err(|err| MetricsError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetricsError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        response
            .json::<MetricsQueryResponse>()
            .map_err(|err| MetricsError::Decode(err.to_string()))
    }
}

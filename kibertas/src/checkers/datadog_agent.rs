//! Waits for the agent metrics to be queryable from the Datadog API.
use crate::checker::run_context::RunContext;
use crate::checker::{CheckError, Checker};
use crate::config::{ConfigError, Env, RunSettings, WaitSettings};
use crate::datadog::{DEFAULT_SITE, MetricsQuery};
use crate::lifecycle::ResourceLifecycle;
use crate::poller::{PollError, Probe, poll_until};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NAME: &str = "datadog-agent";

pub const API_KEY_ENV: &str = "DD_API_KEY";
pub const APP_KEY_ENV: &str = "DD_APP_KEY";

const DEFAULT_QUERY: &str = "avg:kubernetes.cpu.user.total{*}";
const WARM_UP: Duration = Duration::from_secs(3 * 60);
const QUERY_WINDOW_SECONDS: i64 = 2 * 60;
const METRICS_WAIT_INTERVAL: Duration = Duration::from_secs(30);
const WAIT_CONTEXT: &str = "error waiting for query metrics results";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatadogAgentSettings {
    pub api_key: String,
    pub app_key: String,
    pub query: String,
    pub site: String,
    /// Time the agent gets to ship its first points before the first query.
    pub warm_up: Duration,
    pub metrics_wait: WaitSettings,
}

impl DatadogAgentSettings {
    pub fn from_env(env: &Env, run: &RunSettings) -> Result<Self, ConfigError> {
        let (Some(api_key), Some(app_key)) = (env.get(API_KEY_ENV), env.get(APP_KEY_ENV)) else {
            return Err(ConfigError::Missing(
                "DD_API_KEY or DD_APP_KEY is empty".to_string(),
            ));
        };
        Ok(Self {
            api_key,
            app_key,
            query: env.get_or("QUERY_METRICS", DEFAULT_QUERY),
            site: env.get_or("DD_SITE", DEFAULT_SITE),
            warm_up: WARM_UP,
            metrics_wait: WaitSettings::new(METRICS_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "METRICS_WAIT_TIMEOUT")?,
        })
    }
}

pub struct DatadogAgent {
    settings: DatadogAgentSettings,
    metrics: Box<dyn MetricsQuery>,
}

impl DatadogAgent {
    pub fn new(settings: DatadogAgentSettings, metrics: Box<dyn MetricsQuery>) -> Self {
        Self { settings, metrics }
    }

    fn probe(&self, from: i64, to: i64) -> Probe {
        let response = match self.metrics.query_metrics(from, to, &self.settings.query) {
            Ok(response) => response,
            Err(err) if err.is_unauthorized() => return Probe::Fatal(err.to_string()),
            Err(err) => {
                warn!("Error when querying metrics: {err}");
                return Probe::Pending;
            }
        };

        if let Some(api_error) = response.api_error() {
            return Probe::Fatal(format!(
                "HTTP status was 200 OK but got Datadog API error: {api_error}"
            ));
        }
        if response.series.is_empty() {
            info!("No results found: from={from} to={to}");
            return Probe::Pending;
        }
        debug!(series = ?response.series, "Response from `MetricsApi.QueryMetrics`");
        Probe::Converged
    }
}

impl Checker for DatadogAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn converge(
        &mut self,
        ctx: &RunContext,
        _lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        ctx.notify(format!(
            "Querying metrics with query: {}",
            self.settings.query
        ));

        info!(warm_up = ?self.settings.warm_up, "Waiting metrics...");
        if ctx.cancellation().wait_timeout(self.settings.warm_up) {
            return Err(CheckError::wait(WAIT_CONTEXT, PollError::Cancelled));
        }

        let to = Utc::now().timestamp();
        let from = to - QUERY_WINDOW_SECONDS;
        poll_until(&self.settings.metrics_wait, true, ctx.cancellation(), || {
            self.probe(from, to)
        })
        .map_err(|err| CheckError::wait(WAIT_CONTEXT, err))?;

        ctx.notify("Response from `MetricsApi.QueryMetrics`");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckRunner;
    use crate::checker::state::CheckState;
    use crate::checker::tests::{recording_transport, run_context};
    use crate::datadog::{MetricSeries, MetricsError, MetricsQueryResponse, MockMetricsQuery};
    use crate::k8s::client::MockSyncK8sClient;
    use crate::lifecycle::test_wait;
    use crate::notify::NotificationBuffer;
    use assert_matches::assert_matches;
    use mockall::Sequence;
    use rstest::rstest;
    use std::sync::Arc;

    fn settings() -> DatadogAgentSettings {
        DatadogAgentSettings {
            api_key: "api".to_string(),
            app_key: "app".to_string(),
            query: DEFAULT_QUERY.to_string(),
            site: DEFAULT_SITE.to_string(),
            warm_up: Duration::ZERO,
            metrics_wait: test_wait(),
        }
    }

    fn series() -> MetricsQueryResponse {
        MetricsQueryResponse {
            status: Some("ok".to_string()),
            error: None,
            series: vec![MetricSeries {
                metric: Some("kubernetes.cpu.user.total".to_string()),
                scope: Some("*".to_string()),
                pointlist: vec![vec![Some(1.7e12), Some(0.5)]],
            }],
        }
    }

    /// Runs the check without any cluster interaction.
    fn run(metrics: MockMetricsQuery) -> (crate::checker::CheckReport, Vec<String>) {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let mut client = MockSyncK8sClient::new();
        client.expect_create_dynamic_object().never();
        client.expect_delete_dynamic_object().never();
        let lifecycle = Arc::new(ResourceLifecycle::new(
            Arc::new(client),
            ctx.workspace().to_string(),
            false,
        ));
        let mut checker = DatadogAgent::new(settings(), Box::new(metrics));
        let report = CheckRunner::new(ctx, lifecycle).run(&mut checker);
        let sent = sent.lock().unwrap().clone();
        (report, sent)
    }

    #[rstest]
    #[case::no_api_key(&[("DD_APP_KEY", "app")])]
    #[case::empty_app_key(&[("DD_API_KEY", "api"), ("DD_APP_KEY", "")])]
    fn test_keys_are_required(#[case] pairs: &'static [(&'static str, &'static str)]) {
        assert_eq!(
            DatadogAgentSettings::from_env(&Env::from_pairs(pairs), &RunSettings::default()),
            Err(ConfigError::Missing(
                "DD_API_KEY or DD_APP_KEY is empty".to_string()
            ))
        );
    }

    #[test]
    fn test_settings_from_env() {
        let pairs = [("DD_API_KEY", "api"), ("DD_APP_KEY", "app"), ("DD_SITE", "datadoghq.eu")];
        let settings =
            DatadogAgentSettings::from_env(&Env::from_pairs(&pairs), &RunSettings::default())
                .unwrap();
        assert_eq!(settings.query, "avg:kubernetes.cpu.user.total{*}");
        assert_eq!(settings.site, "datadoghq.eu");
        assert_eq!(settings.warm_up, Duration::from_secs(180));
        assert_eq!(settings.metrics_wait.interval, Duration::from_secs(30));
    }

    #[test]
    fn test_retries_until_series_show_up() {
        let mut metrics = MockMetricsQuery::new();
        let mut seq = Sequence::new();
        metrics
            .expect_query_metrics()
            .withf(|from, to, query| to - from == 120 && query == DEFAULT_QUERY)
            .once()
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(MetricsError::Transport("connection reset".to_string())));
        metrics
            .expect_query_metrics()
            .once()
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Err(MetricsError::Status {
                    code: 500,
                    reason: "Internal Server Error".to_string(),
                })
            });
        metrics
            .expect_query_metrics()
            .once()
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(MetricsQueryResponse::default()));
        metrics
            .expect_query_metrics()
            .once()
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(series()));

        let (report, sent) = run(metrics);

        assert_eq!(report.state(), CheckState::Succeeded);
        assert!(sent[0].contains("Response from `MetricsApi.QueryMetrics`"));
        assert!(sent[0].contains("datadog-agent check finished"));
    }

    #[rstest]
    #[case::forbidden(403, "Forbidden")]
    #[case::unauthorized(401, "Unauthorized")]
    fn test_auth_errors_stop_the_wait(#[case] code: u16, #[case] reason: &'static str) {
        let mut metrics = MockMetricsQuery::new();
        metrics
            .expect_query_metrics()
            .once()
            .returning(move |_, _, _| {
                Err(MetricsError::Status {
                    code,
                    reason: reason.to_string(),
                })
            });

        let (report, sent) = run(metrics);

        assert_eq!(report.state(), CheckState::Failed);
        let err = report.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("error waiting for query metrics results: {code} {reason}")
        );
        assert!(sent[0].contains(&format!("{code} {reason}")));
    }

    #[test]
    fn test_api_error_in_successful_answer_is_fatal() {
        let mut metrics = MockMetricsQuery::new();
        metrics.expect_query_metrics().once().returning(|_, _, _| {
            Ok(MetricsQueryResponse {
                status: Some("error".to_string()),
                error: Some("Rule 'foo' does not exist".to_string()),
                series: vec![],
            })
        });

        let (report, _) = run(metrics);

        assert_matches!(
            report.result,
            Err(CheckError::Wait { err: PollError::Fatal(reason), .. }) => {
                assert!(reason.contains("Rule 'foo' does not exist"));
            }
        );
    }

    #[test]
    fn test_cancelled_warm_up_skips_queries() {
        let mut metrics = MockMetricsQuery::new();
        metrics.expect_query_metrics().never();

        let ctx = run_context(false, NotificationBuffer::log_only());
        ctx.cancellation().cancel();
        let lifecycle = ResourceLifecycle::new(
            Arc::new(MockSyncK8sClient::new()),
            ctx.workspace().to_string(),
            false,
        );
        let mut checker = DatadogAgent::new(
            DatadogAgentSettings {
                warm_up: Duration::from_secs(3600),
                ..settings()
            },
            Box::new(metrics),
        );

        let err = checker.converge(&ctx, &lifecycle).unwrap_err();
        assert!(err.is_cancelled());
    }
}

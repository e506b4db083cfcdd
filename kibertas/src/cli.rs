//! Command line entry point: wires the clients, the notification channel and the signal
//! handling around the requested check.
pub mod error;

use crate::aws::s3::S3ObjectStore;
use crate::checker::run_context::RunContext;
use crate::checker::watcher::exit_interrupted;
use crate::checker::{CheckRunner, Checker};
use crate::checkers::cert_manager::{self, CertManager, CertManagerSettings};
use crate::checkers::cluster_autoscaler::{
    self, ClusterAutoscaler, ClusterAutoscalerSettings,
};
use crate::checkers::datadog_agent::{self, DatadogAgent, DatadogAgentSettings};
use crate::checkers::fluent::{self, Fluent, FluentSettings};
use crate::checkers::ingress::{self, DEFAULT_INGRESS_CLASS_NAME, IngressCheck, IngressSettings};
use crate::config::{DEFAULT_CHECK_TIMEOUT_MINUTES, Env, RunSettings};
use crate::datadog::DatadogMetricsClient;
use crate::dns::UdpDnsResolver;
use crate::event::cancellation::CancellationToken;
use crate::event::signal::create_shutdown_signal_handler;
use crate::identity::workspace_name;
#[cfg_attr(test, mockall_double::double)]
use crate::k8s::client::SyncK8sClient;
use crate::lifecycle::ResourceLifecycle;
use crate::notify::chatwork::{ChatworkConfig, ChatworkTransport};
use crate::notify::{NotificationBuffer, start_message};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use error::CliError;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{Level, debug, error, info, warn};

/// Smoke tests for Kubernetes cluster add-ons
#[derive(Debug, Parser)]
#[command(name = "kibertas", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Keep the created resources after the check and log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Upper bound of the waits of a check, in minutes
    #[arg(long, global = true, default_value_t = DEFAULT_CHECK_TIMEOUT_MINUTES)]
    pub timeout: u64,

    /// Log level upperbound
    #[arg(long, global = true, default_value = "info")]
    pub log_level: Level,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check that an add-on works in the current cluster
    Test {
        #[command(subcommand)]
        checker: TestCommand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum TestCommand {
    /// Test cert-manager
    CertManager,
    /// Test cluster-autoscaler
    ClusterAutoscaler,
    /// Test ingress (ingress-controller, external-dns)
    Ingress(IngressArgs),
    /// Test fluent (fluent-bit, fluentd)
    Fluent,
    /// Test datadog-agent
    DatadogAgent,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct IngressArgs {
    /// Skip the resolution of the external hostname
    #[arg(long)]
    pub no_dns_check: bool,

    /// Class of the created ingress
    #[arg(long, env = "INGRESS_CLASS_NAME", default_value = DEFAULT_INGRESS_CLASS_NAME)]
    pub ingress_class_name: String,
}

impl TestCommand {
    /// Prefix of the workspace namespace of the check.
    pub fn namespace_prefix(&self) -> &'static str {
        match self {
            TestCommand::CertManager => cert_manager::NAMESPACE_PREFIX,
            TestCommand::ClusterAutoscaler => cluster_autoscaler::NAMESPACE_PREFIX,
            TestCommand::Ingress(_) => ingress::NAMESPACE_PREFIX,
            TestCommand::Fluent => fluent::NAMESPACE_PREFIX,
            TestCommand::DatadogAgent => "datadog-agent-test",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestCommand::CertManager => cert_manager::NAME,
            TestCommand::ClusterAutoscaler => cluster_autoscaler::NAME,
            TestCommand::Ingress(_) => ingress::NAME,
            TestCommand::Fluent => fluent::NAME,
            TestCommand::DatadogAgent => datadog_agent::NAME,
        }
    }
}

impl Cli {
    pub fn run_settings(&self, env: &Env) -> RunSettings {
        RunSettings::new(
            self.debug,
            Duration::from_secs(self.timeout.saturating_mul(60)),
            env,
        )
    }
}

/// Everything a check needs before it can touch the cluster.
struct Prepared {
    checker: Box<dyn Checker>,
    k8s_client: Arc<SyncK8sClient>,
}

/// Runs the requested check to completion.
///
/// Setup failures abort before any resource is created and are still notified.
pub fn run(cli: Cli) -> Result<(), CliError> {
    let Commands::Test { checker: command } = &cli.command;
    let env = Env::from_process();
    let settings = cli.run_settings(&env);
    info!(timeout = ?settings.timeout, debug = settings.debug, "Starting {} check", command.name());

    let notifications = Arc::new(notification_buffer(&env));
    notifications.add_message(start_message(&settings.cluster_name, Utc::now()));

    let cancellation = CancellationToken::new();
    let prepared = create_shutdown_signal_handler(cancellation.clone())
        .map_err(|err| CliError::Precondition(format!("could not set signal handler: {err}")))
        .and_then(|()| build_runtime())
        .and_then(|runtime| prepare(command, &env, &settings, runtime));
    let prepared = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            error!("{err}");
            notifications.add_message(format!("Error: {err}"));
            notifications.send();
            return Err(err);
        }
    };

    let workspace = workspace_name(command.namespace_prefix());
    let ctx = RunContext::new(
        workspace.clone(),
        settings,
        cancellation,
        notifications,
    );
    ctx.notify(format!(
        "{} check application Namespace: {workspace}",
        command.name()
    ));

    let lifecycle = Arc::new(ResourceLifecycle::new(
        prepared.k8s_client,
        workspace,
        ctx.debug(),
    ));
    let mut checker = prepared.checker;
    let report = CheckRunner::new(ctx, lifecycle)
        .with_cancellation_watcher(exit_interrupted)
        .run(checker.as_mut());

    if let Some(err) = &report.cleanup_error {
        warn!("Check finished with cleanup errors: {err}");
    }
    report
        .into_result()
        .map_err(|err| CliError::Check(err.to_string()))
}

fn notification_buffer(env: &Env) -> NotificationBuffer {
    let Some(config) = ChatworkConfig::from_env(env) else {
        debug!("Chatwork is not configured, notifications only go to the log");
        return NotificationBuffer::log_only();
    };
    match ChatworkTransport::try_new(config) {
        Ok(transport) => NotificationBuffer::new(Box::new(transport)),
        Err(err) => {
            warn!("Notifications only go to the log: {err}");
            NotificationBuffer::log_only()
        }
    }
}

fn build_runtime() -> Result<Arc<Runtime>, CliError> {
    debug!("Starting the runtime");
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|err| CliError::Precondition(format!("could not start the runtime: {err}")))
}

fn prepare(
    command: &TestCommand,
    env: &Env,
    settings: &RunSettings,
    runtime: Arc<Runtime>,
) -> Result<Prepared, CliError> {
    // Checker settings first, so a bad environment fails before connecting anywhere.
    let checker_settings = CheckerSettings::from_env(command, env, settings)
        .map_err(precondition)?;

    debug!("Starting the k8s client");
    let k8s_client = Arc::new(
        SyncK8sClient::try_new(runtime.clone()).map_err(precondition)?,
    );

    let checker: Box<dyn Checker> = match checker_settings {
        CheckerSettings::CertManager(settings) => Box::new(CertManager::new(settings)),
        CheckerSettings::ClusterAutoscaler(settings) => {
            Box::new(ClusterAutoscaler::new(settings, k8s_client.clone()))
        }
        CheckerSettings::Ingress(settings) => {
            let resolver = UdpDnsResolver::public().map_err(precondition)?;
            Box::new(IngressCheck::new(settings, Box::new(resolver)))
        }
        CheckerSettings::Fluent(settings) => {
            let store = S3ObjectStore::try_new(runtime).map_err(precondition)?;
            Box::new(Fluent::new(settings, k8s_client.clone(), Box::new(store)))
        }
        CheckerSettings::DatadogAgent(settings) => {
            let client = DatadogMetricsClient::try_new(
                &settings.site,
                settings.api_key.clone(),
                settings.app_key.clone(),
            )
            .map_err(precondition)?;
            Box::new(DatadogAgent::new(settings, Box::new(client)))
        }
    };

    Ok(Prepared {
        checker,
        k8s_client,
    })
}

fn precondition(err: impl std::fmt::Display) -> CliError {
    CliError::Precondition(err.to_string())
}

/// Settings of the requested checker, read from the environment.
#[derive(Debug, PartialEq, Eq)]
enum CheckerSettings {
    CertManager(CertManagerSettings),
    ClusterAutoscaler(ClusterAutoscalerSettings),
    Ingress(IngressSettings),
    Fluent(FluentSettings),
    DatadogAgent(DatadogAgentSettings),
}

impl CheckerSettings {
    fn from_env(
        command: &TestCommand,
        env: &Env,
        run: &RunSettings,
    ) -> Result<Self, crate::config::ConfigError> {
        Ok(match command {
            TestCommand::CertManager => Self::CertManager(CertManagerSettings::from_env(env, run)?),
            TestCommand::ClusterAutoscaler => {
                Self::ClusterAutoscaler(ClusterAutoscalerSettings::from_env(env, run)?)
            }
            TestCommand::Ingress(args) => Self::Ingress(IngressSettings::from_env(
                env,
                run,
                &args.ingress_class_name,
                args.no_dns_check,
            )?),
            TestCommand::Fluent => Self::Fluent(FluentSettings::from_env(env, run)?),
            TestCommand::DatadogAgent => {
                Self::DatadogAgent(DatadogAgentSettings::from_env(env, run)?)
            }
        })
    }
}

//! Publishes a web server through an ingress and waits for its hostname to resolve.
use super::DEPLOYMENT_WAIT_INTERVAL;
use crate::checker::run_context::RunContext;
use crate::checker::{CheckError, Checker};
use crate::config::{ConfigError, Env, RunSettings, WaitSettings};
use crate::dns::DnsResolver;
use crate::k8s::objects::{ingress, nginx_deployment, service};
use crate::lifecycle::ResourceLifecycle;
use crate::lifecycle::resource::{Readiness, ResourceSpec};
use crate::poller::{Probe, poll_until};
use std::time::Duration;
use tracing::{info, warn};

pub const NAME: &str = "ingress";
pub const NAMESPACE_PREFIX: &str = "ingress-test";
pub const DEFAULT_INGRESS_CLASS_NAME: &str = "alb";

const CONTAINER_PORT: i32 = 8080;
const SERVICE_PORT: i32 = 80;
const LOAD_BALANCER_WAIT_INTERVAL: Duration = Duration::from_secs(5);
const DNS_WAIT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSettings {
    pub resource_name: String,
    pub external_hostname: String,
    pub ingress_class_name: String,
    pub no_dns_check: bool,
    pub deployment_wait: WaitSettings,
    pub load_balancer_wait: WaitSettings,
    pub dns_wait: WaitSettings,
}

impl IngressSettings {
    pub fn from_env(
        env: &Env,
        run: &RunSettings,
        ingress_class_name: &str,
        no_dns_check: bool,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            resource_name: env.get_or("RESOURCE_NAME", "sample"),
            external_hostname: env.get_or("EXTERNAL_HOSTNAME", "sample-skmt.cwtest.info"),
            ingress_class_name: ingress_class_name.to_string(),
            no_dns_check,
            deployment_wait: WaitSettings::new(DEPLOYMENT_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "DEPLOYMENT_WAIT_TIMEOUT")?,
            load_balancer_wait: WaitSettings::new(LOAD_BALANCER_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "INGRESS_WAIT_TIMEOUT")?,
            dns_wait: WaitSettings::new(DNS_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "DNS_WAIT_TIMEOUT")?,
        })
    }

    /// Only the AWS load balancer controller reports a hostname we know how to wait for.
    fn waits_for_load_balancer(&self) -> bool {
        self.ingress_class_name == DEFAULT_INGRESS_CLASS_NAME
    }
}

pub struct IngressCheck {
    settings: IngressSettings,
    resolver: Box<dyn DnsResolver>,
}

impl IngressCheck {
    pub fn new(settings: IngressSettings, resolver: Box<dyn DnsResolver>) -> Self {
        Self { settings, resolver }
    }

    fn ingress_spec(&self) -> Result<ResourceSpec, CheckError> {
        let spec = ResourceSpec::from_typed(&ingress(
            &self.settings.resource_name,
            &self.settings.ingress_class_name,
            &self.settings.external_hostname,
            SERVICE_PORT,
        ))?;
        Ok(if self.settings.waits_for_load_balancer() {
            spec.with_readiness(Readiness::LoadBalancerHostname {
                wait: self.settings.load_balancer_wait,
            })
        } else {
            spec
        })
    }

    fn wait_for_dns_record(&self, ctx: &RunContext) -> Result<(), CheckError> {
        let host = &self.settings.external_hostname;
        ctx.notify(format!("Check DNS Record for: {host}"));

        poll_until(&self.settings.dns_wait, false, ctx.cancellation(), || {
            match self.resolver.lookup_a(host) {
                Ok(addresses) if !addresses.is_empty() => {
                    info!(host, ?addresses, "DNS record found");
                    Probe::Converged
                }
                Ok(_) => {
                    info!("Record for {host} is not yet available, retrying...");
                    Probe::Pending
                }
                Err(err) => {
                    warn!("DNS query for {host} failed, retrying: {err}");
                    Probe::Pending
                }
            }
        })
        .map_err(|err| CheckError::wait(format!("error waiting for DNS record of {host}"), err))?;

        ctx.notify(format!("DNS Record for {host} is available"));
        Ok(())
    }
}

impl Checker for IngressCheck {
    fn name(&self) -> &str {
        NAME
    }

    fn create_resources(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        let name = &self.settings.resource_name;
        lifecycle.create_namespace(ctx.cancellation())?;

        ctx.notify(format!("Create Deployment: {name}"));
        let deployment = ResourceSpec::from_typed(&nginx_deployment(name, 1, CONTAINER_PORT))?
            .with_readiness(Readiness::DeploymentReady {
                wait: self.settings.deployment_wait,
            });
        lifecycle.create(deployment, ctx.cancellation())?;

        ctx.notify(format!("Create Service: {name}"));
        lifecycle.create(
            ResourceSpec::from_typed(&service(name, SERVICE_PORT, CONTAINER_PORT))?,
            ctx.cancellation(),
        )?;
        Ok(())
    }

    fn converge(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        ctx.notify(format!(
            "Create Ingress: {} ({})",
            self.settings.resource_name, self.settings.ingress_class_name
        ));
        lifecycle.create(self.ingress_spec()?, ctx.cancellation())?;

        if self.settings.no_dns_check {
            ctx.notify("Skip Dns Check");
            return Ok(());
        }
        self.wait_for_dns_record(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckRunner;
    use crate::checker::state::CheckState;
    use crate::checker::tests::{recording_transport, run_context};
    use crate::dns::{DnsError, MockDnsResolver};
    use crate::k8s::client::{CreateOutcome, DeleteOutcome, MockSyncK8sClient};
    use crate::lifecycle::test_wait;
    use crate::notify::NotificationBuffer;
    use crate::poller::PollError;
    use assert_matches::assert_matches;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::networking::v1::{
        Ingress, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus,
    };
    use mockall::{Sequence, predicate};
    use rstest::rstest;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn settings(class: &str, no_dns_check: bool) -> IngressSettings {
        IngressSettings {
            resource_name: "sample".to_string(),
            external_hostname: "sample-skmt.cwtest.info".to_string(),
            ingress_class_name: class.to_string(),
            no_dns_check,
            deployment_wait: test_wait(),
            load_balancer_wait: test_wait(),
            dns_wait: test_wait(),
        }
    }

    fn ready_deployment() -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn ingress_with_hostname(hostname: &str) -> Ingress {
        Ingress {
            status: Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(vec![IngressLoadBalancerIngress {
                        hostname: Some(hostname.to_string()),
                        ..Default::default()
                    }]),
                }),
            }),
            ..Default::default()
        }
    }

    /// Accepts every object and reports the workloads as ready.
    fn cluster(deletes: usize) -> MockSyncK8sClient {
        let mut client = MockSyncK8sClient::new();
        client
            .expect_create_dynamic_object()
            .returning(|_| Ok(CreateOutcome::Created));
        client
            .expect_get_deployment()
            .returning(|_, _| Ok(Some(ready_deployment())));
        client.expect_get_ingress().returning(|_, _| {
            Ok(Some(ingress_with_hostname(
                "k8s-sample-123.ap-northeast-1.elb.amazonaws.com",
            )))
        });
        client
            .expect_delete_dynamic_object()
            .times(deletes)
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));
        client
    }

    fn run(
        settings: IngressSettings,
        client: MockSyncK8sClient,
        resolver: MockDnsResolver,
    ) -> (crate::checker::CheckReport, Vec<String>) {
        let (transport, sent) = recording_transport();
        let ctx = run_context(false, NotificationBuffer::new(Box::new(transport)));
        let lifecycle = Arc::new(ResourceLifecycle::new(
            Arc::new(client),
            ctx.workspace().to_string(),
            false,
        ));
        let mut checker = IngressCheck::new(settings, Box::new(resolver));
        let report = CheckRunner::new(ctx, lifecycle).run(&mut checker);
        let sent = sent.lock().unwrap().clone();
        (report, sent)
    }

    #[test]
    fn test_settings_from_env() {
        let run = RunSettings::default();
        let pairs = [("EXTERNAL_HOSTNAME", "other.example.com"), ("DNS_WAIT_TIMEOUT", "10m")];
        let settings =
            IngressSettings::from_env(&Env::from_pairs(&pairs), &run, "nginx", true).unwrap();
        assert_eq!(settings.resource_name, "sample");
        assert_eq!(settings.external_hostname, "other.example.com");
        assert_eq!(settings.ingress_class_name, "nginx");
        assert!(settings.no_dns_check);
        assert_eq!(settings.dns_wait, WaitSettings::new(DNS_WAIT_INTERVAL, Duration::from_secs(600)));
        assert_eq!(settings.load_balancer_wait.interval, Duration::from_secs(5));
        assert_eq!(settings.load_balancer_wait.timeout, run.timeout);
    }

    #[rstest]
    #[case::alb("alb", true)]
    #[case::other_controller("nginx", false)]
    fn test_load_balancer_wait_depends_on_class(#[case] class: &str, #[case] waits: bool) {
        let checker = IngressCheck::new(settings(class, true), Box::new(MockDnsResolver::new()));
        let spec = checker.ingress_spec().unwrap();
        assert_eq!(
            matches!(spec.readiness, Readiness::LoadBalancerHostname { .. }),
            waits
        );
        assert_eq!(spec.object.data["spec"]["ingressClassName"], class);
    }

    #[test]
    fn test_ingress_check_resolves_hostname() {
        let mut resolver = MockDnsResolver::new();
        let mut seq = Sequence::new();
        resolver
            .expect_lookup_a()
            .with(predicate::eq("sample-skmt.cwtest.info"))
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Err(DnsError::Proto("truncated".to_string())));
        resolver
            .expect_lookup_a()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));
        resolver
            .expect_lookup_a()
            .once()
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![Ipv4Addr::new(192, 0, 2, 10)]));

        // deployment, service, ingress and the namespace
        let (report, sent) = run(settings("alb", false), cluster(4), resolver);

        assert_eq!(report.state(), CheckState::Succeeded);
        assert!(sent[0].contains("DNS Record for sample-skmt.cwtest.info is available"));
    }

    #[test]
    fn test_dns_check_can_be_skipped() {
        let mut resolver = MockDnsResolver::new();
        resolver.expect_lookup_a().never();

        let (report, sent) = run(settings("alb", true), cluster(4), resolver);

        assert_eq!(report.state(), CheckState::Succeeded);
        assert!(sent[0].contains("Skip Dns Check"));
    }

    #[test]
    fn test_unresolved_hostname_times_out() {
        let mut resolver = MockDnsResolver::new();
        resolver.expect_lookup_a().returning(|_| Ok(vec![]));

        let (report, sent) = run(settings("alb", false), cluster(4), resolver);

        assert_eq!(report.state(), CheckState::Failed);
        assert_matches!(
            report.result,
            Err(CheckError::Wait {
                err: PollError::Timeout(_),
                ..
            })
        );
        assert!(sent[0].contains("ingress check failed: error waiting for DNS record"));
    }

    #[test]
    fn test_load_balancer_without_hostname_skips_dns() {
        let mut client = MockSyncK8sClient::new();
        client
            .expect_create_dynamic_object()
            .returning(|_| Ok(CreateOutcome::Created));
        client
            .expect_get_deployment()
            .returning(|_, _| Ok(Some(ready_deployment())));
        client
            .expect_get_ingress()
            .returning(|_, _| Ok(Some(ingress_with_hostname(""))));
        client
            .expect_delete_dynamic_object()
            .times(4)
            .returning(|_, _, _| Ok(DeleteOutcome::Deleted));
        let mut resolver = MockDnsResolver::new();
        resolver.expect_lookup_a().never();

        let (report, _) = run(settings("alb", false), client, resolver);

        assert_matches!(
            report.result,
            Err(CheckError::Lifecycle(err)) => assert!(err.to_string().contains("Ingress"))
        );
    }
}

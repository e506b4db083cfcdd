//! Issues a CA and a leaf certificate through cert-manager.
use crate::checker::run_context::RunContext;
use crate::checker::{CheckError, Checker};
use crate::config::{ConfigError, Env, RunSettings, WaitSettings};
use crate::k8s::objects::{certificate_type_meta, dynamic_object, issuer_type_meta};
use crate::lifecycle::ResourceLifecycle;
use crate::lifecycle::resource::{Readiness, ResourceSpec};
use serde_json::json;
use std::time::Duration;

pub const NAME: &str = "cert-manager";
pub const NAMESPACE_PREFIX: &str = "cert-manager-test";

const CLUSTER_ISSUER: &str = "selfsigned-issuer";
const SECRET_WAIT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertManagerSettings {
    pub cert_name: String,
    pub secret_wait: WaitSettings,
}

impl CertManagerSettings {
    pub fn from_env(env: &Env, run: &RunSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            cert_name: env.get_or("CERT_NAME", "sample"),
            secret_wait: WaitSettings::new(SECRET_WAIT_INTERVAL, run.timeout)
                .with_timeout_from(env, "SECRET_WAIT_TIMEOUT")?,
        })
    }
}

pub struct CertManager {
    settings: CertManagerSettings,
}

impl CertManager {
    pub fn new(settings: CertManagerSettings) -> Self {
        Self { settings }
    }

    fn ca_name(&self) -> String {
        format!("{}-ca", self.settings.cert_name)
    }

    fn ca_secret_name(&self) -> String {
        format!("{}-tls", self.settings.cert_name)
    }

    fn issuer_name(&self) -> String {
        format!("{}-issuer", self.settings.cert_name)
    }

    fn certificate_name(&self) -> String {
        format!("{}-cert", self.settings.cert_name)
    }

    /// Self-signed root CA, its key pair ends up in the `{name}-tls` secret.
    fn root_ca(&self, namespace: &str) -> ResourceSpec {
        let secret_name = self.ca_secret_name();
        let obj = dynamic_object(
            certificate_type_meta(),
            &self.ca_name(),
            namespace,
            json!({
                "spec": {
                    "secretName": secret_name,
                    "commonName": secret_name,
                    "isCA": true,
                    "privateKey": { "algorithm": "ECDSA", "size": 256 },
                    "issuerRef": {
                        "name": CLUSTER_ISSUER,
                        "kind": "ClusterIssuer",
                        "group": "cert-manager.io"
                    }
                }
            }),
        );
        ResourceSpec::new(obj).with_readiness(Readiness::Secret {
            name: secret_name,
            wait: self.settings.secret_wait,
        })
    }

    fn issuer(&self, namespace: &str) -> ResourceSpec {
        ResourceSpec::new(dynamic_object(
            issuer_type_meta(),
            &self.issuer_name(),
            namespace,
            json!({ "spec": { "ca": { "secretName": self.ca_secret_name() } } }),
        ))
    }

    /// Leaf certificate for the in-cluster service names, its secret is named after it.
    fn certificate(&self, namespace: &str) -> ResourceSpec {
        let name = &self.settings.cert_name;
        let certificate_name = self.certificate_name();
        let obj = dynamic_object(
            certificate_type_meta(),
            &certificate_name,
            namespace,
            json!({
                "spec": {
                    "secretName": certificate_name,
                    "issuerRef": { "name": self.issuer_name(), "kind": "Issuer" },
                    "dnsNames": [
                        name,
                        format!("{name}.{namespace}.svc"),
                        format!("{name}.{namespace}.svc.cluster.local")
                    ]
                }
            }),
        );
        ResourceSpec::new(obj).with_readiness(Readiness::Secret {
            name: certificate_name,
            wait: self.settings.secret_wait,
        })
    }
}

impl Checker for CertManager {
    fn name(&self) -> &str {
        NAME
    }

    fn create_resources(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        lifecycle.create_namespace(ctx.cancellation())?;

        ctx.notify(format!("Create RootCA: {}", self.ca_name()));
        lifecycle.create(self.root_ca(ctx.workspace()), ctx.cancellation())?;

        ctx.notify(format!("Create Issuer: {}", self.issuer_name()));
        lifecycle.create(self.issuer(ctx.workspace()), ctx.cancellation())?;
        Ok(())
    }

    /// The leaf certificate secret only shows up once cert-manager signed it with the CA.
    fn converge(
        &mut self,
        ctx: &RunContext,
        lifecycle: &ResourceLifecycle,
    ) -> Result<(), CheckError> {
        ctx.notify(format!("Create Certificate: {}", self.certificate_name()));
        lifecycle.create(self.certificate(ctx.workspace()), ctx.cancellation())?;
        ctx.notify(format!("Certificate secret {} is ready", self.certificate_name()));
        Ok(())
    }
}

//! Type metadata and helpers for the objects the checks create.
use super::error::K8sError;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::{DynamicObject, ObjectMeta, TypeMeta};
use serde::Serialize;
use std::collections::BTreeMap;

pub const CERT_MANAGER_API_VERSION: &str = "cert-manager.io/v1";
pub const NGINX_IMAGE: &str = "nginx:1.25.2";
pub const LOG_GENERATOR_IMAGE: &str = "ubuntu";
pub const EXTERNAL_DNS_HOSTNAME_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";

const LOG_GENERATOR_SCRIPT: &str =
    "while true; do cat /dev/urandom | tr -dc 'a-zA-Z0-9' | fold -w 128 | head -n 64; sleep 2; done";

const ALB_ANNOTATIONS: [(&str, &str); 8] = [
    ("alb.ingress.kubernetes.io/backend-protocol", "HTTP"),
    ("alb.ingress.kubernetes.io/connection-idle-timeout", "60"),
    ("alb.ingress.kubernetes.io/healthcheck-interval-seconds", "5"),
    ("alb.ingress.kubernetes.io/healthcheck-protocol", "HTTP"),
    ("alb.ingress.kubernetes.io/healthcheck-timeout-seconds", "2"),
    ("alb.ingress.kubernetes.io/healthy-threshold-count", "2"),
    ("alb.ingress.kubernetes.io/inbound-cidrs", "0.0.0.0/0"),
    ("alb.ingress.kubernetes.io/target-type", "ip"),
];

pub fn namespace_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: "v1".to_string(),
        kind: "Namespace".to_string(),
    }
}

pub fn deployment_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
    }
}

pub fn service_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
    }
}

pub fn ingress_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: "networking.k8s.io/v1".to_string(),
        kind: "Ingress".to_string(),
    }
}

pub fn certificate_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: CERT_MANAGER_API_VERSION.to_string(),
        kind: "Certificate".to_string(),
    }
}

pub fn issuer_type_meta() -> TypeMeta {
    TypeMeta {
        api_version: CERT_MANAGER_API_VERSION.to_string(),
        kind: "Issuer".to_string(),
    }
}

/// Converts a typed object into a [DynamicObject] keeping its `apiVersion` and `kind`.
pub fn to_dynamic_object<K: Serialize>(obj: &K) -> Result<DynamicObject, K8sError> {
    let obj = serde_json::from_value::<DynamicObject>(serde_json::to_value(obj)?)?;
    if obj.types.is_none() {
        return Err(K8sError::MissingKind());
    }
    if obj.metadata.name.is_none() {
        return Err(K8sError::MissingName());
    }
    Ok(obj)
}

/// Builds a [DynamicObject] from the type, metadata and the rest of the top level fields.
pub fn dynamic_object(
    types: TypeMeta,
    name: &str,
    namespace: &str,
    data: serde_json::Value,
) -> DynamicObject {
    DynamicObject {
        types: Some(types),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data,
    }
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// `app: {name}` labels shared by a workload and the objects selecting it.
pub fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn labeled_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(app_labels(name)),
        ..Default::default()
    }
}

/// Deployment whose pods carry the `app: {name}` label, running the given containers.
pub fn deployment(name: &str, replicas: i32, containers: Vec<Container>) -> Deployment {
    Deployment {
        metadata: labeled_meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single nginx container exposing `port` as `http`.
pub fn nginx_deployment(name: &str, replicas: i32, port: i32) -> Deployment {
    deployment(
        name,
        replicas,
        vec![Container {
            name: "nginx".to_string(),
            image: Some(NGINX_IMAGE.to_string()),
            ports: Some(vec![ContainerPort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                container_port: port,
                ..Default::default()
            }]),
            ..Default::default()
        }],
    )
}

/// Pods writing bursts of random lines to stdout.
pub fn log_generator_deployment(name: &str, replicas: i32) -> Deployment {
    deployment(
        name,
        replicas,
        vec![Container {
            name: "log-generator".to_string(),
            image: Some(LOG_GENERATOR_IMAGE.to_string()),
            args: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                LOG_GENERATOR_SCRIPT.to_string(),
            ]),
            ..Default::default()
        }],
    )
}

/// Service selecting the `app: {name}` pods.
pub fn service(name: &str, port: i32, target_port: i32) -> Service {
    Service {
        metadata: labeled_meta(name),
        spec: Some(ServiceSpec {
            selector: Some(app_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::Int(target_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress routing every path of `host` to the service named after the ingress.
///
/// The load balancer annotations only matter to the AWS controller, the external-dns one
/// publishes `host`.
pub fn ingress(name: &str, class_name: &str, host: &str, service_port: i32) -> Ingress {
    let mut annotations: BTreeMap<String, String> = ALB_ANNOTATIONS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    annotations.insert(
        EXTERNAL_DNS_HOSTNAME_ANNOTATION.to_string(),
        host.to_string(),
    );

    Ingress {
        metadata: ObjectMeta {
            annotations: Some(annotations),
            ..labeled_meta(name)
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(class_name.to_string()),
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(service_port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

//! 对外访问构建模块
//!
//! 服务端的 Ingress 与 OpenShift Route。Route 以动态对象表达，避免
//! 引入 OpenShift 类型依赖，在普通 Kubernetes 集群上同样可编译运行。

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::api::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde_json::json;

use crate::crd::Immich;
use crate::error::Result;
use crate::resources::{labels, owner_reference};
use crate::utils::merge_string_maps;

const COMPONENT: &str = "server";

/// Route API 的资源描述
pub fn route_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("route.openshift.io", "v1", "Route"))
}

/// 构建服务端 Ingress
pub fn ingress(immich: &Immich) -> Ingress {
    let name = immich.component_name(COMPONENT);
    let spec = immich
        .spec
        .server
        .as_ref()
        .and_then(|s| s.ingress.clone())
        .unwrap_or_default();

    let rules: Vec<IngressRule> = spec
        .hosts
        .unwrap_or_default()
        .into_iter()
        .map(|host| {
            let paths: Vec<HTTPIngressPath> = host
                .paths
                .unwrap_or_default()
                .into_iter()
                .map(|path| HTTPIngressPath {
                    path: Some(path.path.unwrap_or_else(|| "/".to_string())),
                    path_type: path.path_type.unwrap_or_else(|| "Prefix".to_string()),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: name.clone(),
                            port: Some(ServiceBackendPort {
                                name: Some("http".to_string()),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                })
                .collect();
            IngressRule {
                host: host.host,
                http: Some(HTTPIngressRuleValue { paths }),
            }
        })
        .collect();

    let tls: Vec<IngressTLS> = spec
        .tls
        .unwrap_or_default()
        .into_iter()
        .map(|tls| IngressTLS {
            hosts: tls.hosts,
            secret_name: tls.secret_name,
        })
        .collect();

    Ingress {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            annotations: spec.annotations,
            owner_references: Some(vec![owner_reference(immich)]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: spec.ingress_class_name,
            rules: if rules.is_empty() { None } else { Some(rules) },
            tls: if tls.is_empty() { None } else { Some(tls) },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 构建服务端 OpenShift Route（动态对象）
pub fn route(immich: &Immich) -> Result<DynamicObject> {
    let name = immich.component_name(COMPONENT);
    let spec = immich
        .spec
        .server
        .as_ref()
        .and_then(|s| s.route.clone())
        .unwrap_or_default();

    let route_labels = merge_string_maps(labels(immich, COMPONENT), spec.labels.as_ref());

    let mut route_spec = json!({
        "to": {
            "kind": "Service",
            "name": name,
            "weight": 100,
        },
        "port": {
            "targetPort": "http",
        },
        "wildcardPolicy": spec.wildcard_policy.unwrap_or_else(|| "None".to_string()),
    });

    if let Some(host) = spec.host.filter(|h| !h.is_empty()) {
        route_spec["host"] = json!(host);
    }
    if let Some(path) = spec.path.filter(|p| !p.is_empty() && p != "/") {
        route_spec["path"] = json!(path);
    }
    if let Some(tls) = spec.tls {
        let mut tls_config = json!({
            "termination": tls.termination.unwrap_or_else(|| "edge".to_string()),
            "insecureEdgeTerminationPolicy": tls
                .insecure_edge_termination_policy
                .unwrap_or_else(|| "Redirect".to_string()),
        });
        if let Some(certificate) = tls.certificate.filter(|c| !c.is_empty()) {
            tls_config["certificate"] = json!(certificate);
        }
        if let Some(key) = tls.key.filter(|k| !k.is_empty()) {
            tls_config["key"] = json!(key);
        }
        if let Some(ca) = tls.ca_certificate.filter(|c| !c.is_empty()) {
            tls_config["caCertificate"] = json!(ca);
        }
        if let Some(destination_ca) = tls.destination_ca_certificate.filter(|c| !c.is_empty()) {
            tls_config["destinationCACertificate"] = json!(destination_ca);
        }
        route_spec["tls"] = tls_config;
    }

    let route = json!({
        "apiVersion": "route.openshift.io/v1",
        "kind": "Route",
        "metadata": {
            "name": name,
            "namespace": immich.namespace(),
            "labels": route_labels,
            "annotations": spec.annotations.unwrap_or_default(),
            "ownerReferences": [serde_json::to_value(owner_reference(immich))?],
        },
        "spec": route_spec,
    });

    Ok(serde_json::from_value(route)?)
}

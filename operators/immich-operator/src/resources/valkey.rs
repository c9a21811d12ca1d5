//! Valkey 缓存组件构建模块
//!
//! 单副本 Recreate Deployment：缓存数据卷不支持并发写入，滚动更新
//! 会出现两个实例同写一卷。数据 PVC 属于低关键层，随 CR 级联删除。

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{Immich, OperatorImages};
use crate::error::{Error, Result};
use crate::resources::{labels, owner_reference, selector_labels};
use crate::utils::merge_string_maps;

const COMPONENT: &str = "valkey";
const PORT: i32 = 6379;
const DATA_MOUNT_PATH: &str = "/data";

/// 数据 PVC 默认容量
const DEFAULT_DATA_SIZE: &str = "1Gi";

/// 构建 Valkey Deployment
pub fn deployment(immich: &Immich, images: &OperatorImages) -> Result<Deployment> {
    let image = immich
        .get_valkey_image(images)
        .ok_or(Error::MissingImage(COMPONENT))?;
    let spec = immich.spec.valkey.clone().unwrap_or_default();

    let pod_labels = merge_string_maps(labels(immich, COMPONENT), spec.pod_labels.as_ref());

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(immich.component_name(COMPONENT)),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            owner_references: Some(vec![owner_reference(immich)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(selector_labels(immich, COMPONENT)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: spec.pod_annotations.clone(),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    security_context: spec.pod_security_context.clone(),
                    image_pull_secrets: immich.spec.image_pull_secrets.clone(),
                    node_selector: spec.node_selector.clone(),
                    tolerations: spec.tolerations.clone(),
                    affinity: spec.affinity.clone(),
                    containers: vec![Container {
                        name: COMPONENT.to_string(),
                        image: Some(image),
                        image_pull_policy: spec.image_pull_policy.clone(),
                        ports: Some(vec![ContainerPort {
                            name: Some("redis".to_string()),
                            container_port: PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        resources: spec.resources.clone(),
                        security_context: spec.security_context.clone(),
                        liveness_probe: Some(ping_probe(30)),
                        readiness_probe: Some(ping_probe(5)),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "data".to_string(),
                            mount_path: DATA_MOUNT_PATH.to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(volumes(immich)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// 构建 Valkey Service
pub fn service(immich: &Immich) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(immich.component_name(COMPONENT)),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            owner_references: Some(vec![owner_reference(immich)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(immich, COMPONENT)),
            ports: Some(vec![ServicePort {
                name: Some("redis".to_string()),
                port: PORT,
                target_port: Some(IntOrString::String("redis".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 构建缓存数据 PVC
///
/// 缓存内容可重建，因此携带 owner reference 随 CR 级联删除。
pub fn data_claim(immich: &Immich) -> PersistentVolumeClaim {
    let persistence = immich.valkey_persistence();

    let size = persistence
        .size
        .unwrap_or_else(|| Quantity(DEFAULT_DATA_SIZE.to_string()));
    let access_modes = persistence
        .access_modes
        .filter(|modes| !modes.is_empty())
        .unwrap_or_else(|| vec!["ReadWriteOnce".to_string()]);

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(immich.component_name("valkey-data")),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            owner_references: Some(vec![owner_reference(immich)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: persistence.storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 数据卷：持久化启用时挂 PVC，否则回退为一次性 emptyDir
fn volumes(immich: &Immich) -> Vec<Volume> {
    if immich.is_valkey_persistence_enabled() {
        let claim_name = immich
            .valkey_persistence()
            .existing_claim
            .filter(|claim| !claim.is_empty())
            .unwrap_or_else(|| immich.component_name("valkey-data"));
        return vec![Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name,
                ..Default::default()
            }),
            ..Default::default()
        }];
    }
    vec![Volume {
        name: "data".to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }]
}

fn ping_probe(initial_delay_seconds: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "valkey-cli ping | grep PONG".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

//! 机器学习组件构建模块
//!
//! 推理服务的模型缓存默认持久化，避免每次重启重新下载模型；
//! 启动探针放宽到 60 个周期以容忍慢速模型加载。

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, PersistentVolumeClaim,
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

const COMPONENT: &str = "machine-learning";
const PORT: i32 = 3003;
const CACHE_MOUNT_PATH: &str = "/cache";

/// 模型缓存默认容量
const DEFAULT_CACHE_SIZE: &str = "10Gi";

/// 构建机器学习 Deployment
pub fn deployment(immich: &Immich, images: &OperatorImages) -> Result<Deployment> {
    let image = immich
        .get_machine_learning_image(images)
        .ok_or(Error::MissingImage(COMPONENT))?;
    let spec = immich.spec.machine_learning.clone().unwrap_or_default();

    let replicas = spec.replicas.unwrap_or(1);
    let pod_labels = merge_string_maps(labels(immich, COMPONENT), spec.pod_labels.as_ref());

    let mut env = vec![
        env_var("TRANSFORMERS_CACHE", CACHE_MOUNT_PATH),
        env_var("HF_XET_CACHE", "/cache/huggingface-xet"),
        env_var("MPLCONFIGDIR", "/cache/matplotlib-config"),
    ];
    env.extend(spec.env.clone().unwrap_or_default());

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(immich.component_name(COMPONENT)),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            owner_references: Some(vec![owner_reference(immich)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
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
                        env: Some(env),
                        env_from: spec.env_from.clone(),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            container_port: PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        resources: spec.resources.clone(),
                        security_context: spec.security_context.clone(),
                        liveness_probe: Some(ping_probe(3)),
                        readiness_probe: Some(ping_probe(3)),
                        // 模型首次加载可能耗时数分钟
                        startup_probe: Some(ping_probe(60)),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "cache".to_string(),
                            mount_path: CACHE_MOUNT_PATH.to_string(),
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

/// 构建机器学习 Service
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
                name: Some("http".to_string()),
                port: PORT,
                target_port: Some(IntOrString::String("http".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 构建模型缓存 PVC
///
/// 缓存可重新下载，携带 owner reference 随 CR 级联删除。
pub fn cache_claim(immich: &Immich) -> PersistentVolumeClaim {
    let persistence = immich.machine_learning_persistence();

    let size = persistence
        .size
        .unwrap_or_else(|| Quantity(DEFAULT_CACHE_SIZE.to_string()));
    let access_modes = persistence
        .access_modes
        .filter(|modes| !modes.is_empty())
        .unwrap_or_else(|| vec!["ReadWriteOnce".to_string()]);

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(immich.component_name("ml-cache")),
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

/// 缓存卷：持久化启用（默认）时挂 PVC，否则回退为一次性 emptyDir
fn volumes(immich: &Immich) -> Vec<Volume> {
    if !immich.is_machine_learning_persistence_enabled() {
        return vec![Volume {
            name: "cache".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }];
    }

    let claim_name = immich
        .machine_learning_persistence()
        .existing_claim
        .filter(|claim| !claim.is_empty())
        .unwrap_or_else(|| immich.component_name("ml-cache"));
    vec![Volume {
        name: "cache".to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name,
            ..Default::default()
        }),
        ..Default::default()
    }]
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn ping_probe(failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/ping".to_string()),
            port: IntOrString::String("http".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(0),
        period_seconds: Some(10),
        timeout_seconds: Some(1),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ImmichSpec, MachineLearningSpec, PersistenceSpec};

    fn images() -> OperatorImages {
        OperatorImages {
            machine_learning: Some(
                "ghcr.io/immich-app/immich-machine-learning:v1.120.0".to_string(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn deployment_exposes_http_and_tolerates_slow_startup() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let deployment = deployment(&immich, &images()).unwrap();
        assert_eq!(
            deployment.metadata.name.as_deref(),
            Some("demo-machine-learning")
        );
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 3003);
        assert_eq!(
            container
                .startup_probe
                .as_ref()
                .unwrap()
                .failure_threshold,
            Some(60)
        );
        assert_eq!(
            container.liveness_probe.as_ref().unwrap().failure_threshold,
            Some(3)
        );
    }

    #[test]
    fn cache_env_precedes_user_env() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                machine_learning: Some(MachineLearningSpec {
                    env: Some(vec![env_var("MACHINE_LEARNING_WORKERS", "2")]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let deployment = deployment(&immich, &images()).unwrap();
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        assert_eq!(env[0].name, "TRANSFORMERS_CACHE");
        assert_eq!(env.last().unwrap().name, "MACHINE_LEARNING_WORKERS");
    }

    #[test]
    fn cache_volume_defaults_to_managed_claim() {
        let immich = Immich::new("demo", ImmichSpec::default());
        assert_eq!(
            volumes(&immich)[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "demo-ml-cache"
        );
    }

    #[test]
    fn cache_volume_falls_back_to_empty_dir_when_disabled() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                machine_learning: Some(MachineLearningSpec {
                    persistence: Some(PersistenceSpec {
                        enabled: Some(false),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        assert!(volumes(&immich)[0].empty_dir.is_some());
    }

    #[test]
    fn cache_claim_carries_owner_reference() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let pvc = cache_claim(&immich);
        assert_eq!(pvc.metadata.name.as_deref(), Some("demo-ml-cache"));
        assert!(pvc.metadata.owner_references.is_some());
        assert_eq!(
            pvc.spec
                .unwrap()
                .resources
                .unwrap()
                .requests
                .unwrap()
                .get("storage"),
            Some(&Quantity("10Gi".to_string()))
        );
    }
}

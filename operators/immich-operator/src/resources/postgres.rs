//! PostgreSQL 数据库组件构建模块
//!
//! 数据库以单副本 StatefulSet 运行，数据卷默认通过 volumeClaimTemplate
//! 管理。凭据 Secret 与数据卷同属持久层：凭据刻意不携带 owner
//! reference，与数据库数据保持一致的生命周期，CR 重建后密码不变。

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretKeySelector as CoreSecretKeySelector, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements,
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

const COMPONENT: &str = "postgres";
const PORT: i32 = 5432;
const DATA_MOUNT_PATH: &str = "/var/lib/postgresql/data";

/// 数据卷默认容量
const DEFAULT_DATA_SIZE: &str = "10Gi";

/// 构建数据库凭据 Secret
///
/// 仅在不存在时创建一次，之后原样复用——重新生成密码会让既有数据库
/// 无法登录。不携带 owner reference，与数据卷一起在 CR 删除后存活。
pub fn credentials_secret(immich: &Immich, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(immich.credentials_secret_name()),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([
            ("password".to_string(), password.to_string()),
            ("username".to_string(), immich.get_postgres_username()),
            ("database".to_string(), immich.get_postgres_database()),
        ])),
        ..Default::default()
    }
}

/// 构建 PostgreSQL StatefulSet
pub fn stateful_set(immich: &Immich, images: &OperatorImages) -> Result<StatefulSet> {
    let image = immich
        .get_postgres_image(images)
        .ok_or(Error::MissingImage(COMPONENT))?;
    let spec = immich.spec.postgres.clone().unwrap_or_default();
    let persistence = immich.postgres_persistence();

    let name = immich.component_name(COMPONENT);
    let pod_labels = merge_string_maps(labels(immich, COMPONENT), spec.pod_labels.as_ref());

    let password_ref = immich.postgres_password_secret_ref();
    let env = vec![
        EnvVar {
            name: "POSTGRES_USER".to_string(),
            value: Some(immich.get_postgres_username()),
            ..Default::default()
        },
        EnvVar {
            name: "POSTGRES_DB".to_string(),
            value: Some(immich.get_postgres_database()),
            ..Default::default()
        },
        EnvVar {
            name: "POSTGRES_INITDB_ARGS".to_string(),
            value: Some("--data-checksums".to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "POSTGRES_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(CoreSecretKeySelector {
                    name: Some(password_ref.name),
                    key: password_ref.key,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let existing_claim = persistence
        .existing_claim
        .clone()
        .filter(|claim| !claim.is_empty());

    // 既有 PVC 直接挂载；否则交给 volumeClaimTemplate 生成受管数据卷
    let volumes = existing_claim.as_ref().map(|claim| {
        vec![Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    let volume_claim_templates = if existing_claim.is_none() {
        let size = persistence
            .size
            .unwrap_or_else(|| Quantity(DEFAULT_DATA_SIZE.to_string()));
        let access_modes = persistence
            .access_modes
            .filter(|modes| !modes.is_empty())
            .unwrap_or_else(|| vec!["ReadWriteOnce".to_string()]);
        Some(vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                labels: Some(labels(immich, COMPONENT)),
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
        }])
    } else {
        None
    };

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: immich.namespace(),
            labels: Some(labels(immich, COMPONENT)),
            owner_references: Some(vec![owner_reference(immich)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(immich, COMPONENT)),
                ..Default::default()
            },
            service_name: name,
            volume_claim_templates,
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
                    volumes,
                    containers: vec![Container {
                        name: COMPONENT.to_string(),
                        image: Some(image),
                        image_pull_policy: spec.image_pull_policy.clone(),
                        env: Some(env),
                        ports: Some(vec![ContainerPort {
                            name: Some("postgres".to_string()),
                            container_port: PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "data".to_string(),
                            mount_path: DATA_MOUNT_PATH.to_string(),
                            ..Default::default()
                        }]),
                        resources: spec.resources.clone(),
                        security_context: spec.security_context.clone(),
                        readiness_probe: Some(ready_probe(immich, 5)),
                        liveness_probe: Some(ready_probe(immich, 30)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// 构建 PostgreSQL Service
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
                name: Some("postgres".to_string()),
                port: PORT,
                target_port: Some(IntOrString::String("postgres".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ready_probe(immich: &Immich, initial_delay_seconds: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "pg_isready".to_string(),
                "-U".to_string(),
                immich.get_postgres_username(),
                "-d".to_string(),
                immich.get_postgres_database(),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ImmichSpec, PersistenceSpec, PostgresSpec};

    fn images() -> OperatorImages {
        OperatorImages {
            postgres: Some("docker.io/tensorchord/pgvecto-rs:pg17-v0.4.0".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn credentials_secret_survives_instance_deletion() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let secret = credentials_secret(&immich, "s3cr3t");
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("demo-postgres-credentials")
        );
        // 没有 owner reference：删除 CR 不得连带清除凭据
        assert!(secret.metadata.owner_references.is_none());
        let data = secret.string_data.unwrap();
        assert_eq!(data.get("password").map(String::as_str), Some("s3cr3t"));
        assert_eq!(data.get("username").map(String::as_str), Some("immich"));
        assert_eq!(data.get("database").map(String::as_str), Some("immich"));
    }

    #[test]
    fn stateful_set_uses_volume_claim_template_by_default() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let sts = stateful_set(&immich, &images()).unwrap();
        assert_eq!(sts.metadata.name.as_deref(), Some("demo-postgres"));
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let templates = spec.volume_claim_templates.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].metadata.name.as_deref(), Some("data"));
        assert!(spec.template.spec.unwrap().volumes.is_none());
    }

    #[test]
    fn existing_claim_replaces_volume_claim_template() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                postgres: Some(PostgresSpec {
                    persistence: Some(PersistenceSpec {
                        existing_claim: Some("pgdata".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let spec = stateful_set(&immich, &images()).unwrap().spec.unwrap();
        assert!(spec.volume_claim_templates.is_none());
        let volumes = spec.template.spec.unwrap().volumes.unwrap();
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
            "pgdata"
        );
    }

    #[test]
    fn password_env_points_at_generated_secret() {
        let immich = Immich::new("demo", ImmichSpec::default());
        let sts = stateful_set(&immich, &images()).unwrap();
        let env = sts.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let password = env.iter().find(|e| e.name == "POSTGRES_PASSWORD").unwrap();
        let secret_ref = password
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(secret_ref.name.as_deref(), Some("demo-postgres-credentials"));
        assert_eq!(secret_ref.key, "password");
        assert!(env.iter().any(|e| e.name == "POSTGRES_INITDB_ARGS"
            && e.value.as_deref() == Some("--data-checksums")));
    }

    #[test]
    fn probes_run_pg_isready_with_effective_identity() {
        let immich = Immich::new(
            "demo",
            ImmichSpec {
                postgres: Some(PostgresSpec {
                    username: Some("photos".to_string()),
                    database: Some("photodb".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let probe = ready_probe(&immich, 5);
        assert_eq!(
            probe.exec.unwrap().command.unwrap(),
            vec!["pg_isready", "-U", "photos", "-d", "photodb"]
        );
        assert_eq!(probe.timeout_seconds, Some(5));
    }
}

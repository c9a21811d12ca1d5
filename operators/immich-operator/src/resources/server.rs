//! 服务端组件构建模块
//!
//! 服务端 Deployment 汇聚全部连接契约：缓存与数据库环境变量、渲染
//! 配置的只读挂载、照片库数据卷，以及可选的依赖等待 init 容器。

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    SecretKeySelector as CoreSecretKeySelector, SecretVolumeSource, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{ConfigurationKind, Immich, OperatorImages};
use crate::error::{Error, Result};
use crate::resources::config::{CONFIG_FILE_KEY, CONFIG_MOUNT_PATH};
use crate::resources::{labels, owner_reference, selector_labels};
use crate::utils::merge_string_maps;

const COMPONENT: &str = "server";
const PORT: i32 = 2283;
const METRICS_API_PORT: i32 = 8081;
const METRICS_MS_PORT: i32 = 8082;
const LIBRARY_MOUNT_PATH: &str = "/data";

/// 构建服务端 Deployment
pub fn deployment(immich: &Immich, images: &OperatorImages) -> Result<Deployment> {
    let image = immich
        .get_server_image(images)
        .ok_or(Error::MissingImage(COMPONENT))?;
    let spec = immich.spec.server.clone().unwrap_or_default();

    let replicas = spec.replicas.unwrap_or(1);
    let pod_labels = merge_string_maps(labels(immich, COMPONENT), spec.pod_labels.as_ref());

    let mut env = env(immich);
    env.extend(spec.env.clone().unwrap_or_default());

    let mut ports = vec![ContainerPort {
        name: Some("http".to_string()),
        container_port: PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if immich.is_metrics_enabled() {
        ports.push(ContainerPort {
            name: Some("metrics-api".to_string()),
            container_port: METRICS_API_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
        ports.push(ContainerPort {
            name: Some("metrics-ms".to_string()),
            container_port: METRICS_MS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    let init_containers = init_containers(immich, images);

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
                    init_containers: if init_containers.is_empty() {
                        None
                    } else {
                        Some(init_containers)
                    },
                    containers: vec![Container {
                        name: COMPONENT.to_string(),
                        image: Some(image),
                        image_pull_policy: spec.image_pull_policy.clone(),
                        env: Some(env),
                        env_from: spec.env_from.clone(),
                        ports: Some(ports),
                        resources: spec.resources.clone(),
                        security_context: spec.security_context.clone(),
                        liveness_probe: Some(ping_probe(3)),
                        readiness_probe: Some(ping_probe(3)),
                        startup_probe: Some(ping_probe(30)),
                        volume_mounts: Some(volume_mounts(immich)),
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

/// 构建服务端 Service
pub fn service(immich: &Immich) -> Service {
    let mut ports = vec![ServicePort {
        name: Some("http".to_string()),
        port: PORT,
        target_port: Some(IntOrString::String("http".to_string())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if immich.is_metrics_enabled() {
        ports.push(ServicePort {
            name: Some("metrics-api".to_string()),
            port: METRICS_API_PORT,
            target_port: Some(IntOrString::String("metrics-api".to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
        ports.push(ServicePort {
            name: Some("metrics-ms".to_string()),
            port: METRICS_MS_PORT,
            target_port: Some(IntOrString::String("metrics-ms".to_string())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

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
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 服务端环境变量契约
///
/// 缓存与数据库的连接信息全部由 Operator 推导；用户追加的变量由
/// 调用方拼接在末尾。
fn env(immich: &Immich) -> Vec<EnvVar> {
    let mut env = Vec::new();

    let valkey_spec = immich.spec.valkey.clone().unwrap_or_default();
    let postgres_spec = immich.spec.postgres.clone().unwrap_or_default();

    // 缓存连接：内置 Service 或外部地址
    if let Some(host) = immich.get_valkey_host() {
        env.push(value_env("REDIS_HOSTNAME", &host));
        env.push(value_env("REDIS_PORT", &immich.get_valkey_port().to_string()));
        if !immich.is_valkey_enabled() {
            if let Some(password_ref) = valkey_spec.password_secret_ref.as_ref() {
                env.push(secret_env(
                    "REDIS_PASSWORD",
                    &password_ref.name,
                    &password_ref.key,
                ));
            }
            if let Some(db_index) = valkey_spec.db_index.filter(|index| *index != 0) {
                env.push(value_env("REDIS_DBINDEX", &db_index.to_string()));
            }
        }
    }

    if immich.is_metrics_enabled() {
        env.push(value_env("IMMICH_TELEMETRY_INCLUDE", "all"));
    }

    // 配置始终渲染，配置文件路径始终注入
    env.push(value_env(
        "IMMICH_CONFIG_FILE",
        &format!("{CONFIG_MOUNT_PATH}/{CONFIG_FILE_KEY}"),
    ));

    // 数据库连接：完整连接串优先，否则分项注入
    if let Some(url_ref) = postgres_spec.url_secret_ref.as_ref() {
        env.push(secret_env("DB_URL", &url_ref.name, &url_ref.key));
    } else {
        env.push(value_env(
            "DB_HOSTNAME",
            &immich.get_postgres_host().unwrap_or_default(),
        ));
        env.push(value_env(
            "DB_PORT",
            &immich.get_postgres_port().to_string(),
        ));
        env.push(value_env("DB_DATABASE_NAME", &immich.get_postgres_database()));
        env.push(value_env("DB_USERNAME", &immich.get_postgres_username()));
        let password_ref = immich.postgres_password_secret_ref();
        env.push(secret_env("DB_PASSWORD", &password_ref.name, &password_ref.key));
    }

    env
}

/// 依赖等待 init 容器
///
/// 仅在配置了 init 镜像时生成；未配置不是错误，直接跳过。
fn init_containers(immich: &Immich, images: &OperatorImages) -> Vec<Container> {
    let Some(init_image) = images.init_container.as_ref() else {
        return Vec::new();
    };

    let mut containers = Vec::new();

    let postgres_host = immich
        .get_postgres_host()
        .unwrap_or_else(|| immich.component_name("postgres"));
    containers.push(wait_container(
        "wait-for-postgres",
        init_image,
        "PostgreSQL",
        &postgres_host,
        immich.get_postgres_port(),
    ));

    if let Some(valkey_host) = immich.get_valkey_host() {
        containers.push(wait_container(
            "wait-for-valkey",
            init_image,
            "Valkey",
            &valkey_host,
            immich.get_valkey_port(),
        ));
    }

    containers
}

fn wait_container(name: &str, image: &str, target: &str, host: &str, port: i32) -> Container {
    let script = format!(
        "echo \"Waiting for {target} at {host}:{port}...\"\n\
         until nc -z -w2 {host} {port}; do\n\
         \x20\x20echo \"{target} is unavailable - sleeping\"\n\
         \x20\x20sleep 2\n\
         done\n\
         echo \"{target} is up\""
    );
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        ..Default::default()
    }
}

fn volume_mounts(immich: &Immich) -> Vec<VolumeMount> {
    let mut mounts = Vec::new();

    if has_library_volume(immich) {
        mounts.push(VolumeMount {
            name: "library".to_string(),
            mount_path: LIBRARY_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    mounts.push(VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    });

    mounts
}

fn volumes(immich: &Immich) -> Vec<Volume> {
    let mut volumes = Vec::new();

    if has_library_volume(immich) {
        volumes.push(Volume {
            name: "library".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: immich.library_pvc_name(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let config_name = immich.config_name();
    volumes.push(match immich.get_configuration_kind() {
        ConfigurationKind::Secret => Volume {
            name: "config".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(config_name),
                ..Default::default()
            }),
            ..Default::default()
        },
        ConfigurationKind::ConfigMap => Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_name),
                ..Default::default()
            }),
            ..Default::default()
        },
    });

    volumes
}

/// 照片库卷在给定既有 PVC 或由 Operator 管理时挂载
fn has_library_volume(immich: &Immich) -> bool {
    immich
        .library_persistence()
        .existing_claim
        .filter(|claim| !claim.is_empty())
        .is_some()
        || immich.should_create_library_pvc()
}

fn value_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(CoreSecretKeySelector {
                name: Some(secret_name.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ping_probe(failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/api/server/ping".to_string()),
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

//! 自定义资源定义模块
//!
//! 该模块定义 Immich 自定义资源：spec 描述一套照片管理部署的期望状态
//! （服务端、机器学习、Valkey 缓存、PostgreSQL 数据库及共享配置），
//! status 记录各组件就绪情况与对外访问地址。
//!
//! spec 中所有字段均为显式 `Option`，默认值统一通过配套的
//! 取值方法（`is_*_enabled` / `get_*`）编码，避免零值与缺省混淆。

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, EnvFromSource, EnvVar, LocalObjectReference, PodSecurityContext,
    ResourceRequirements, SecurityContext, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, ResourceExt};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 默认镜像的环境变量名，随 Operator 部署注入
pub const ENV_RELATED_IMAGE_SERVER: &str = "RELATED_IMAGE_immich_server";
pub const ENV_RELATED_IMAGE_MACHINE_LEARNING: &str = "RELATED_IMAGE_immich_machine_learning";
pub const ENV_RELATED_IMAGE_VALKEY: &str = "RELATED_IMAGE_valkey";
pub const ENV_RELATED_IMAGE_POSTGRES: &str = "RELATED_IMAGE_postgres";
pub const ENV_RELATED_IMAGE_INIT_CONTAINER: &str = "RELATED_IMAGE_init_container";

/// 进程级默认镜像配置
///
/// 启动时从环境变量解析一次，之后只读。构建函数通过显式参数接收，
/// 保持纯函数便于测试。
pub static DEFAULT_IMAGES: Lazy<OperatorImages> = Lazy::new(OperatorImages::from_env);

/// Operator 注入的默认镜像集合
#[derive(Clone, Debug, Default)]
pub struct OperatorImages {
    pub server: Option<String>,
    pub machine_learning: Option<String>,
    pub valkey: Option<String>,
    pub postgres: Option<String>,
    pub init_container: Option<String>,
}

impl OperatorImages {
    /// 从 RELATED_IMAGE_* 环境变量解析默认镜像，空值视为未配置
    pub fn from_env() -> Self {
        fn non_empty(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|value| !value.is_empty())
        }

        Self {
            server: non_empty(ENV_RELATED_IMAGE_SERVER),
            machine_learning: non_empty(ENV_RELATED_IMAGE_MACHINE_LEARNING),
            valkey: non_empty(ENV_RELATED_IMAGE_VALKEY),
            postgres: non_empty(ENV_RELATED_IMAGE_POSTGRES),
            init_container: non_empty(ENV_RELATED_IMAGE_INIT_CONTAINER),
        }
    }
}

/// Immich 实例规约
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "immich.io", version = "v1alpha1", kind = "Immich", namespaced)]
#[kube(status = "ImmichStatus")]
#[kube(printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#)]
#[kube(printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#)]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ImmichSpec {
    /// 服务端组件配置
    pub server: Option<ServerSpec>,

    /// 机器学习组件配置
    pub machine_learning: Option<MachineLearningSpec>,

    /// Valkey 缓存组件配置
    pub valkey: Option<ValkeySpec>,

    /// PostgreSQL 数据库组件配置
    pub postgres: Option<PostgresSpec>,

    /// Immich 应用级设置（配置文件、指标、持久化）
    pub immich: Option<ImmichSettings>,

    /// 拉取镜像使用的 Secret 列表
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
}

/// 服务端组件规约
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// 是否部署内置服务端，未设置时默认启用
    pub enabled: Option<bool>,

    /// 镜像引用，未设置时回退到 Operator 注入的默认镜像
    pub image: Option<String>,

    /// 镜像拉取策略
    pub image_pull_policy: Option<String>,

    /// 副本数，默认 1
    pub replicas: Option<i32>,

    /// 容器资源请求与限制
    pub resources: Option<ResourceRequirements>,

    /// 追加的环境变量，排在 Operator 生成的变量之后
    pub env: Option<Vec<EnvVar>>,

    /// 批量引入环境变量的来源
    pub env_from: Option<Vec<EnvFromSource>>,

    /// 调度约束
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,

    /// Pod 级与容器级安全上下文
    pub pod_security_context: Option<PodSecurityContext>,
    pub security_context: Option<SecurityContext>,

    /// 追加到 Pod 模板的标签与注解（不影响 selector）
    pub pod_labels: Option<BTreeMap<String, String>>,
    pub pod_annotations: Option<BTreeMap<String, String>>,

    /// Ingress 配置，仅显式启用时创建
    pub ingress: Option<IngressSpec>,

    /// OpenShift Route 配置，未设置时按集群能力自动判断
    pub route: Option<RouteSpec>,
}

/// 机器学习组件规约
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineLearningSpec {
    /// 是否部署内置机器学习服务，未设置时默认启用
    pub enabled: Option<bool>,

    /// 外部机器学习服务地址（内置禁用时可选配置）
    pub url: Option<String>,

    pub image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub replicas: Option<i32>,
    pub resources: Option<ResourceRequirements>,
    pub env: Option<Vec<EnvVar>>,
    pub env_from: Option<Vec<EnvFromSource>>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,
    pub pod_security_context: Option<PodSecurityContext>,
    pub security_context: Option<SecurityContext>,
    pub pod_labels: Option<BTreeMap<String, String>>,
    pub pod_annotations: Option<BTreeMap<String, String>>,

    /// 模型缓存持久化，未设置时默认启用
    pub persistence: Option<PersistenceSpec>,
}

/// Valkey 缓存组件规约
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValkeySpec {
    /// 是否部署内置 Valkey，未设置时默认启用
    pub enabled: Option<bool>,

    /// 外部 Valkey 地址（内置禁用时必填）
    pub host: Option<String>,

    /// 外部 Valkey 端口，默认 6379
    pub port: Option<i32>,

    /// 外部 Valkey 密码引用
    pub password_secret_ref: Option<SecretKeySelector>,

    /// 外部 Valkey 数据库序号
    pub db_index: Option<i32>,

    pub image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,
    pub pod_security_context: Option<PodSecurityContext>,
    pub security_context: Option<SecurityContext>,
    pub pod_labels: Option<BTreeMap<String, String>>,
    pub pod_annotations: Option<BTreeMap<String, String>>,

    /// 缓存数据持久化，未设置时默认关闭
    pub persistence: Option<PersistenceSpec>,
}

/// PostgreSQL 数据库组件规约
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresSpec {
    /// 是否部署内置 PostgreSQL，未设置时默认启用
    pub enabled: Option<bool>,

    /// 外部数据库地址（内置禁用时必填）
    pub host: Option<String>,

    /// 数据库端口，默认 5432
    pub port: Option<i32>,

    /// 数据库名，默认 immich
    pub database: Option<String>,

    /// 数据库用户名，默认 immich
    pub username: Option<String>,

    /// 数据库密码引用；内置数据库未配置时由 Operator 生成
    pub password_secret_ref: Option<SecretKeySelector>,

    /// 完整连接串引用，配置后优先于分项连接信息
    pub url_secret_ref: Option<SecretKeySelector>,

    pub image: Option<String>,
    pub image_pull_policy: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub tolerations: Option<Vec<Toleration>>,
    pub affinity: Option<Affinity>,
    pub pod_security_context: Option<PodSecurityContext>,
    pub security_context: Option<SecurityContext>,
    pub pod_labels: Option<BTreeMap<String, String>>,
    pub pod_annotations: Option<BTreeMap<String, String>>,

    /// 数据持久化（volumeClaimTemplate 或既有 PVC）
    pub persistence: Option<PersistenceSpec>,
}

/// Immich 应用级设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImmichSettings {
    /// 用户自由配置块，与 Operator 推导的基础配置深度合并后渲染
    #[schemars(schema_with = "arbitrary_document_schema")]
    pub configuration: Option<serde_json::Value>,

    /// 渲染后的配置存放类型，默认 ConfigMap
    pub configuration_kind: Option<ConfigurationKind>,

    /// 指标采集开关
    pub metrics: Option<MetricsSpec>,

    /// 持久化设置
    pub persistence: Option<ImmichPersistence>,
}

/// 渲染配置的载体类型
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConfigurationKind {
    #[default]
    ConfigMap,
    Secret,
}

/// 指标采集设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    /// 启用后服务端暴露 metrics 端口并开启遥测
    pub enabled: Option<bool>,
}

/// 应用持久化设置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImmichPersistence {
    /// 照片库存储
    pub library: Option<PersistenceSpec>,
}

/// 通用持久化子规约
///
/// existingClaim 与按大小生成的请求互斥：给定既有 PVC 时其余字段忽略。
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    pub enabled: Option<bool>,
    pub existing_claim: Option<String>,
    pub size: Option<Quantity>,
    pub storage_class: Option<String>,
    pub access_modes: Option<Vec<String>>,
}

/// Secret 键引用
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

/// Ingress 配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// 仅显式启用时创建 Ingress
    pub enabled: Option<bool>,
    pub ingress_class_name: Option<String>,
    pub annotations: Option<BTreeMap<String, String>>,
    pub hosts: Option<Vec<IngressHostSpec>>,
    pub tls: Option<Vec<IngressTlsSpec>>,
}

/// Ingress 主机规则
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressHostSpec {
    pub host: Option<String>,
    pub paths: Option<Vec<IngressPathSpec>>,
}

/// Ingress 路径规则
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressPathSpec {
    /// 路径，默认 "/"
    pub path: Option<String>,
    /// Prefix、Exact 或 ImplementationSpecific，默认 Prefix
    pub path_type: Option<String>,
}

/// Ingress TLS 配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsSpec {
    pub hosts: Option<Vec<String>>,
    pub secret_name: Option<String>,
}

/// OpenShift Route 配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// 显式开关；未设置时在检测到 Route API 的集群上自动创建
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub annotations: Option<BTreeMap<String, String>>,
    pub labels: Option<BTreeMap<String, String>>,
    /// 通配策略，默认 None
    pub wildcard_policy: Option<String>,
    pub tls: Option<RouteTlsSpec>,
}

/// OpenShift Route TLS 配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTlsSpec {
    /// 终止方式，默认 edge
    pub termination: Option<String>,
    /// 明文访问策略，默认 Redirect
    pub insecure_edge_termination_policy: Option<String>,
    pub certificate: Option<String>,
    pub key: Option<String>,
    pub ca_certificate: Option<String>,
    pub destination_ca_certificate: Option<String>,
}

/// Immich 实例状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImmichStatus {
    /// 所有适用组件是否全部就绪
    pub ready: bool,
    pub server_ready: bool,
    pub machine_learning_ready: bool,
    pub valkey_ready: bool,
    pub postgres_ready: bool,

    /// 状态条件列表，按 type 去重更新
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,

    /// 最近一次处理完成的 generation
    pub observed_generation: Option<i64>,

    /// 对外访问地址，未暴露时为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// 服务端镜像标签
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// 用户自由配置块的 CRD schema：保留未知字段
fn arbitrary_document_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    }))
    .unwrap()
}

/// 条件列表的 CRD schema：按 type 作为 map key
fn conditions_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        },
        "x-kubernetes-list-type": "map",
        "x-kubernetes-list-map-keys": ["type"]
    }))
    .unwrap()
}

impl Immich {
    /// 子对象的确定性命名：`<实例名>-<组件名>`
    pub fn component_name(&self, component: &str) -> String {
        format!("{}-{}", self.name_any(), component)
    }

    pub fn is_server_enabled(&self) -> bool {
        self.spec
            .server
            .as_ref()
            .and_then(|s| s.enabled)
            .unwrap_or(true)
    }

    pub fn is_machine_learning_enabled(&self) -> bool {
        self.spec
            .machine_learning
            .as_ref()
            .and_then(|ml| ml.enabled)
            .unwrap_or(true)
    }

    pub fn is_valkey_enabled(&self) -> bool {
        self.spec
            .valkey
            .as_ref()
            .and_then(|v| v.enabled)
            .unwrap_or(true)
    }

    pub fn is_postgres_enabled(&self) -> bool {
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.enabled)
            .unwrap_or(true)
    }

    pub fn is_metrics_enabled(&self) -> bool {
        self.spec
            .immich
            .as_ref()
            .and_then(|i| i.metrics.as_ref())
            .and_then(|m| m.enabled)
            .unwrap_or(false)
    }

    /// Ingress 仅在显式启用时创建
    pub fn is_ingress_enabled(&self) -> bool {
        self.spec
            .server
            .as_ref()
            .and_then(|s| s.ingress.as_ref())
            .and_then(|i| i.enabled)
            .unwrap_or(false)
    }

    /// Route 的创建决策：显式开关优先，否则跟随集群是否提供 Route API
    pub fn should_create_route(&self, route_api_available: bool) -> bool {
        if !self.is_server_enabled() {
            return false;
        }
        self.spec
            .server
            .as_ref()
            .and_then(|s| s.route.as_ref())
            .and_then(|r| r.enabled)
            .unwrap_or(route_api_available)
    }

    /// 镜像解析顺序：spec 显式值优先，其次 Operator 注入的默认值
    pub fn get_server_image(&self, images: &OperatorImages) -> Option<String> {
        self.spec
            .server
            .as_ref()
            .and_then(|s| s.image.clone())
            .or_else(|| images.server.clone())
    }

    pub fn get_machine_learning_image(&self, images: &OperatorImages) -> Option<String> {
        self.spec
            .machine_learning
            .as_ref()
            .and_then(|ml| ml.image.clone())
            .or_else(|| images.machine_learning.clone())
    }

    pub fn get_valkey_image(&self, images: &OperatorImages) -> Option<String> {
        self.spec
            .valkey
            .as_ref()
            .and_then(|v| v.image.clone())
            .or_else(|| images.valkey.clone())
    }

    pub fn get_postgres_image(&self, images: &OperatorImages) -> Option<String> {
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.image.clone())
            .or_else(|| images.postgres.clone())
    }

    /// 缓存地址：内置启用时为内置 Service 名，否则取外部地址
    pub fn get_valkey_host(&self) -> Option<String> {
        if self.is_valkey_enabled() {
            return Some(self.component_name("valkey"));
        }
        self.spec
            .valkey
            .as_ref()
            .and_then(|v| v.host.clone())
            .filter(|h| !h.is_empty())
    }

    pub fn get_valkey_port(&self) -> i32 {
        if self.is_valkey_enabled() {
            return 6379;
        }
        self.spec
            .valkey
            .as_ref()
            .and_then(|v| v.port)
            .filter(|p| *p != 0)
            .unwrap_or(6379)
    }

    /// 数据库地址：内置启用时为内置 Service 名，否则取外部地址
    pub fn get_postgres_host(&self) -> Option<String> {
        if self.is_postgres_enabled() {
            return Some(self.component_name("postgres"));
        }
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.host.clone())
            .filter(|h| !h.is_empty())
    }

    pub fn get_postgres_port(&self) -> i32 {
        if self.is_postgres_enabled() {
            return 5432;
        }
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.port)
            .filter(|p| *p != 0)
            .unwrap_or(5432)
    }

    pub fn get_postgres_database(&self) -> String {
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.database.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "immich".to_string())
    }

    pub fn get_postgres_username(&self) -> String {
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.username.clone())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "immich".to_string())
    }

    /// 生成的数据库凭据 Secret 名
    pub fn credentials_secret_name(&self) -> String {
        self.component_name("postgres-credentials")
    }

    /// 数据库密码引用：用户提供的优先，否则指向生成的凭据 Secret
    pub fn postgres_password_secret_ref(&self) -> SecretKeySelector {
        if let Some(user_ref) = self
            .spec
            .postgres
            .as_ref()
            .and_then(|p| p.password_secret_ref.clone())
        {
            return user_ref;
        }
        SecretKeySelector {
            name: self.credentials_secret_name(),
            key: "password".to_string(),
        }
    }

    /// 机器学习服务地址：内置启用时为内置 Service URL，否则取外部 URL
    pub fn get_machine_learning_url(&self) -> Option<String> {
        if self.is_machine_learning_enabled() {
            return Some(format!(
                "http://{}:3003",
                self.component_name("machine-learning")
            ));
        }
        self.spec
            .machine_learning
            .as_ref()
            .and_then(|ml| ml.url.clone())
            .filter(|u| !u.is_empty())
    }

    /// 配置文件视角的 ML 开关：内置启用或配置了外部 URL 即视为可用
    pub fn machine_learning_config_enabled(&self) -> bool {
        self.is_machine_learning_enabled() || self.get_machine_learning_url().is_some()
    }

    /// 模型缓存持久化默认启用
    pub fn is_machine_learning_persistence_enabled(&self) -> bool {
        self.machine_learning_persistence()
            .enabled
            .unwrap_or(true)
    }

    pub fn machine_learning_persistence(&self) -> PersistenceSpec {
        self.spec
            .machine_learning
            .as_ref()
            .and_then(|ml| ml.persistence.clone())
            .unwrap_or_default()
    }

    /// 缓存数据持久化：显式启用或给定既有 PVC 时生效
    pub fn is_valkey_persistence_enabled(&self) -> bool {
        let persistence = self.valkey_persistence();
        persistence.enabled.unwrap_or(false) || persistence.existing_claim.is_some()
    }

    pub fn valkey_persistence(&self) -> PersistenceSpec {
        self.spec
            .valkey
            .as_ref()
            .and_then(|v| v.persistence.clone())
            .unwrap_or_default()
    }

    pub fn postgres_persistence(&self) -> PersistenceSpec {
        self.spec
            .postgres
            .as_ref()
            .and_then(|p| p.persistence.clone())
            .unwrap_or_default()
    }

    pub fn library_persistence(&self) -> PersistenceSpec {
        self.spec
            .immich
            .as_ref()
            .and_then(|i| i.persistence.as_ref())
            .and_then(|p| p.library.clone())
            .unwrap_or_default()
    }

    /// 照片库 PVC 名：既有 PVC 优先，否则由 Operator 管理的确定性命名
    pub fn library_pvc_name(&self) -> String {
        self.library_persistence()
            .existing_claim
            .filter(|claim| !claim.is_empty())
            .unwrap_or_else(|| self.component_name("library"))
    }

    /// 未指定既有 PVC 时，由 Operator 创建并持有照片库存储
    pub fn should_create_library_pvc(&self) -> bool {
        self.library_persistence()
            .existing_claim
            .filter(|claim| !claim.is_empty())
            .is_none()
    }

    /// 渲染配置对象名
    pub fn config_name(&self) -> String {
        self.component_name("immich-config")
    }

    pub fn get_configuration_kind(&self) -> ConfigurationKind {
        self.spec
            .immich
            .as_ref()
            .and_then(|i| i.configuration_kind.clone())
            .unwrap_or_default()
    }

    /// 服务端镜像标签，用于 status.version
    pub fn get_image_tag(&self, images: &OperatorImages) -> Option<String> {
        let image = self.get_server_image(images)?;
        let tail = image.rsplit('/').next().unwrap_or(image.as_str());
        tail.split_once(':').map(|(_, tag)| tag.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(spec: ImmichSpec) -> Immich {
        Immich::new("demo", spec)
    }

    fn images() -> OperatorImages {
        OperatorImages {
            server: Some("ghcr.io/immich-app/immich-server:v1.120.0".to_string()),
            machine_learning: Some(
                "ghcr.io/immich-app/immich-machine-learning:v1.120.0".to_string(),
            ),
            valkey: Some("docker.io/valkey/valkey:9-alpine".to_string()),
            postgres: Some("docker.io/tensorchord/pgvecto-rs:pg17-v0.4.0".to_string()),
            init_container: None,
        }
    }

    #[test]
    fn components_default_to_enabled() {
        let immich = instance(ImmichSpec::default());
        assert!(immich.is_server_enabled());
        assert!(immich.is_machine_learning_enabled());
        assert!(immich.is_valkey_enabled());
        assert!(immich.is_postgres_enabled());
    }

    #[test]
    fn explicit_disable_wins_over_default() {
        let immich = instance(ImmichSpec {
            valkey: Some(ValkeySpec {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(!immich.is_valkey_enabled());
    }

    #[test]
    fn image_resolution_prefers_spec_over_default() {
        let immich = instance(ImmichSpec {
            server: Some(ServerSpec {
                image: Some("registry.example.com/immich:custom".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            immich.get_server_image(&images()),
            Some("registry.example.com/immich:custom".to_string())
        );
        assert_eq!(
            instance(ImmichSpec::default()).get_server_image(&images()),
            Some("ghcr.io/immich-app/immich-server:v1.120.0".to_string())
        );
        assert_eq!(
            instance(ImmichSpec::default()).get_server_image(&OperatorImages::default()),
            None
        );
    }

    #[test]
    fn valkey_host_switches_between_builtin_and_external() {
        let builtin = instance(ImmichSpec::default());
        assert_eq!(builtin.get_valkey_host(), Some("demo-valkey".to_string()));

        let external = instance(ImmichSpec {
            valkey: Some(ValkeySpec {
                enabled: Some(false),
                host: Some("redis.example.com".to_string()),
                port: Some(6380),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            external.get_valkey_host(),
            Some("redis.example.com".to_string())
        );
        assert_eq!(external.get_valkey_port(), 6380);
    }

    #[test]
    fn postgres_defaults_apply_for_builtin() {
        let immich = instance(ImmichSpec::default());
        assert_eq!(immich.get_postgres_host(), Some("demo-postgres".to_string()));
        assert_eq!(immich.get_postgres_port(), 5432);
        assert_eq!(immich.get_postgres_database(), "immich");
        assert_eq!(immich.get_postgres_username(), "immich");
        assert_eq!(
            immich.postgres_password_secret_ref(),
            SecretKeySelector {
                name: "demo-postgres-credentials".to_string(),
                key: "password".to_string(),
            }
        );
    }

    #[test]
    fn user_password_ref_skips_generated_credentials() {
        let immich = instance(ImmichSpec {
            postgres: Some(PostgresSpec {
                password_secret_ref: Some(SecretKeySelector {
                    name: "my-secret".to_string(),
                    key: "pw".to_string(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            immich.postgres_password_secret_ref(),
            SecretKeySelector {
                name: "my-secret".to_string(),
                key: "pw".to_string(),
            }
        );
    }

    #[test]
    fn machine_learning_url_prefers_builtin_service() {
        let immich = instance(ImmichSpec::default());
        assert_eq!(
            immich.get_machine_learning_url(),
            Some("http://demo-machine-learning:3003".to_string())
        );

        let external = instance(ImmichSpec {
            machine_learning: Some(MachineLearningSpec {
                enabled: Some(false),
                url: Some("http://ml.example.com:3003".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            external.get_machine_learning_url(),
            Some("http://ml.example.com:3003".to_string())
        );
        assert!(external.machine_learning_config_enabled());

        let disabled = instance(ImmichSpec {
            machine_learning: Some(MachineLearningSpec {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(disabled.get_machine_learning_url(), None);
        assert!(!disabled.machine_learning_config_enabled());
    }

    #[test]
    fn library_pvc_name_prefers_existing_claim() {
        let immich = instance(ImmichSpec::default());
        assert_eq!(immich.library_pvc_name(), "demo-library");
        assert!(immich.should_create_library_pvc());

        let with_claim = instance(ImmichSpec {
            immich: Some(ImmichSettings {
                persistence: Some(ImmichPersistence {
                    library: Some(PersistenceSpec {
                        existing_claim: Some("photos".to_string()),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(with_claim.library_pvc_name(), "photos");
        assert!(!with_claim.should_create_library_pvc());
    }

    #[test]
    fn valkey_persistence_requires_explicit_opt_in() {
        assert!(!instance(ImmichSpec::default()).is_valkey_persistence_enabled());

        let enabled = instance(ImmichSpec {
            valkey: Some(ValkeySpec {
                persistence: Some(PersistenceSpec {
                    enabled: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(enabled.is_valkey_persistence_enabled());
    }

    #[test]
    fn machine_learning_persistence_defaults_on() {
        assert!(instance(ImmichSpec::default()).is_machine_learning_persistence_enabled());

        let disabled = instance(ImmichSpec {
            machine_learning: Some(MachineLearningSpec {
                persistence: Some(PersistenceSpec {
                    enabled: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(!disabled.is_machine_learning_persistence_enabled());
    }

    #[test]
    fn image_tag_extraction_ignores_registry_port() {
        let immich = instance(ImmichSpec {
            server: Some(ServerSpec {
                image: Some("registry.example.com:5000/immich-server:v1.2.3".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            immich.get_image_tag(&OperatorImages::default()),
            Some("v1.2.3".to_string())
        );

        let untagged = instance(ImmichSpec {
            server: Some(ServerSpec {
                image: Some("registry.example.com:5000/immich-server".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(untagged.get_image_tag(&OperatorImages::default()), None);
    }

    #[test]
    fn route_decision_follows_api_availability_unless_explicit() {
        let auto = instance(ImmichSpec::default());
        assert!(auto.should_create_route(true));
        assert!(!auto.should_create_route(false));

        let forced = instance(ImmichSpec {
            server: Some(ServerSpec {
                route: Some(RouteSpec {
                    enabled: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(forced.should_create_route(false));
    }
}

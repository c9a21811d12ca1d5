//! 状态聚合模块
//!
//! 每轮协调末尾执行：按确定性命名读取各启用组件的工作负载，折叠出
//! 就绪标记；被禁用的组件视为天然就绪，不阻塞整体状态。对象不存在
//! 记为未就绪而非错误，其余查询失败向上传播。另有一趟独立推导对外
//! 访问地址（Route 优先于 Ingress）。

use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::Api;
use kube::core::DynamicObject;
use kube::{Client, ResourceExt};
use serde_json::Value;

use crate::crd::Immich;
use crate::error::{Error, Result};
use crate::resources::network;

/// 条件类型
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEGRADED: &str = "Degraded";

/// 一轮状态轮询得到的各组件就绪快照
#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentHealth {
    pub server_ready: bool,
    pub machine_learning_ready: bool,
    pub valkey_ready: bool,
    pub postgres_ready: bool,
}

impl ComponentHealth {
    /// 整体就绪 = 所有适用组件就绪的逻辑与
    pub fn all_ready(&self) -> bool {
        self.server_ready && self.machine_learning_ready && self.valkey_ready && self.postgres_ready
    }
}

/// 工作负载就绪判定：就绪副本数大于零且等于期望副本数
pub fn workload_ready(replicas: Option<i32>, ready_replicas: Option<i32>) -> bool {
    let ready = ready_replicas.unwrap_or(0);
    ready > 0 && Some(ready) == replicas
}

/// 轮询各启用组件的实际工作负载并聚合就绪状态
pub async fn component_health(client: &Client, immich: &Immich) -> Result<ComponentHealth> {
    let namespace = immich
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let stateful_sets: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);

    let server_ready = if immich.is_server_enabled() {
        deployment_ready(&deployments, &immich.component_name("server")).await?
    } else {
        true
    };

    let machine_learning_ready = if immich.is_machine_learning_enabled() {
        deployment_ready(&deployments, &immich.component_name("machine-learning")).await?
    } else {
        true
    };

    let valkey_ready = if immich.is_valkey_enabled() {
        deployment_ready(&deployments, &immich.component_name("valkey")).await?
    } else {
        true
    };

    let postgres_ready = if immich.is_postgres_enabled() {
        stateful_set_ready(&stateful_sets, &immich.component_name("postgres")).await?
    } else {
        true
    };

    Ok(ComponentHealth {
        server_ready,
        machine_learning_ready,
        valkey_ready,
        postgres_ready,
    })
}

async fn deployment_ready(api: &Api<Deployment>, name: &str) -> Result<bool> {
    Ok(api
        .get_opt(name)
        .await?
        .and_then(|deployment| deployment.status)
        .map(|status| workload_ready(status.replicas, status.ready_replicas))
        .unwrap_or(false))
}

async fn stateful_set_ready(api: &Api<StatefulSet>, name: &str) -> Result<bool> {
    Ok(api
        .get_opt(name)
        .await?
        .and_then(|stateful_set| stateful_set.status)
        .map(|status| workload_ready(Some(status.replicas), status.ready_replicas))
        .unwrap_or(false))
}

/// 推导对外访问地址
///
/// Route 的实际分配地址优先，其次 Ingress；两者都未暴露主机时清空。
pub async fn external_url(
    client: &Client,
    immich: &Immich,
    route_api_available: bool,
) -> Result<Option<String>> {
    let namespace = immich
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = immich.component_name("server");

    if route_api_available {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), &namespace, &network::route_api_resource());
        if let Some(route) = routes.get_opt(&name).await? {
            if let Some(url) = url_from_route(&route) {
                return Ok(Some(url));
            }
        }
    }

    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), &namespace);
    if let Some(ingress) = ingresses.get_opt(&name).await? {
        if let Some(url) = url_from_ingress(&ingress) {
            return Ok(Some(url));
        }
    }

    Ok(None)
}

/// 从 Route 推导地址：实际分配的主机优先，回退到声明主机
pub fn url_from_route(route: &DynamicObject) -> Option<String> {
    let data = &route.data;
    let host = data
        .pointer("/status/ingress/0/host")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .or_else(|| {
            data.pointer("/spec/host")
                .and_then(Value::as_str)
                .filter(|host| !host.is_empty())
        })?;
    let tls = data
        .pointer("/spec/tls")
        .map_or(false, |tls| !tls.is_null());
    Some(format!(
        "{}://{}",
        if tls { "https" } else { "http" },
        host
    ))
}

/// 从 Ingress 推导地址：负载均衡器分配的主机/IP 优先，回退到规则主机
pub fn url_from_ingress(ingress: &Ingress) -> Option<String> {
    let host = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.hostname.clone().or_else(|| entry.ip.clone()))
        .filter(|host| !host.is_empty())
        .or_else(|| {
            ingress
                .spec
                .as_ref()
                .and_then(|spec| spec.rules.as_ref())
                .and_then(|rules| rules.first())
                .and_then(|rule| rule.host.clone())
                .filter(|host| !host.is_empty())
        })?;
    let tls = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.tls.as_ref())
        .map_or(false, |tls| !tls.is_empty());
    Some(format!(
        "{}://{}",
        if tls { "https" } else { "http" },
        host
    ))
}

/// 按 type 更新或插入状态条件
///
/// 仅在 status 值翻转时刷新 lastTransitionTime，保持条件历史可读。
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    value: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let status = if value { "True" } else { "False" };
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = Time(Utc::now());
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = observed_generation;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation,
        }),
    }
}

/// 按 type 移除状态条件
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

//! 资源协调模块
//!
//! 单次协调同步执行：finalizer 生命周期 → 规约校验 → 按依赖顺序
//! （照片库 → 配置 → 数据库 → 缓存 → 机器学习 → 服务端）收敛各组件
//! → 聚合状态写回。组件间错误互不阻塞，全部收集后统一上报；
//! 失败 30 秒后重试，稳态每 5 分钟复查一次漂移。

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::apply::{apply, create_if_absent, FIELD_MANAGER};
use crate::controller::Context;
use crate::crd::{ConfigurationKind, Immich, ImmichStatus};
use crate::error::{Error, Result};
use crate::resources::{config, library, machine_learning, network, postgres, server, valkey};
use crate::status::{self, CONDITION_DEGRADED, CONDITION_PROGRESSING, CONDITION_READY};
use crate::utils::generate_random_password;
use crate::validation;

/// Immich CR 的 finalizer 标识
pub const FINALIZER: &str = "immich.io/finalizer";

/// 失败后的固定退避
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// 稳态下的例行复查间隔
const STEADY_REQUEUE: Duration = Duration::from_secs(300);

/// 生成数据库密码的长度
const GENERATED_PASSWORD_LENGTH: usize = 32;

/// 单个 Immich 实例的一轮协调
pub async fn reconcile(immich: Arc<Immich>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = immich
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = immich.name_any();
    let api: Api<Immich> = Api::namespaced(ctx.client.clone(), &namespace);

    // 删除流程：短生命周期对象由 owner reference 级联回收，
    // 照片库 PVC 与数据库凭据刻意保留
    if immich.meta().deletion_timestamp.is_some() {
        if has_finalizer(&immich) {
            info!(name = %name, "清理 Immich 实例，持久数据保留");
            remove_finalizer(&api, &immich).await?;
        }
        return Ok(Action::await_change());
    }

    // 第一次见到实例：先把 finalizer 持久化，本轮不做其他工作，
    // 确保任何持久对象创建之前 finalizer 已经落盘
    if !has_finalizer(&immich) {
        add_finalizer(&api, &immich).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let generation = immich.meta().generation;
    let mut status = immich.status.clone().unwrap_or_default();

    // 校验失败直接短路，不对无效规约做任何对象变更
    if let Err(validation_error) = validation::validate(&immich, &ctx.images) {
        warn!(name = %name, error = %validation_error, "规约校验失败");
        status.ready = false;
        status::set_condition(
            &mut status.conditions,
            CONDITION_DEGRADED,
            true,
            "InvalidSpec",
            &validation_error.to_string(),
            generation,
        );
        status::set_condition(
            &mut status.conditions,
            CONDITION_READY,
            false,
            "InvalidSpec",
            "Spec validation failed",
            generation,
        );
        publish_status(&api, &name, &status).await?;
        return Ok(Action::requeue(ERROR_REQUEUE));
    }
    status::remove_condition(&mut status.conditions, CONDITION_DEGRADED);
    status::set_condition(
        &mut status.conditions,
        CONDITION_PROGRESSING,
        true,
        "Reconciling",
        "Reconciling Immich resources",
        generation,
    );

    // 按依赖顺序收敛，单个组件失败不阻塞其余组件
    let mut errors: Vec<Error> = Vec::new();

    if immich.is_server_enabled() && immich.should_create_library_pvc() {
        if let Err(err) = reconcile_library(&ctx, &immich, &namespace).await {
            error!(name = %name, error = %err, "照片库存储协调失败");
            errors.push(err);
        }
    }

    if let Err(err) = reconcile_config(&ctx, &immich, &namespace).await {
        error!(name = %name, error = %err, "渲染配置协调失败");
        errors.push(err);
    }

    if immich.is_postgres_enabled() {
        if let Err(err) = reconcile_postgres(&ctx, &immich, &namespace).await {
            error!(name = %name, error = %err, "PostgreSQL 协调失败");
            errors.push(err);
        }
    }

    if immich.is_valkey_enabled() {
        if let Err(err) = reconcile_valkey(&ctx, &immich, &namespace).await {
            error!(name = %name, error = %err, "Valkey 协调失败");
            errors.push(err);
        }
    }

    if immich.is_machine_learning_enabled() {
        if let Err(err) = reconcile_machine_learning(&ctx, &immich, &namespace).await {
            error!(name = %name, error = %err, "机器学习协调失败");
            errors.push(err);
        }
    }

    if immich.is_server_enabled() {
        if let Err(err) = reconcile_server(&ctx, &immich, &namespace).await {
            error!(name = %name, error = %err, "服务端协调失败");
            errors.push(err);
        }
    }

    // 无论组件是否失败都刷新状态
    match status::component_health(&ctx.client, &immich).await {
        Ok(health) => {
            status.server_ready = health.server_ready;
            status.machine_learning_ready = health.machine_learning_ready;
            status.valkey_ready = health.valkey_ready;
            status.postgres_ready = health.postgres_ready;
            status.ready = health.all_ready();
        }
        Err(err) => {
            error!(name = %name, error = %err, "状态轮询失败");
            status.ready = false;
            errors.push(err);
        }
    }

    match status::external_url(&ctx.client, &immich, ctx.route_api_available).await {
        Ok(url) => status.url = url,
        Err(err) => {
            error!(name = %name, error = %err, "对外地址推导失败");
            errors.push(err);
        }
    }

    if errors.is_empty() {
        if status.ready {
            status::set_condition(
                &mut status.conditions,
                CONDITION_READY,
                true,
                "AllComponentsReady",
                "All Immich components are ready",
                generation,
            );
            status::remove_condition(&mut status.conditions, CONDITION_PROGRESSING);
        } else {
            status::set_condition(
                &mut status.conditions,
                CONDITION_READY,
                false,
                "ComponentsNotReady",
                "Some Immich components are not ready",
                generation,
            );
        }
        status.observed_generation = generation;
        status.version = immich.get_image_tag(&ctx.images);
    } else {
        status::set_condition(
            &mut status.conditions,
            CONDITION_READY,
            false,
            "ReconcileError",
            "One or more components failed to reconcile",
            generation,
        );
    }

    publish_status(&api, &name, &status).await?;

    // 所有错误均已单独记录，向调用方返回最后一个触发退避
    if let Some(last_error) = errors.pop() {
        return Err(last_error);
    }

    debug!(name = %name, "协调完成");
    Ok(Action::requeue(STEADY_REQUEUE))
}

/// 协调失败时的重试策略
pub fn error_policy(immich: Arc<Immich>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        name = %immich.name_any(),
        error = %error,
        "协调失败，{} 秒后重试",
        ERROR_REQUEUE.as_secs()
    );
    Action::requeue(ERROR_REQUEUE)
}

fn has_finalizer(immich: &Immich) -> bool {
    immich.finalizers().iter().any(|f| f == FINALIZER)
}

async fn add_finalizer(api: &Api<Immich>, immich: &Immich) -> Result<()> {
    let mut finalizers = immich.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &immich.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<Immich>, immich: &Immich) -> Result<()> {
    let finalizers: Vec<String> = immich
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    let patch = json!({"metadata": {"finalizers": finalizers}});
    api.patch(
        &immich.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

async fn publish_status(api: &Api<Immich>, name: &str, status: &ImmichStatus) -> Result<()> {
    let patch = json!({"status": status});
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// 照片库 PVC：只创建一次，存在即复用
async fn reconcile_library(ctx: &Context, immich: &Immich, namespace: &str) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    if create_if_absent(&api, &library::claim(immich)).await? {
        info!(name = %immich.library_pvc_name(), "创建照片库 PVC，无 owner reference");
    }
    Ok(())
}

/// 渲染配置：每轮重新计算并声明式应用
async fn reconcile_config(ctx: &Context, immich: &Immich, namespace: &str) -> Result<()> {
    let rendered = config::render(immich)?;
    match immich.get_configuration_kind() {
        ConfigurationKind::Secret => {
            let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
            apply(&api, &config::secret(immich, &rendered)).await
        }
        ConfigurationKind::ConfigMap => {
            let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
            apply(&api, &config::config_map(immich, &rendered)).await
        }
    }
}

async fn reconcile_postgres(ctx: &Context, immich: &Immich, namespace: &str) -> Result<()> {
    reconcile_postgres_credentials(ctx, immich, namespace).await?;

    let stateful_sets: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&stateful_sets, &postgres::stateful_set(immich, &ctx.images)?).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&services, &postgres::service(immich)).await?;

    Ok(())
}

/// 数据库凭据：用户提供引用时完全跳过；已存在时绝不重新生成
async fn reconcile_postgres_credentials(
    ctx: &Context,
    immich: &Immich,
    namespace: &str,
) -> Result<()> {
    if immich
        .spec
        .postgres
        .as_ref()
        .and_then(|p| p.password_secret_ref.as_ref())
        .is_some()
    {
        debug!("使用用户提供的数据库凭据");
        return Ok(());
    }

    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let secret_name = immich.credentials_secret_name();
    // 存在即短路：凭据必须与数据库内容保持一致
    if api.get_opt(&secret_name).await?.is_some() {
        debug!(name = %secret_name, "数据库凭据已存在，原样复用");
        return Ok(());
    }

    let password = generate_random_password(GENERATED_PASSWORD_LENGTH);
    if create_if_absent(&api, &postgres::credentials_secret(immich, &password)).await? {
        info!(name = %secret_name, "创建数据库凭据 Secret，无 owner reference");
    }
    Ok(())
}

async fn reconcile_valkey(ctx: &Context, immich: &Immich, namespace: &str) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&deployments, &valkey::deployment(immich, &ctx.images)?).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&services, &valkey::service(immich)).await?;

    let persistence = immich.valkey_persistence();
    if immich.is_valkey_persistence_enabled()
        && persistence
            .existing_claim
            .filter(|claim| !claim.is_empty())
            .is_none()
    {
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
        create_if_absent(&claims, &valkey::data_claim(immich)).await?;
    }

    Ok(())
}

async fn reconcile_machine_learning(ctx: &Context, immich: &Immich, namespace: &str) -> Result<()> {
    // 缓存 PVC 先于 Deployment 创建，避免 Pod 等待不存在的卷
    let persistence = immich.machine_learning_persistence();
    if immich.is_machine_learning_persistence_enabled()
        && persistence
            .existing_claim
            .filter(|claim| !claim.is_empty())
            .is_none()
    {
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
        create_if_absent(&claims, &machine_learning::cache_claim(immich)).await?;
    }

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&deployments, &machine_learning::deployment(immich, &ctx.images)?).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&services, &machine_learning::service(immich)).await?;

    Ok(())
}

async fn reconcile_server(ctx: &Context, immich: &Immich, namespace: &str) -> Result<()> {
    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&deployments, &server::deployment(immich, &ctx.images)?).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    apply(&services, &server::service(immich)).await?;

    // Route 优先：显式启用或在 OpenShift 集群上自动创建
    if immich.should_create_route(ctx.route_api_available) {
        let routes: Api<DynamicObject> =
            Api::namespaced_with(ctx.client.clone(), namespace, &network::route_api_resource());
        apply(&routes, &network::route(immich)?).await?;
    }

    // Ingress 仅显式启用时创建
    if immich.is_ingress_enabled() {
        let ingresses: Api<Ingress> = Api::namespaced(ctx.client.clone(), namespace);
        apply(&ingresses, &network::ingress(immich)).await?;
    }

    Ok(())
}

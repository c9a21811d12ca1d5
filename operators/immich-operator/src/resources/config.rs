//! 渲染配置构建模块
//!
//! 将 Operator 推导的基础配置与用户自由配置块深度合并（用户优先），
//! 渲染为 YAML 后装入 ConfigMap 或 Secret。该对象随 CR 级联删除。

use std::collections::BTreeMap;

use immich_common::config::{as_document, deep_merge, prune_nulls, render_yaml};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::{json, Map, Value};

use crate::crd::Immich;
use crate::error::Result;
use crate::resources::{labels, owner_reference};

/// 渲染配置在 ConfigMap/Secret 中的固定键
pub const CONFIG_FILE_KEY: &str = "immich-config.yaml";

/// 服务端容器内的配置挂载路径
pub const CONFIG_MOUNT_PATH: &str = "/config";

const COMPONENT: &str = "config";

/// 计算最终配置文档
///
/// 基础文档只含 Operator 根据 CR 状态推导的连通性设置；用户文档先做
/// null 裁剪再合并进来，任何冲突均以用户值为准。
pub fn effective_document(immich: &Immich) -> Map<String, Value> {
    let mut document = Map::new();

    let mut machine_learning = Map::new();
    machine_learning.insert(
        "enabled".to_string(),
        Value::Bool(immich.machine_learning_config_enabled()),
    );
    if let Some(url) = immich.get_machine_learning_url() {
        machine_learning.insert("urls".to_string(), json!([url]));
    }
    document.insert(
        "machineLearning".to_string(),
        Value::Object(machine_learning),
    );

    if let Some(user_config) = immich
        .spec
        .immich
        .as_ref()
        .and_then(|settings| settings.configuration.as_ref())
    {
        let mut user_document = as_document(user_config);
        prune_nulls(&mut user_document);
        deep_merge(&mut document, user_document);
    }

    document
}

/// 渲染最终配置为 YAML 字符串
pub fn render(immich: &Immich) -> Result<String> {
    Ok(render_yaml(&effective_document(immich))?)
}

/// 以 ConfigMap 承载渲染配置
pub fn config_map(immich: &Immich, rendered: &str) -> ConfigMap {
    ConfigMap {
        metadata: metadata(immich),
        data: Some(BTreeMap::from([(
            CONFIG_FILE_KEY.to_string(),
            rendered.to_string(),
        )])),
        ..Default::default()
    }
}

/// 以 Secret 承载渲染配置
pub fn secret(immich: &Immich, rendered: &str) -> Secret {
    Secret {
        metadata: metadata(immich),
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([(
            CONFIG_FILE_KEY.to_string(),
            rendered.to_string(),
        )])),
        ..Default::default()
    }
}

fn metadata(immich: &Immich) -> ObjectMeta {
    ObjectMeta {
        name: Some(immich.config_name()),
        namespace: immich.namespace(),
        labels: Some(labels(immich, COMPONENT)),
        owner_references: Some(vec![owner_reference(immich)]),
        ..Default::default()
    }
}

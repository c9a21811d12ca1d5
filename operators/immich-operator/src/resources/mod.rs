//! 期望状态构建模块
//!
//! 每个受管组件一个子模块，均为 `(Immich, 默认镜像) -> 期望对象`
//! 的纯函数，无任何 I/O。命名、标签与所有权策略在此集中定义。

pub mod config;
pub mod library;
pub mod machine_learning;
pub mod network;
pub mod postgres;
pub mod server;
pub mod valkey;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::Immich;

/// 标准 Kubernetes 标签键
const LABEL_NAME: &str = "app.kubernetes.io/name";
const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// 固定的应用与 Operator 标识
pub const APP_NAME: &str = "immich";
pub const OPERATOR_NAME: &str = "immich-operator";

/// 子对象的完整标准标签集
pub fn labels(immich: &Immich, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), APP_NAME.to_string()),
        (LABEL_INSTANCE.to_string(), immich.name_any()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_PART_OF.to_string(), APP_NAME.to_string()),
    ])
}

/// selector 专用的标签子集
///
/// 用户追加的 Pod 标签只进入 Pod 模板，永远不会改变这里的选择逻辑。
pub fn selector_labels(immich: &Immich, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), APP_NAME.to_string()),
        (LABEL_INSTANCE.to_string(), immich.name_any()),
        (LABEL_COMPONENT.to_string(), component.to_string()),
    ])
}

/// 指向 Immich CR 的控制器 owner reference
///
/// 仅附加在短生命周期对象上；持久数据对象（照片库 PVC、生成的数据库
/// 凭据）刻意不携带，避免删除 CR 时级联清除用户数据。
pub fn owner_reference(immich: &Immich) -> OwnerReference {
    OwnerReference {
        api_version: Immich::api_version(&()).to_string(),
        kind: Immich::kind(&()).to_string(),
        name: immich.name_any(),
        uid: immich.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

//! 声明式应用模块
//!
//! 两类写入原语：服务端应用（server-side apply）用于短生命周期对象的
//! 幂等收敛；只创建一次（create-if-absent）用于持久数据对象的保留
//! 策略。两者都不做读-改-写循环，也不在本层重试。

use std::fmt::Debug;

use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// 服务端应用的字段管理者标识
pub const FIELD_MANAGER: &str = "immich-operator";

/// 以服务端应用方式写入对象
///
/// 声明本控制器对所写字段的所有权，其余字段的并发修改由 API 服务器
/// 协调；重复应用相同内容在存储层是无操作。
pub async fn apply<K>(api: &Api<K>, object: &K) -> Result<()>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = object
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &params, &Patch::Apply(object)).await?;
    debug!(name = %name, "已应用资源");
    Ok(())
}

/// 仅在对象不存在时创建，存在即原样复用
///
/// 持久数据对象（照片库 PVC、生成的数据库凭据）创建后不再被本控制器
/// 触碰。返回是否发生了创建。
pub async fn create_if_absent<K>(api: &Api<K>, object: &K) -> Result<bool>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = object
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    if api.get_opt(&name).await?.is_some() {
        debug!(name = %name, "资源已存在，原样复用");
        return Ok(false);
    }
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(true),
        // 与并发创建者竞争失败视同已存在
        Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
        Err(error) => Err(error.into()),
    }
}

//! 控制器模块
//!
//! 该模块负责控制器运行时的装配：监听 Immich 自定义资源及其全部
//! 短生命周期子对象，按键序列化地触发协调。启动时做一次 API 发现，
//! 判断集群是否提供 OpenShift Route。

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::controller::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, Discovery};
use tracing::{debug, info, warn};

use crate::crd::{Immich, OperatorImages, DEFAULT_IMAGES};
use crate::reconcile;

/// 每次协调共享的上下文
pub struct Context {
    /// Kubernetes 客户端
    pub client: Client,
    /// 启动时解析一次的默认镜像
    pub images: OperatorImages,
    /// 集群是否提供 OpenShift Route API
    pub route_api_available: bool,
}

/// 启动 Immich 控制器，阻塞运行直至收到退出信号
pub async fn run(client: Client) -> anyhow::Result<()> {
    let route_api_available = detect_route_api(&client).await;
    if route_api_available {
        info!("检测到 OpenShift Route API，服务端默认通过 Route 暴露");
    }

    let context = Arc::new(Context {
        client: client.clone(),
        images: DEFAULT_IMAGES.clone(),
        route_api_available,
    });

    let immiches: Api<Immich> = Api::all(client.clone());

    info!("Immich Operator 控制器已启动");
    Controller::new(immiches, WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<StatefulSet>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<ConfigMap>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Secret>::all(client.clone()), WatcherConfig::default())
        .owns(
            Api::<PersistentVolumeClaim>::all(client.clone()),
            WatcherConfig::default(),
        )
        .owns(Api::<Ingress>::all(client.clone()), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::reconcile, reconcile::error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok(object) => debug!("协调成功: {:?}", object),
                Err(error) => warn!("协调错误: {}", error),
            }
        })
        .await;

    info!("Immich Operator 控制器已停止");
    Ok(())
}

/// 通过 API 发现判断集群是否提供 OpenShift Route
async fn detect_route_api(client: &Client) -> bool {
    match Discovery::new(client.clone())
        .filter(&["route.openshift.io"])
        .run()
        .await
    {
        Ok(discovery) => discovery
            .groups()
            .any(|group| group.name() == "route.openshift.io"),
        Err(error) => {
            warn!(error = %error, "API 发现失败，按无 Route API 处理");
            false
        }
    }
}
